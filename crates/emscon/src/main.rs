use anyhow::{bail, Context, Result};
use clap::Parser;
use emscon_cli::{
    parse_console_line, parse_target, Cli, Command, ConsoleCommand, HistoryCommand, ServiceAction,
    CONSOLE_HELP,
};
use emscon_config::{AppConfig, AppPaths, ConfigManager};
use emscon_core::{
    ConnectionConfig, Console, Event, ExecError, InterfaceConfig, NotificationLevel, SqliteKvStore,
    SshTransport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::new()?;
    let config_manager = ConfigManager::new(paths.clone());
    let overrides = match cli.config.as_deref() {
        Some(path) => Some(ConfigManager::load_layer(Path::new(path))?),
        None => None,
    };
    let cwd = match cli.project.as_deref() {
        Some(dir) => Some(PathBuf::from(dir)),
        None => std::env::current_dir().ok(),
    };
    let config = config_manager.load(cwd.as_deref(), overrides)?;
    let interactive = matches!(
        cli.command,
        Command::Connect { .. }
            | Command::History {
                command: HistoryCommand::Connect { .. }
            }
    );
    let _log_guard = init_logging(&config, &paths, config.logging.stdout && !interactive)?;

    if let Command::Config { init } = cli.command {
        if init {
            config_manager.save_default()?;
            println!("config initialized at {}", paths.config_file.display());
        } else {
            println!("{}", paths.config_file.display());
        }
        return Ok(());
    }

    let store = Arc::new(SqliteKvStore::open(paths.state_db.clone())?);
    let transport = Arc::new(SshTransport::new(&config, paths.known_hosts.clone()));
    let console = Console::new(transport.clone(), store, &config);

    match cli.command {
        Command::Connect {
            target,
            password_env,
            save,
        } => {
            let target = parse_target(&target, config.ssh.port)?;
            let password = std::env::var(&password_env).unwrap_or_default();
            if password.is_empty() {
                info!(var = %password_env, "no password given, using ssh-agent");
            }
            let connection =
                ConnectionConfig::new(target.host, target.port, target.username, password);
            console.connect(connection, save).await?;
            run_session(&console, &transport).await?;
        }
        Command::History { command } => match command {
            HistoryCommand::List => {
                for entry in console.connection.history() {
                    println!(
                        "{}\t{}\t{}",
                        entry.id,
                        entry.display_name,
                        entry.last_used_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
            HistoryCommand::Remove { id } => {
                if !console.connection.remove_from_history(&id) {
                    bail!("no history entry {id}");
                }
                println!("removed {id}");
            }
            HistoryCommand::Clear => {
                console.connection.clear_history();
                println!("history cleared");
            }
            HistoryCommand::Connect { id } => {
                let entry = console
                    .connection
                    .find_history(&id)
                    .with_context(|| format!("no history entry {id}"))?;
                console.connect_from_history(&entry).await?;
                run_session(&console, &transport).await?;
            }
        },
        Command::Config { .. } => {}
    }

    Ok(())
}

fn init_logging(
    config: &AppConfig,
    paths: &AppPaths,
    enable_stdout: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&paths.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&paths.log_dir, "emscon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    let file_layer = if config.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if enable_stdout {
        let stdout_layer = if config.logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stdout)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .boxed()
        };
        tracing::subscriber::set_global_default(subscriber.with(stdout_layer))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

/// Line-oriented terminal over the connected console.
async fn run_session(console: &Console, transport: &SshTransport) -> Result<()> {
    let watchdog = console.spawn_watchdog();
    let notifier = spawn_notifier(console);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = 0;

    shown = flush_output(console, &mut stdout, shown).await?;
    while let Some(line) = lines.next_line().await? {
        match parse_console_line(&line) {
            ConsoleCommand::Exit => break,
            ConsoleCommand::Help => console.terminal.note(CONSOLE_HELP),
            ConsoleCommand::Usage(usage) => console.terminal.note(usage),
            ConsoleCommand::History => {
                let mut listing = String::new();
                for (index, command) in console.terminal.history().iter().enumerate() {
                    listing.push_str(&format!("{:>4}  {command}\n", index + 1));
                }
                stdout.write_all(listing.as_bytes()).await?;
            }
            ConsoleCommand::Clear => {
                console.terminal.clear();
                shown = 0;
            }
            ConsoleCommand::Status => {
                let status = format!(
                    "{} ({})\n",
                    console.connection.connection_info(),
                    console.connection.status()
                );
                stdout.write_all(status.as_bytes()).await?;
            }
            ConsoleCommand::Presets => {
                let names = format!("presets: {}\n", console.terminal.presets().join(", "));
                stdout.write_all(names.as_bytes()).await?;
            }
            ConsoleCommand::Preset(name) => {
                report(&mut stdout, console.terminal.execute_preset(&name).await).await?;
            }
            ConsoleCommand::Upload { local, remote } => {
                let message = match transport.upload_file(Path::new(&local), &remote).await {
                    Ok(bytes) => format!("# uploaded {bytes} bytes to {remote}"),
                    Err(err) => format!("# upload failed: {err}"),
                };
                console.terminal.note(&message);
            }
            ConsoleCommand::Service { action, name } => {
                console.terminal.note(&service_command(console, action, &name).await);
            }
            ConsoleCommand::Log { clear: true } => {
                console.activity.clear();
                console.terminal.note("# activity log cleared");
            }
            ConsoleCommand::Log { clear: false } => {
                let entries = console.activity.entries();
                let listing = if entries.is_empty() {
                    "# activity log is empty".to_string()
                } else {
                    entries
                        .iter()
                        .map(|entry| {
                            format!(
                                "# {} {:?} {}",
                                entry.timestamp.format("%H:%M:%S"),
                                entry.level,
                                entry.message
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                console.terminal.note(&listing);
            }
            ConsoleCommand::Interfaces => {
                let message = match console.network.interfaces().await {
                    Ok(interfaces) if interfaces.is_empty() => "# no interfaces found".to_string(),
                    Ok(interfaces) => interfaces
                        .iter()
                        .map(|iface| {
                            format!(
                                "# {:<10} {:<8} {:<17} {} {}",
                                iface.name,
                                iface.status,
                                iface.mac_address,
                                iface.ip_address,
                                iface.netmask
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n"),
                    Err(err) => format!("# interface listing failed: {err}"),
                };
                console.terminal.note(&message);
            }
            ConsoleCommand::InterfaceShow(name) => {
                let message = match console.network.interface_config(&name).await {
                    Ok(config) => format!(
                        "# {}: {} netmask {} gateway {}",
                        config.interface,
                        config.ip_address,
                        config.netmask,
                        config.gateway.as_deref().unwrap_or("none")
                    ),
                    Err(err) => format!("# {err}"),
                };
                console.terminal.note(&message);
            }
            ConsoleCommand::InterfaceSet {
                interface,
                ip_address,
                netmask,
                gateway,
            } => {
                let config = InterfaceConfig {
                    interface,
                    ip_address,
                    netmask,
                    gateway,
                };
                let message = match console.network.apply(&config).await {
                    Ok(()) => format!("# {} configured", config.interface),
                    Err(err) => format!("# {} not configured: {err}", config.interface),
                };
                console.terminal.note(&message);
            }
            ConsoleCommand::Remote(command) => {
                let result = console.terminal.execute_command(&command).await.map(|_| ());
                report(&mut stdout, result).await?;
            }
        }
        shown = flush_output(console, &mut stdout, shown).await?;
        if !console.connection.is_connected() {
            stdout.write_all(b"\nconnection closed\n").await?;
            break;
        }
    }

    if console.connection.is_connected() {
        if let Err(err) = console.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
    }
    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    notifier.abort();
    stdout.flush().await?;
    info!("session ended");
    Ok(())
}

async fn service_command(console: &Console, action: ServiceAction, name: &str) -> String {
    let services = &console.services;
    let result = match action {
        ServiceAction::Start => services.start(name).await.map(|_| "started".to_string()),
        ServiceAction::Stop => services.stop(name).await.map(|_| "stopped".to_string()),
        ServiceAction::Enable => services
            .set_enabled(name, true)
            .await
            .map(|_| "enabled".to_string()),
        ServiceAction::Disable => services
            .set_enabled(name, false)
            .await
            .map(|_| "disabled".to_string()),
        ServiceAction::Status => services.status(name).await.map(|status| {
            format!(
                "{}, {}: {}",
                if status.active { "active" } else { "inactive" },
                if status.enabled { "enabled" } else { "disabled" },
                status.status
            )
        }),
    };
    match result {
        Ok(summary) => format!("# {name}: {summary}"),
        Err(err) => format!("# {err}"),
    }
}

/// Remote failures are already rendered in the output log.
async fn report(stdout: &mut tokio::io::Stdout, result: Result<(), ExecError>) -> Result<()> {
    match result {
        Ok(()) | Err(ExecError::Remote(_)) => Ok(()),
        Err(err) => {
            stdout.write_all(format!("{err}\n").as_bytes()).await?;
            Ok(())
        }
    }
}

async fn flush_output(
    console: &Console,
    stdout: &mut tokio::io::Stdout,
    shown: usize,
) -> Result<usize> {
    let fresh = console.terminal.output_since(shown);
    let mut text = String::new();
    for segment in &fresh {
        text.push_str(&segment.text);
    }
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(shown + fresh.len())
}

fn spawn_notifier(console: &Console) -> tokio::task::JoinHandle<()> {
    let mut events = console.bus.listen();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Event::ConnectionLost { host, port } => {
                    eprintln!("\nconnection to {host}:{port} lost");
                }
                Event::Notification {
                    level: NotificationLevel::Error,
                    message,
                } => eprintln!("\nerror: {message}"),
                _ => {}
            }
        }
    })
}
