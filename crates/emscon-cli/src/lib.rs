use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "emscon", version, about = "EMS remote administration console")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Extra config file applied after the global and project files.
    #[arg(long)]
    pub config: Option<String>,

    /// Directory searched for `.emscon.toml` instead of the current one.
    #[arg(long)]
    pub project: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Open a session and start the interactive terminal.
    Connect {
        /// `[user@]host[:port]`
        target: String,
        /// Environment variable holding the password. Unset means ssh-agent.
        #[arg(long, default_value = "EMSCON_PASSWORD")]
        password_env: String,
        /// Remember the target in the connection history.
        #[arg(long)]
        save: bool,
    },
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    List,
    Remove { id: String },
    Clear,
    /// Reconnect with the stored credentials of an entry.
    Connect { id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub username: String,
    pub host: String,
    pub port: u16,
}

/// Parses `[user@]host[:port]`. The user defaults to the local login name.
pub fn parse_target(target: &str, default_port: u16) -> Result<Target> {
    let (username, host_port) = match target.split_once('@') {
        Some((user, rest)) => (user.to_string(), rest),
        None => (whoami::username(), target),
    };
    let (host, port) = match host_port.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => bail!("invalid port in {target:?}"),
        },
        None => (host_port, default_port),
    };
    if host.is_empty() || username.is_empty() {
        bail!("invalid target {target:?}, expected [user@]host[:port]");
    }
    Ok(Target {
        username,
        host: host.to_string(),
        port,
    })
}

pub const CONSOLE_HELP: &str = "\
# :history | :clear | :status | :help | exit
# :preset [NAME]
# :upload LOCAL REMOTE
# :service start|stop|enable|disable|status NAME
# :log [clear]
# :net list | show IF | set IF IP NETMASK [GATEWAY]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Enable,
    Disable,
    Status,
}

/// One line typed into the interactive session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Exit,
    Help,
    History,
    Clear,
    Status,
    Presets,
    Preset(String),
    Upload {
        local: String,
        remote: String,
    },
    Service {
        action: ServiceAction,
        name: String,
    },
    Log {
        clear: bool,
    },
    Interfaces,
    InterfaceShow(String),
    InterfaceSet {
        interface: String,
        ip_address: String,
        netmask: String,
        gateway: Option<String>,
    },
    /// Malformed console command; carries the usage line to show.
    Usage(&'static str),
    /// Anything else goes to the remote side verbatim.
    Remote(String),
}

/// Lines starting with `:` are console commands; everything else is remote.
pub fn parse_console_line(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line == "exit" || line == "quit" {
        return ConsoleCommand::Exit;
    }
    let Some(rest) = line.strip_prefix(':') else {
        return ConsoleCommand::Remote(line.to_string());
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    match args.as_slice() {
        ["help"] => ConsoleCommand::Help,
        ["history"] => ConsoleCommand::History,
        ["clear"] => ConsoleCommand::Clear,
        ["status"] => ConsoleCommand::Status,
        ["preset"] => ConsoleCommand::Presets,
        ["preset", name] => ConsoleCommand::Preset(name.to_string()),
        ["upload", local, remote] => ConsoleCommand::Upload {
            local: local.to_string(),
            remote: remote.to_string(),
        },
        ["upload", ..] => ConsoleCommand::Usage("# usage: :upload LOCAL REMOTE"),
        ["service", action, name] => {
            let action = match *action {
                "start" => ServiceAction::Start,
                "stop" => ServiceAction::Stop,
                "enable" => ServiceAction::Enable,
                "disable" => ServiceAction::Disable,
                "status" => ServiceAction::Status,
                _ => return ConsoleCommand::Usage(SERVICE_USAGE),
            };
            ConsoleCommand::Service {
                action,
                name: name.to_string(),
            }
        }
        ["service", ..] => ConsoleCommand::Usage(SERVICE_USAGE),
        ["log"] => ConsoleCommand::Log { clear: false },
        ["log", "clear"] => ConsoleCommand::Log { clear: true },
        ["log", ..] => ConsoleCommand::Usage("# usage: :log [clear]"),
        ["net"] | ["net", "list"] => ConsoleCommand::Interfaces,
        ["net", "show", interface] => ConsoleCommand::InterfaceShow(interface.to_string()),
        ["net", "set", interface, ip_address, netmask, gateway @ ..] if gateway.len() <= 1 => {
            ConsoleCommand::InterfaceSet {
                interface: interface.to_string(),
                ip_address: ip_address.to_string(),
                netmask: netmask.to_string(),
                gateway: gateway.first().map(|g| g.to_string()),
            }
        }
        ["net", ..] => ConsoleCommand::Usage(NET_USAGE),
        _ => ConsoleCommand::Usage(CONSOLE_HELP),
    }
}

const SERVICE_USAGE: &str = "# usage: :service start|stop|enable|disable|status NAME";
const NET_USAGE: &str = "# usage: :net list | show IF | set IF IP NETMASK [GATEWAY]";
