//! Working-directory emulation for transports that run every command in a
//! fresh exec channel. `cd` never reaches the remote side; it is resolved
//! here and later commands are prefixed with the tracked directory.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    /// `None` means bare `cd`.
    ChangeDirectory(Option<String>),
    Run(String),
}

pub fn classify(command: &str) -> ShellCommand {
    let trimmed = command.trim();
    if trimmed == "cd" {
        return ShellCommand::ChangeDirectory(None);
    }
    match trimmed.strip_prefix("cd ") {
        Some(rest) if !rest.trim().is_empty() => {
            ShellCommand::ChangeDirectory(Some(rest.trim().to_string()))
        }
        Some(_) => ShellCommand::ChangeDirectory(None),
        None => ShellCommand::Run(expand_alias(trimmed)),
    }
}

/// Interactive-shell aliases that a non-login exec channel does not have.
pub fn expand_alias(command: &str) -> String {
    match command {
        "ll" => "ls -l".to_string(),
        "la" => "ls -la".to_string(),
        "l" => "ls -CF".to_string(),
        cmd => {
            if let Some(args) = cmd.strip_prefix("ll ") {
                format!("ls -l {args}")
            } else if let Some(args) = cmd.strip_prefix("la ") {
                format!("ls -la {args}")
            } else {
                cmd.to_string()
            }
        }
    }
}

/// Resolves `target` against `current`. `~` and bare `cd` go to `home`.
pub fn resolve_directory(current: &str, target: Option<&str>, home: &str) -> String {
    let target = match target {
        None | Some("~") => return home.to_string(),
        Some(t) => t,
    };
    let joined = if let Some(rest) = target.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else if target.starts_with('/') {
        target.to_string()
    } else {
        format!("{current}/{target}")
    };

    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Single-quotes `value` for a POSIX shell.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

pub fn in_directory(directory: &str, command: &str) -> String {
    format!("cd {} && {}", quote(directory), command)
}

pub fn directory_test(directory: &str) -> String {
    format!(
        "test -d {} && echo EXISTS || echo NOT_EXISTS",
        quote(directory)
    )
}

/// Message for a command that exited non-zero.
pub fn failure_message(command: &str, code: i32, output: &str) -> String {
    let command = command.trim();
    if code == 127 {
        let name = command.split_whitespace().next().unwrap_or(command);
        return format!(
            "bash: {name}: command not found\nhint: check the spelling or run 'which {name}' to see whether it is installed"
        );
    }
    let output = output.trim_end();
    if output.is_empty() {
        format!("command exited with status {code}")
    } else {
        format!("{output}\n(exit status {code})")
    }
}
