use hmac::{Hmac, Mac};
use russh::keys::ssh_key::known_hosts::{Entry, HostPatterns, KnownHosts as KnownHostsFile, Marker};
use russh::keys::PublicKey;
use sha1::Sha1;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// OpenSSH-format trust store for server host keys.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    path: PathBuf,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyCheck {
    Trusted,
    Changed,
    Unknown,
    Revoked,
}

impl KnownHosts {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let entries = if path.exists() {
            KnownHostsFile::read_file(&path)?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyCheck {
        let target = host_label(host, port);
        let mut verdict = HostKeyCheck::Unknown;
        for entry in self
            .entries
            .iter()
            .filter(|e| patterns_match(e.host_patterns(), &target))
        {
            let same_key = entry.public_key() == key;
            match entry.marker() {
                Some(Marker::Revoked) if same_key => return HostKeyCheck::Revoked,
                Some(Marker::Revoked) | Some(Marker::CertAuthority) => continue,
                None if same_key => return HostKeyCheck::Trusted,
                None => verdict = HostKeyCheck::Changed,
            }
        }
        verdict
    }

    pub fn remember(&mut self, host: &str, port: u16, key: &PublicKey) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = format!("{} {}\n", host_label(host, port), key.to_openssh()?);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        self.entries = KnownHostsFile::read_file(&self.path)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Name a host is recorded under: bare for port 22, `[host]:port` otherwise.
fn host_label(host: &str, port: u16) -> String {
    match port {
        22 => host.to_string(),
        _ => format!("[{host}]:{port}"),
    }
}

fn patterns_match(patterns: &HostPatterns, target: &str) -> bool {
    match patterns {
        HostPatterns::Patterns(list) => plain_patterns_match(list, target),
        HostPatterns::HashedName { salt, hash } => {
            let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
                return false;
            };
            mac.update(target.as_bytes());
            mac.verify_slice(hash).is_ok()
        }
    }
}

/// A negated pattern that matches vetoes the whole line.
fn plain_patterns_match(patterns: &[String], target: &str) -> bool {
    let mut hit = false;
    for pattern in patterns {
        match pattern.strip_prefix('!') {
            Some(negated) if wildcard_match(negated, target) => return false,
            Some(_) => {}
            None => hit |= wildcard_match(pattern, target),
        }
    }
    hit
}

fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    // reachable[j]: pattern prefix consumed so far matches text[..j]
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '*' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= reachable[j];
                    next[j] = seen;
                }
            }
            _ => {
                for j in 0..text.len() {
                    if reachable[j] && (*p == '?' || *p == text[j]) {
                        next[j + 1] = true;
                    }
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn wildcards() {
        assert!(wildcard_match("10.0.0.5", "10.0.0.5"));
        assert!(wildcard_match("10.0.0.*", "10.0.0.5"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("gw-?.lan", "gw-1.lan"));
        assert!(!wildcard_match("gw-?.lan", "gw-12.lan"));
        assert!(!wildcard_match("*.lan", "host.wan"));
    }

    #[test]
    fn labels_include_non_default_port() {
        assert_eq!(host_label("10.0.0.5", 22), "10.0.0.5");
        assert_eq!(host_label("10.0.0.5", 2222), "[10.0.0.5]:2222");
    }

    #[test]
    fn negated_pattern_vetoes_match() {
        let patterns = vec!["10.0.0.*".to_string(), "!10.0.0.9".to_string()];
        assert!(plain_patterns_match(&patterns, "10.0.0.5"));
        assert!(!plain_patterns_match(&patterns, "10.0.0.9"));
        assert!(!plain_patterns_match(&patterns, "192.168.1.1"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let hosts = KnownHosts::load(dir.path().join("known_hosts")).unwrap();
        assert!(hosts.is_empty());
    }
}
