use crate::activity::ActivityLog;
use crate::error::NetworkError;
use crate::transport::RemoteTransport;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::debug;

const LIST_LINKS: &str = "ip -o link show";
const LIST_ADDRESSES: &str = "ip -o -4 addr show";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    /// Operational state as reported by `ip link`, lowercased.
    pub status: String,
    pub mac_address: String,
    pub ip_address: String,
    pub netmask: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InterfaceConfig {
    pub interface: String,
    pub ip_address: String,
    pub netmask: String,
    pub gateway: Option<String>,
}

/// Interface inspection and static IPv4 configuration through `ip`.
#[derive(Clone)]
pub struct NetworkControl {
    transport: Arc<dyn RemoteTransport>,
    activity: ActivityLog,
}

impl NetworkControl {
    pub fn new(transport: Arc<dyn RemoteTransport>, activity: ActivityLog) -> Self {
        Self {
            transport,
            activity,
        }
    }

    pub async fn interfaces(&self) -> Result<Vec<NetworkInterface>, NetworkError> {
        let mut output = self.transport.run_command(LIST_LINKS).await?;
        output.push('\n');
        output.push_str(&self.transport.run_command(LIST_ADDRESSES).await?);
        let interfaces = parse_ip_output(&output);
        self.activity
            .info(format!("found {} network interfaces", interfaces.len()));
        Ok(interfaces)
    }

    /// First IPv4 address of `name` plus its default gateway, if any.
    pub async fn interface_config(&self, name: &str) -> Result<InterfaceConfig, NetworkError> {
        validate_name(name)?;
        let output = self
            .transport
            .run_command(&format!("ip -o -4 addr show dev {name}"))
            .await?;
        let found = parse_ip_output(&output)
            .into_iter()
            .find(|iface| iface.name == name && !iface.ip_address.is_empty())
            .ok_or_else(|| NetworkError::NoAddress(name.to_string()))?;

        let gateway = match self
            .transport
            .run_command(&format!("ip route show default dev {name}"))
            .await
        {
            Ok(routes) => parse_gateway(&routes),
            Err(err) => {
                debug!(interface = %name, error = %err, "gateway lookup failed");
                None
            }
        };

        Ok(InterfaceConfig {
            interface: name.to_string(),
            ip_address: found.ip_address,
            netmask: found.netmask,
            gateway,
        })
    }

    /// Replaces every address on the interface with the given one. The link
    /// is taken down for the duration, so applying this to the interface
    /// carrying the session will drop it.
    pub async fn apply(&self, config: &InterfaceConfig) -> Result<(), NetworkError> {
        let name = config.interface.as_str();
        validate_name(name)?;
        let address = parse_address(&config.ip_address)?;
        let prefix = netmask_to_prefix(&config.netmask)?;
        let gateway = match config.gateway.as_deref().map(str::trim) {
            Some(gateway) if !gateway.is_empty() => Some(parse_address(gateway)?),
            _ => None,
        };

        self.run(&format!("ip link set {name} down")).await?;
        self.run(&format!("ip addr flush dev {name}")).await?;
        self.run(&format!("ip addr add {address}/{prefix} dev {name}"))
            .await?;
        if let Some(gateway) = gateway {
            if let Err(err) = self
                .transport
                .run_command(&format!("ip route del default dev {name} 2>/dev/null || true"))
                .await
            {
                debug!(interface = %name, error = %err, "removing old default route failed");
            }
            self.run(&format!("ip route add default via {gateway} dev {name}"))
                .await?;
        }
        self.run(&format!("ip link set {name} up")).await?;

        self.activity
            .info(format!("interface {name} set to {address}/{prefix}"));
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<String, NetworkError> {
        Ok(self.transport.run_command(command).await?)
    }
}

/// Folds `ip -o link` and `ip -o addr` lines into one entry per interface,
/// in order of first appearance.
pub fn parse_ip_output(output: &str) -> Vec<NetworkInterface> {
    let mut interfaces: Vec<NetworkInterface> = Vec::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        let name = parts[1].trim_end_matches(':');
        // veth pairs show up as `veth0@if5`
        let name = name.split('@').next().unwrap_or(name);

        let index = match interfaces.iter().position(|iface| iface.name == name) {
            Some(index) => index,
            None => {
                interfaces.push(NetworkInterface {
                    name: name.to_string(),
                    status: "unknown".to_string(),
                    ..Default::default()
                });
                interfaces.len() - 1
            }
        };
        let iface = &mut interfaces[index];

        let mut tokens = parts[2..].iter();
        while let Some(token) = tokens.next() {
            match *token {
                "inet" => {
                    let Some(cidr) = tokens.next() else { continue };
                    if !iface.ip_address.is_empty() {
                        continue;
                    }
                    if let Some((ip, netmask)) = split_cidr(cidr) {
                        iface.ip_address = ip;
                        iface.netmask = netmask;
                    }
                }
                "state" => {
                    if let Some(state) = tokens.next() {
                        iface.status = state.to_ascii_lowercase();
                    }
                }
                "link/ether" => {
                    if let Some(mac) = tokens.next() {
                        iface.mac_address = mac.to_string();
                    }
                }
                flags if flags.starts_with('<') => {
                    let up = flags
                        .trim_matches(|c| c == '<' || c == '>')
                        .split(',')
                        .any(|flag| flag == "UP");
                    iface.status = if up { "up" } else { "down" }.to_string();
                }
                _ => {}
            }
        }
    }
    interfaces
}

fn split_cidr(cidr: &str) -> Option<(String, String)> {
    let (ip, prefix) = cidr.split_once('/')?;
    let netmask = prefix_to_netmask(prefix.parse().ok()?)?;
    Some((ip.to_string(), netmask.to_string()))
}

fn parse_gateway(routes: &str) -> Option<String> {
    routes.lines().find_map(|line| {
        let mut tokens = line.split_whitespace();
        tokens.find(|token| *token == "via")?;
        tokens.next().map(str::to_string)
    })
}

pub fn prefix_to_netmask(prefix: u8) -> Option<Ipv4Addr> {
    if prefix > 32 {
        return None;
    }
    let bits = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
    Some(Ipv4Addr::from(bits))
}

/// Only contiguous masks are accepted.
pub fn netmask_to_prefix(netmask: &str) -> Result<u8, NetworkError> {
    let invalid = || NetworkError::InvalidNetmask(netmask.to_string());
    let bits = u32::from(netmask.trim().parse::<Ipv4Addr>().map_err(|_| invalid())?);
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(invalid());
    }
    Ok(bits.leading_ones() as u8)
}

fn parse_address(text: &str) -> Result<Ipv4Addr, NetworkError> {
    text.trim()
        .parse()
        .map_err(|_| NetworkError::InvalidAddress(text.to_string()))
}

fn validate_name(name: &str) -> Result<(), NetworkError> {
    let valid = !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(NetworkError::InvalidName(name.to_string()))
    }
}
