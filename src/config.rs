use serde_derive::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{AddressRange, AddressV4};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub listen: SocketAddr,
    pub config_path: PathBuf,
    pub lease_path: PathBuf,
    /// Sub-range static reservations are placed in.
    pub reserved_range: AddressRange,
    /// Gateway reported when subnet 0 carries no `routers` option.
    pub gateway_fallback: AddressV4,
    pub config_owner: Option<String>,
    pub config_group: Option<String>,
    pub config_mode: u32,
    /// Checks a written configuration; the file path is appended.
    pub validate_command: Vec<String>,
    pub reload_command: Vec<String>,
    pub status_command: Vec<String>,
    /// Human-readable service report shown alongside the status.
    pub details_command: Vec<String>,
    /// Upper bound on any external command; children are killed past it.
    #[serde(with = "serde_millis")]
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 5080)),
            config_path: PathBuf::from("/etc/kea/kea-dhcp4.conf"),
            lease_path: PathBuf::from("/var/lib/kea/kea-leases4.csv"),
            reserved_range: AddressRange {
                start: AddressV4::from([192, 168, 123, 2]),
                end: AddressV4::from([192, 168, 123, 49]),
            },
            gateway_fallback: AddressV4::from([192, 168, 123, 1]),
            config_owner: Some("_kea".to_string()),
            config_group: Some("_kea".to_string()),
            config_mode: 0o640,
            validate_command: vec!["kea-dhcp4".to_string(), "-t".to_string()],
            reload_command: command(&["systemctl", "reload", "kea-dhcp4-server"]),
            status_command: command(&["systemctl", "is-active", "kea-dhcp4-server"]),
            details_command: command(&["systemctl", "status", "kea-dhcp4-server", "--no-pager"]),
            command_timeout: Duration::from_secs(30),
        }
    }
}

fn command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        AddressRange::new(self.reserved_range.start, self.reserved_range.end)?;
        for (name, cmd) in [
            ("validate_command", &self.validate_command),
            ("reload_command", &self.reload_command),
            ("status_command", &self.status_command),
            ("details_command", &self.details_command),
        ] {
            if cmd.is_empty() {
                return Err(Error::InvalidFormat(format!("{} must not be empty", name)));
            }
        }
        if self.command_timeout.is_zero() {
            return Err(Error::InvalidFormat(
                "command_timeout must be positive".to_string(),
            ));
        }
        if self.config_mode > 0o7777 {
            return Err(Error::InvalidFormat(format!(
                "config_mode {:o} is not a permission mode",
                self.config_mode
            )));
        }
        Ok(())
    }
}
