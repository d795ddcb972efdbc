//! Node configuration file management.
//!
//! The launcher writes one TOML file per node carrying its number, its
//! interfaces, the shared address directory, and the protocol tunables.
//! Everything but the node section has workable defaults.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use strata_types::directory::DirectoryEntry;

/// Complete per-node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's identity.
    pub node: NodeSection,
    /// The launcher-assigned node-number/address directory.
    pub directory: Vec<DirectoryEntry>,
    /// Protocol tunables.
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Identity section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// This node's number in the directory.
    pub number: u32,
    /// Attached interfaces as `addr/prefix` strings, e.g. `10.0.0.1/24`.
    pub interfaces: Vec<String>,
}

/// Protocol tunables with their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// UDP port for routing control.
    #[serde(default = "default_ls_port")]
    pub ls_port: u16,
    /// UDP port for the ring protocol.
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    /// UDP port for search-layer transfers.
    #[serde(default = "default_search_port")]
    pub search_port: u16,
    /// Ping audit period and expiry, in milliseconds.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    /// Neighbor probing period, in milliseconds.
    #[serde(default = "default_nd_timeout_ms")]
    pub nd_timeout_ms: u64,
    /// Stabilize period, in milliseconds.
    #[serde(default = "default_stabilize_period_ms")]
    pub stabilize_period_ms: u64,
    /// Fix-finger period, in milliseconds.
    #[serde(default = "default_fix_finger_period_ms")]
    pub fix_finger_period_ms: u64,
    /// Initial TTL for flooded LSPs and routed pings.
    #[serde(default = "default_max_ttl")]
    pub max_ttl: u8,
    /// TTL for single-hop probes.
    #[serde(default = "default_single_hop")]
    pub single_hop: u8,
}

// Default value functions

fn default_ls_port() -> u16 {
    5000
}

fn default_app_port() -> u16 {
    10001
}

fn default_search_port() -> u16 {
    10000
}

fn default_ping_timeout_ms() -> u64 {
    2000
}

fn default_nd_timeout_ms() -> u64 {
    2000
}

fn default_stabilize_period_ms() -> u64 {
    5000
}

fn default_fix_finger_period_ms() -> u64 {
    8000
}

fn default_max_ttl() -> u8 {
    16
}

fn default_single_hop() -> u8 {
    1
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            ls_port: default_ls_port(),
            app_port: default_app_port(),
            search_port: default_search_port(),
            ping_timeout_ms: default_ping_timeout_ms(),
            nd_timeout_ms: default_nd_timeout_ms(),
            stabilize_period_ms: default_stabilize_period_ms(),
            fix_finger_period_ms: default_fix_finger_period_ms(),
            max_ttl: default_max_ttl(),
            single_hop: default_single_hop(),
        }
    }
}

/// One attached interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// Local address on this link.
    pub addr: Ipv4Addr,
    /// Subnet prefix length.
    pub prefix: u8,
}

impl Interface {
    /// Parse an `addr/prefix` string.
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("interface {s:?} is not addr/prefix"))?;
        let addr: Ipv4Addr = addr.parse()?;
        let prefix: u8 = prefix.parse()?;
        anyhow::ensure!(prefix <= 32, "interface {s:?} prefix out of range");
        Ok(Interface { addr, prefix })
    }

    /// Subnet-directed broadcast address for this link.
    pub fn broadcast(&self) -> Ipv4Addr {
        let mask = if self.prefix == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(self.prefix))
        };
        Ipv4Addr::from(u32::from(self.addr) | !mask)
    }
}

impl NodeConfig {
    /// Load configuration from `argv[1]`, or `$STRATA_CONFIG`, or
    /// `./node.toml`.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: NodeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn config_path() -> PathBuf {
        if let Some(path) = std::env::args().nth(1) {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("STRATA_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("node.toml")
    }

    /// Parsed interface list.
    pub fn interfaces(&self) -> anyhow::Result<Vec<Interface>> {
        self.node.interfaces.iter().map(|s| Interface::parse(s)).collect()
    }

    /// This node's main address: its directory entry.
    pub fn main_addr(&self) -> anyhow::Result<Ipv4Addr> {
        self.directory
            .iter()
            .find(|e| e.node == self.node.number)
            .map(|e| e.address)
            .ok_or_else(|| {
                anyhow::anyhow!("node {} has no directory entry", self.node.number)
            })
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.node.interfaces.is_empty(),
            "node {} has no interfaces",
            self.node.number
        );
        let main = self.main_addr()?;
        let interfaces = self.interfaces()?;
        anyhow::ensure!(
            interfaces.iter().any(|i| i.addr == main),
            "main address {main} is not on any interface"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[node]
number = 1
interfaces = ["10.0.0.1/24", "10.0.1.1/24"]

[[directory]]
node = 1
address = "10.0.0.1"

[[directory]]
node = 2
address = "10.0.0.2"

[protocol]
ls_port = 6000
"#;

    #[test]
    fn test_parse_sample() {
        let config: NodeConfig = toml::from_str(SAMPLE).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.node.number, 1);
        assert_eq!(config.protocol.ls_port, 6000);
        // Unset fields fall back to defaults.
        assert_eq!(config.protocol.app_port, 10001);
        assert_eq!(config.protocol.search_port, 10000);
        assert_eq!(config.protocol.nd_timeout_ms, 2000);
        assert_eq!(config.protocol.stabilize_period_ms, 5000);
        assert_eq!(config.protocol.fix_finger_period_ms, 8000);
        assert_eq!(config.protocol.max_ttl, 16);
        assert_eq!(config.main_addr().expect("main"), Ipv4Addr::new(10, 0, 0, 1));
    }

    #[test]
    fn test_interface_parse_and_broadcast() {
        let iface = Interface::parse("10.0.0.1/24").expect("parse");
        assert_eq!(iface.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        let iface = Interface::parse("192.168.4.7/30").expect("parse");
        assert_eq!(iface.broadcast(), Ipv4Addr::new(192, 168, 4, 7));
        assert!(Interface::parse("10.0.0.1").is_err());
        assert!(Interface::parse("10.0.0.1/40").is_err());
    }

    #[test]
    fn test_main_addr_must_be_local() {
        let bad = SAMPLE.replace("10.0.0.1/24", "10.9.9.9/24");
        let config: NodeConfig = toml::from_str(&bad).expect("parse");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config: NodeConfig = toml::from_str(SAMPLE).expect("parse");
        let rendered = toml::to_string(&config).expect("serialize");
        let _parsed: NodeConfig = toml::from_str(&rendered).expect("reparse");
    }
}
