//! Load node configuration from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Node configuration. File: ~/.config/lanlink/config.toml or
/// /etc/lanlink/config.toml. Env overrides: LANLINK_STATION, LANLINK_PEER,
/// LANLINK_BIND, LANLINK_DEST, LANLINK_DOWNLOAD_DIR, LANLINK_TOPOLOGY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// This station's link address (default 02-00-00-00-00-01).
    #[serde(default = "default_station")]
    pub station: String,
    /// Peer link address; the broadcast address reaches every station.
    #[serde(default = "default_peer")]
    pub peer: String,
    /// UDP socket bind address for the raw-frame driver.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// UDP destination the driver puts frames on.
    #[serde(default = "default_dest")]
    pub dest: String,
    /// Where accepted incoming files are stored.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Topology expression wiring the stack at startup.
    #[serde(default = "default_topology")]
    pub topology: String,
}

fn default_station() -> String {
    "02-00-00-00-00-01".to_owned()
}
fn default_peer() -> String {
    "FF-FF-FF-FF-FF-FF".to_owned()
}
fn default_bind() -> String {
    "0.0.0.0:45800".to_owned()
}
fn default_dest() -> String {
    "255.255.255.255:45800".to_owned()
}
fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_topology() -> String {
    "nic ( *eth ( *chat *file ) )".to_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station: default_station(),
            peer: default_peer(),
            bind: default_bind(),
            dest: default_dest(),
            download_dir: default_download_dir(),
            topology: default_topology(),
        }
    }
}

/// Load config: default, then config file (if present), then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = load_file(explicit).unwrap_or_default();
    if let Ok(s) = std::env::var("LANLINK_STATION") {
        c.station = s;
    }
    if let Ok(s) = std::env::var("LANLINK_PEER") {
        c.peer = s;
    }
    if let Ok(s) = std::env::var("LANLINK_BIND") {
        c.bind = s;
    }
    if let Ok(s) = std::env::var("LANLINK_DEST") {
        c.dest = s;
    }
    if let Ok(s) = std::env::var("LANLINK_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(s);
    }
    if let Ok(s) = std::env::var("LANLINK_TOPOLOGY") {
        c.topology = s;
    }
    c
}

fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(p) = explicit {
        return vec![p.to_path_buf()];
    }
    let mut out = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(home.join(".config/lanlink/config.toml"));
    }
    out.push(PathBuf::from("/etc/lanlink/config.toml"));
    out
}

fn load_file(explicit: Option<&Path>) -> Option<Config> {
    for p in config_paths(explicit) {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => log::warn!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => log::warn!("unable to read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}
