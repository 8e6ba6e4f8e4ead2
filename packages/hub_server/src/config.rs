use anyhow::{Context, Result};
use realtime_hub::HubConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / hub.toml / env vars)
// =============================================================================
//
//   hub.toml:   [hub]
//               outbound_queue_capacity = 64
//
//   env var:    HUB_HUB__OUTBOUND_QUEUE_CAPACITY=64   (double underscore = nesting)

pub const CONFIG_FILE_NAME: &str = "hub.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
}

/// Listener settings (lives under `[server]` in hub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Hub tunables (lives under `[hub]` in hub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    /// Frames a connection may have queued before it is evicted
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_control_channel_capacity")]
    pub control_channel_capacity: usize,
    /// Grace period for a writer to flush and close after its reader stopped
    #[serde(default = "default_writer_drain_timeout_ms")]
    pub writer_drain_timeout_ms: u64,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            control_channel_capacity: default_control_channel_capacity(),
            writer_drain_timeout_ms: default_writer_drain_timeout_ms(),
        }
    }
}

impl HubFileConfig {
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            control_channel_capacity: self.control_channel_capacity,
            writer_drain_timeout: Duration::from_millis(self.writer_drain_timeout_ms),
        }
    }
}

impl FileConfig {
    /// Apply CLI overrides on top of whatever the file and environment resolved.
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                )
            })
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_outbound_queue_capacity() -> usize {
    256
}
fn default_control_channel_capacity() -> usize {
    1024
}
fn default_writer_drain_timeout_ms() -> u64 {
    5000
}

/// Build a figment that layers: defaults → hub.toml → HUB_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed("HUB_").split("__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let d = FileConfig::default();
        assert_eq!(d.server.host, "127.0.0.1");
        assert_eq!(d.server.port, 8080);
        assert_eq!(d.hub.outbound_queue_capacity, 256);
        assert_eq!(d.hub.control_channel_capacity, 1024);
        assert_eq!(d.hub.writer_drain_timeout_ms, 5000);
    }

    #[test]
    fn test_to_hub_config() {
        let fc = HubFileConfig {
            outbound_queue_capacity: 8,
            control_channel_capacity: 16,
            writer_drain_timeout_ms: 250,
        };
        let hc = fc.to_hub_config();
        assert_eq!(hc.outbound_queue_capacity, 8);
        assert_eq!(hc.control_channel_capacity, 16);
        assert_eq!(hc.writer_drain_timeout, Duration::from_millis(250));
    }

    // ── overrides ───────────────────────────────────────────────────────

    #[test]
    fn test_cli_overrides_win() {
        let fc = FileConfig::default().with_overrides(Some("0.0.0.0".to_string()), Some(9000));
        assert_eq!(fc.listen_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());
    }

    #[test]
    fn test_missing_overrides_keep_file_values() {
        let fc = FileConfig::default().with_overrides(None, None);
        assert_eq!(fc.listen_addr().unwrap(), "127.0.0.1:8080".parse().unwrap());
    }

    #[test]
    fn test_invalid_host_is_an_error() {
        let fc = FileConfig::default().with_overrides(Some("not a host".to_string()), None);
        assert!(fc.listen_addr().is_err());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_without_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.hub.outbound_queue_capacity, 256);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[server]\nport = 9100\n\n[hub]\noutbound_queue_capacity = 32\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.server.port, 9100);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.hub.outbound_queue_capacity, 32);
        assert_eq!(fc.hub.writer_drain_timeout_ms, 5000);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            "[hub]\noutbound_queue_capacity = \"lots\"\n",
        )
        .unwrap();
        assert!(load_config(tmp.path()).extract::<FileConfig>().is_err());
    }
}
