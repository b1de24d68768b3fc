use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / relay.toml / env vars)
// =============================================================================
//
//   relay.toml:      [relay]
//                    send_timeout_ms = 2000
//
//   env var:         RELAY_RELAY__SEND_TIMEOUT_MS=2000   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
}

/// Listener settings (lives under `[server]` in relay.toml).
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

/// Per-connection relay tunables (lives under `[relay]` in relay.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
            send_timeout_ms: default_send_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_send_channel_capacity() -> usize {
    100
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}

/// Build a figment that layers: defaults → relay.toml → RELAY_* env vars.
///
/// A missing file is not an error; its layer is simply empty.
///
/// Env vars use double-underscore for nesting into sections:
///   `RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RELAY_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Settings applied to every participant connection.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Frames queued per connection before senders start waiting
    pub send_channel_capacity: usize,
    /// How long a send may wait on a slow reader before it is dropped
    pub send_timeout: Duration,
    /// Largest inbound WebSocket message accepted
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Self {
        Self {
            send_channel_capacity: fc.send_channel_capacity.max(1),
            send_timeout: Duration::from_millis(fc.send_timeout_ms.max(1)),
            max_frame_bytes: fc.max_frame_bytes,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&RelayFileConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_server_file_config_defaults() {
        let d = ServerFileConfig::default();
        assert_eq!(d.host, "127.0.0.1");
        assert_eq!(d.port, 8000);
    }

    #[test]
    fn test_relay_file_config_defaults() {
        let d = RelayFileConfig::default();
        assert_eq!(d.send_channel_capacity, 100);
        assert_eq!(d.send_timeout_ms, 5000);
        assert_eq!(d.max_frame_bytes, 64 * 1024);
    }

    // ── RelayConfig::from_file ──────────────────────────────────────────

    #[test]
    fn test_relay_config_from_file() {
        let rc = RelayConfig::from_file(&RelayFileConfig::default());
        assert_eq!(rc.send_channel_capacity, 100);
        assert_eq!(rc.send_timeout, Duration::from_secs(5));
        assert_eq!(rc.max_frame_bytes, 65536);
    }

    #[test]
    fn test_relay_config_clamps_zero_values() {
        let fc = RelayFileConfig {
            send_channel_capacity: 0,
            send_timeout_ms: 0,
            ..Default::default()
        };
        let rc = RelayConfig::from_file(&fc);
        assert_eq!(rc.send_channel_capacity, 1);
        assert_eq!(rc.send_timeout, Duration::from_millis(1));
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(&tmp.path().join("relay.toml"))
            .extract()
            .unwrap();
        assert_eq!(fc.server.port, 8000);
        assert_eq!(fc.relay.send_channel_capacity, 100);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(
            &path,
            "[server]\nhost = \"0.0.0.0\"\nport = 9100\n\n[relay]\nsend_timeout_ms = 250\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(&path).extract().unwrap();
        assert_eq!(fc.server.host, "0.0.0.0");
        assert_eq!(fc.server.port, 9100);
        assert_eq!(fc.relay.send_timeout_ms, 250);
        // Untouched keys keep their defaults
        assert_eq!(fc.relay.max_frame_bytes, 64 * 1024);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("relay.toml");
        std::fs::write(&path, "[server]\nport = \"not a port\"\n").unwrap();
        assert!(load_config(&path).extract::<FileConfig>().is_err());
    }
}
