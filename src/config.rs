//! Channel-layer settings.
//!
//! Channel names are addressed under a configurable record prefix and every
//! externally callable operation takes an explicit timeout; the defaults for
//! those timeouts live here. Settings are a plain struct threaded through
//! constructors — there is no ambient global registry — and can be loaded
//! from a TOML file via the `config` crate.
//!
//! ```toml
//! top = "tc1:"
//! telltale = "sad:health"
//! connect_timeout = "5s"
//! request_timeout = "5s"
//! apply_timeout = "60s"
//! poll_interval = "250ms"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EpicsResult;

/// Settings for one telescope-control channel group.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EpicsConfig {
    /// Record-name prefix every channel name is resolved under.
    pub top: String,

    /// Telltale channel name, relative to `top`.
    pub telltale: String,

    /// Bound on a single channel connect attempt.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Default bound on verified reads and writes.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Bound on a full apply/trigger cycle including completion polling.
    #[serde(with = "humantime_serde")]
    pub apply_timeout: Duration,

    /// Interval between completion-record polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for EpicsConfig {
    fn default() -> Self {
        Self {
            top: "tcs:".to_string(),
            telltale: "sad:health".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
            apply_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl EpicsConfig {
    /// Load settings from a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> EpicsResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).format(config::FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Full network name of a channel relative to the configured prefix.
    pub fn channel_name(&self, name: &str) -> String {
        format!("{}{}", self.top, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EpicsConfig::default();
        assert_eq!(cfg.channel_name("rotMove.A"), "tcs:rotMove.A");
        assert!(cfg.poll_interval < cfg.apply_timeout);
    }

    #[test]
    fn loads_from_toml_with_partial_overrides() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"
top = "tc1:"
apply_timeout = "90s"
poll_interval = "100ms"
"#,
        )
        .unwrap();

        let cfg = EpicsConfig::from_path(file.path()).unwrap();
        assert_eq!(cfg.top, "tc1:");
        assert_eq!(cfg.apply_timeout, Duration::from_secs(90));
        assert_eq!(cfg.poll_interval, Duration::from_millis(100));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.telltale, "sad:health");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(5));
    }
}
