//! Transport configuration
//!
//! Loaded from TOML, every field optional:
//!
//! ```toml
//! protocol_version = 1
//! ac_wake_timeout_ms = 2000
//!
//! [fifo]
//! ac_common = 131072
//! ca_audio = 8192
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::frame::HEADER_LEN;
use crate::layout::invalid;
use crate::Result;

/// Byte sizes of the four FIFOs in the shared segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoSizes {
    pub ac_common: usize,
    pub ac_audio: usize,
    pub ca_common: usize,
    pub ca_audio: usize,
}

impl Default for FifoSizes {
    fn default() -> Self {
        Self {
            ac_common: 128 * 1024,
            ac_audio: 8 * 1024,
            ca_common: 128 * 1024,
            ca_audio: 8 * 1024,
        }
    }
}

impl FifoSizes {
    /// Smallest FIFO that can carry a one-byte message
    pub const MIN: usize = HEADER_LEN + 2;

    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("ac_common", self.ac_common),
            ("ac_audio", self.ac_audio),
            ("ca_common", self.ca_common),
            ("ca_audio", self.ca_audio),
        ] {
            if size < Self::MIN {
                return Err(invalid(format!(
                    "fifo.{name} = {size} is below the minimum of {} bytes",
                    Self::MIN
                )));
            }
            if size > u32::MAX as usize {
                return Err(invalid(format!(
                    "fifo.{name} = {size} does not fit a 32-bit pointer"
                )));
            }
        }
        Ok(())
    }
}

/// SHRM transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShrmConfig {
    /// Highest protocol version the AP speaks
    pub protocol_version: u8,
    /// Oldest modem protocol version the AP accepts
    pub min_modem_version: u8,
    /// Config bits the AP accepts from the modem's boot request
    pub boot_config_mask: u8,
    /// Receive staging bytes per logical channel
    pub rx_queue_capacity: usize,
    /// Bounded depth of every worker queue
    pub worker_queue_depth: usize,
    pub ac_wake_timeout_ms: u64,
    pub ac_sleep_idle_ms: u64,
    pub wake_lock_release_ms: u64,
    pub fifo: FifoSizes,
}

impl Default for ShrmConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            min_modem_version: 1,
            boot_config_mask: 0xFF,
            rx_queue_capacity: 64 * 1024,
            worker_queue_depth: 64,
            ac_wake_timeout_ms: 2000,
            ac_sleep_idle_ms: 200,
            wake_lock_release_ms: 500,
            fifo: FifoSizes::default(),
        }
    }
}

impl ShrmConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ShrmConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.fifo.validate()?;

        if self.min_modem_version > self.protocol_version {
            return Err(invalid(format!(
                "min_modem_version {} is newer than protocol_version {}",
                self.min_modem_version, self.protocol_version
            )));
        }
        if self.rx_queue_capacity == 0 {
            return Err(invalid("rx_queue_capacity must be non-zero"));
        }
        // Room for one of each coalesced channel work item
        if self.worker_queue_depth < 3 {
            return Err(invalid(format!(
                "worker_queue_depth {} is below the minimum of 3",
                self.worker_queue_depth
            )));
        }
        if self.ac_wake_timeout_ms == 0 {
            return Err(invalid("ac_wake_timeout_ms must be non-zero"));
        }
        Ok(())
    }

    pub fn ac_wake_timeout(&self) -> Duration {
        Duration::from_millis(self.ac_wake_timeout_ms)
    }

    pub fn ac_sleep_idle(&self) -> Duration {
        Duration::from_millis(self.ac_sleep_idle_ms)
    }

    pub fn wake_lock_release(&self) -> Duration {
        Duration::from_millis(self.wake_lock_release_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ShrmError;

    #[test]
    fn test_default_config_is_valid() {
        let config = ShrmConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fifo.ac_common, 128 * 1024);
        assert_eq!(config.ac_wake_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ShrmConfig::from_toml_str(
            r#"
            protocol_version = 3
            ac_sleep_idle_ms = 50

            [fifo]
            ca_audio = 4096
            "#,
        )
        .unwrap();

        assert_eq!(config.protocol_version, 3);
        assert_eq!(config.ac_sleep_idle(), Duration::from_millis(50));
        assert_eq!(config.fifo.ca_audio, 4096);
        assert_eq!(config.fifo.ac_common, 128 * 1024);
        assert_eq!(config.worker_queue_depth, 64);
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = ShrmConfig::from_toml_str("[fifo]\nac_audio = 3\n").unwrap_err();
        assert!(matches!(err, ShrmError::InvalidConfig(_)));

        let err = ShrmConfig::from_toml_str("protocol_version = 1\nmin_modem_version = 2\n")
            .unwrap_err();
        assert!(matches!(err, ShrmError::InvalidConfig(_)));

        let err = ShrmConfig::from_toml_str("worker_queue_depth = 0\n").unwrap_err();
        assert!(matches!(err, ShrmError::InvalidConfig(_)));

        let err = ShrmConfig::from_toml_str("worker_queue_depth = 2\n").unwrap_err();
        assert!(matches!(err, ShrmError::InvalidConfig(_)));
        assert!(ShrmConfig::from_toml_str("worker_queue_depth = 3\n").is_ok());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = ShrmConfig::from_toml_str("protocol_version = \"one\"").unwrap_err();
        assert!(matches!(err, ShrmError::ConfigParse(_)));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = ShrmConfig::default();
        config.boot_config_mask = 0x0F;
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ShrmConfig::from_toml_str(&text).unwrap(), config);
    }
}
