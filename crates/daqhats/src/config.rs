//! Library configuration using Figment.
//!
//! Settings are loaded from:
//! 1. `daqhats.toml` (optional base file)
//! 2. Environment variables prefixed with `DAQHATS_`, nested with `__`
//!
//! Every field has a default, so an empty or missing file gives the stock
//! behaviour.
//!
//! # Example
//! ```no_run
//! use daqhats::config::HatConfig;
//!
//! // DAQHATS_BUS__LOCK_TIMEOUT_MS=2000 overrides the file
//! let config = HatConfig::load()?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HatError, Result};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "daqhats.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HatConfig {
    /// Bus locking
    pub bus: BusConfig,
    /// Scan engine timing
    pub scan: ScanConfig,
    /// MCC 134 cold-junction sampling
    pub cjc: CjcConfig,
    /// Interrupt line
    pub interrupt: InterruptConfig,
}

/// Bus lock settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Directory holding the advisory lock files
    pub lock_dir: PathBuf,
    /// Maximum wait for a bus or board lock, in milliseconds
    pub lock_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("/tmp"),
            lock_timeout_ms: 5000,
        }
    }
}

/// Scan engine timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Lower bound on the wait for a started scan to report running, in milliseconds
    pub start_timeout_min_ms: u64,
    /// Upper bound on the acquisition thread's idle poll sleep, in microseconds
    pub poll_interval_max_us: u64,
    /// Lower bound on the acquisition thread's idle poll sleep, in microseconds
    pub poll_interval_min_us: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            start_timeout_min_ms: 1000,
            poll_interval_max_us: 10_000,
            poll_interval_min_us: 200,
        }
    }
}

/// Cold-junction compensation sampling for the MCC 134.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CjcConfig {
    /// Delay before the first sensor read, in milliseconds
    pub startup_ms: u64,
    /// Interval between sensor reads, in milliseconds
    pub interval_ms: u64,
    /// Number of readings in the moving average
    pub average_count: usize,
    /// How long a temperature read waits for the first CJC value, in milliseconds
    pub ready_timeout_ms: u64,
}

impl Default for CjcConfig {
    fn default() -> Self {
        Self {
            startup_ms: 250,
            interval_ms: 1000,
            average_count: 120,
            ready_timeout_ms: 2000,
        }
    }
}

/// Shared interrupt line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterruptConfig {
    /// sysfs GPIO root
    pub sysfs_root: PathBuf,
    /// BCM pin number of the interrupt line
    pub pin: u32,
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/class/gpio"),
            pin: 21,
        }
    }
}

impl HatConfig {
    /// Load configuration from `daqhats.toml` and environment variables.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults fill the gaps.
    pub fn load_from<P: AsRef<Path>>(path: P) -> std::result::Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(HatConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DAQHATS_").split("__"))
            .extract()
    }

    /// Render as TOML, e.g. to seed a config file.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| HatError::undefined(format!("config serialization failed: {e}")))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        if self.bus.lock_timeout_ms == 0 {
            return Err(HatError::bad_parameter("bus.lock_timeout_ms must be > 0"));
        }

        if self.scan.poll_interval_min_us == 0
            || self.scan.poll_interval_min_us > self.scan.poll_interval_max_us
        {
            return Err(HatError::bad_parameter(format!(
                "scan poll interval bounds invalid: min {} us, max {} us",
                self.scan.poll_interval_min_us, self.scan.poll_interval_max_us
            )));
        }

        if self.cjc.average_count == 0 {
            return Err(HatError::bad_parameter("cjc.average_count must be > 0"));
        }

        if self.cjc.interval_ms == 0 {
            return Err(HatError::bad_parameter("cjc.interval_ms must be > 0"));
        }

        Ok(())
    }
}

impl BusConfig {
    /// Lock wait as a `Duration`.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl ScanConfig {
    /// Minimum start timeout as a `Duration`.
    pub fn start_timeout_min(&self) -> Duration {
        Duration::from_millis(self.start_timeout_min_ms)
    }

    /// Poll interval for an aggregate sample rate, clamped to the configured bounds.
    ///
    /// Aim for roughly 64 samples per poll.
    pub fn poll_interval(&self, aggregate_rate: f64) -> Duration {
        let min = self.poll_interval_min_us as f64;
        let max = self.poll_interval_max_us as f64;
        let us = if aggregate_rate > 0.0 && aggregate_rate.is_finite() {
            (64.0e6 / aggregate_rate).max(min).min(max)
        } else {
            max
        };
        Duration::from_micros(us as u64)
    }
}

impl CjcConfig {
    /// Startup delay as a `Duration`.
    pub fn startup(&self) -> Duration {
        Duration::from_millis(self.startup_ms)
    }

    /// Read interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// First-value wait as a `Duration`.
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = HatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.cjc.average_count, 120);
    }

    #[test]
    #[serial]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = HatConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.bus, BusConfig::default());
    }

    #[test]
    #[serial]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daqhats.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[bus]\nlock_timeout_ms = 250\n[cjc]\ninterval_ms = 50").unwrap();

        let config = HatConfig::load_from(&path).unwrap();
        assert_eq!(config.bus.lock_timeout_ms, 250);
        assert_eq!(config.bus.lock_dir, PathBuf::from("/tmp"));
        assert_eq!(config.cjc.interval_ms, 50);
        assert_eq!(config.cjc.average_count, 120);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daqhats.toml");
        std::fs::write(&path, "[bus]\nlock_timeout_ms = 250\n").unwrap();

        std::env::set_var("DAQHATS_BUS__LOCK_TIMEOUT_MS", "750");
        std::env::set_var("DAQHATS_INTERRUPT__PIN", "20");
        let config = HatConfig::load_from(&path);
        std::env::remove_var("DAQHATS_BUS__LOCK_TIMEOUT_MS");
        std::env::remove_var("DAQHATS_INTERRUPT__PIN");

        let config = config.unwrap();
        assert_eq!(config.bus.lock_timeout_ms, 750);
        assert_eq!(config.interrupt.pin, 20);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = HatConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: HatConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_invalid_poll_bounds() {
        let mut config = HatConfig::default();
        config.scan.poll_interval_min_us = 20_000;
        assert!(config.validate().unwrap_err().is_bad_parameter());
    }

    #[test]
    fn test_poll_interval_clamped() {
        let scan = ScanConfig::default();
        assert_eq!(scan.poll_interval(100_000.0), Duration::from_micros(640));
        assert_eq!(scan.poll_interval(1.0), Duration::from_millis(10));
        assert_eq!(scan.poll_interval(1.0e9), Duration::from_micros(200));
        assert_eq!(scan.poll_interval(0.0), Duration::from_millis(10));
    }
}
