//! ESM Configuration
//!
//! Engine parameters read from the `esm:` section of a YAML configuration
//! file. Every field has a default, so an empty section is valid.
//!
//! ```yaml
//! esm:
//!   max_pdn_connections: 4
//!   default_bearer_ebi: { first: 5, last: 8 }
//!   apn: [internet, ims]
//!   emergency_apn: sos
//!   t3485: { duration_ms: 8000, max_retries: 4 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{apn_is_valid, Ebi};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Default number of PDN connections per UE
pub const DEFAULT_MAX_PDN_CONNECTIONS: u8 = 4;
/// Default retransmission timer value (TS 24.301 Table 10.3.1)
pub const DEFAULT_TIMER_MS: u64 = 8000;
/// Default maximum number of retransmissions (TS 24.301 Table 10.3.1)
pub const DEFAULT_MAX_RETRIES: u32 = 4;

/// Retransmission timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConf {
    /// Timer value in milliseconds
    pub duration_ms: u64,
    /// Retransmissions before the procedure is aborted
    pub max_retries: u32,
}

impl Default for TimerConf {
    fn default() -> Self {
        Self {
            duration_ms: DEFAULT_TIMER_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TimerConf {
    /// Timer value
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Inclusive EBI range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbiRange {
    pub first: u8,
    pub last: u8,
}

impl EbiRange {
    /// Every assignable EBI
    pub const FULL: EbiRange = EbiRange {
        first: Ebi::MIN,
        last: Ebi::MAX,
    };

    /// True if `ebi` lies in the range
    pub fn contains(&self, ebi: Ebi) -> bool {
        (self.first..=self.last).contains(&ebi.0)
    }
}

impl Default for EbiRange {
    fn default() -> Self {
        Self {
            first: Ebi::MIN,
            last: Ebi::MIN + DEFAULT_MAX_PDN_CONNECTIONS - 1,
        }
    }
}

/// ESM engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EsmConfig {
    /// Upper bound (exclusive) of PDN connection ids
    pub max_pdn_connections: u8,
    /// EBIs tried first for default bearers
    pub default_bearer_ebi: EbiRange,
    /// Served APNs; empty accepts any APN
    pub apn: Vec<String>,
    /// APN used for emergency requests that carry none
    pub emergency_apn: Option<String>,
    /// Refuse UE-requested disconnection of the last PDN connection
    pub reject_last_pdn_disconnect: bool,
    /// Bearer context activation timer
    pub t3485: TimerConf,
    /// Bearer context deactivation timer
    pub t3495: TimerConf,
}

impl Default for EsmConfig {
    fn default() -> Self {
        Self {
            max_pdn_connections: DEFAULT_MAX_PDN_CONNECTIONS,
            default_bearer_ebi: EbiRange::default(),
            apn: Vec::new(),
            emergency_apn: None,
            reject_last_pdn_disconnect: false,
            t3485: TimerConf::default(),
            t3495: TimerConf::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    esm: EsmConfig,
}

impl EsmConfig {
    /// Parse the `esm:` section of a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let doc: ConfigDocument = serde_yaml::from_str(yaml)?;
        doc.esm.validate()?;
        Ok(doc.esm)
    }

    /// Read and parse a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Loading ESM configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Check ranges and APN syntax
    pub fn validate(&self) -> Result<(), ConfigError> {
        let range = self.default_bearer_ebi;
        if range.first > range.last || !Ebi(range.first).is_valid() || !Ebi(range.last).is_valid() {
            return Err(ConfigError::ValidationError(format!(
                "default_bearer_ebi {}..={} outside {}..={}",
                range.first,
                range.last,
                Ebi::MIN,
                Ebi::MAX
            )));
        }
        if self.max_pdn_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_pdn_connections must be at least 1".to_string(),
            ));
        }
        if let Some(apn) = self.apn.iter().find(|apn| !apn_is_valid(apn)) {
            return Err(ConfigError::ValidationError(format!("invalid APN '{}'", apn)));
        }
        if let Some(apn) = self.emergency_apn.as_deref() {
            if !apn_is_valid(apn) {
                return Err(ConfigError::ValidationError(format!(
                    "invalid emergency APN '{}'",
                    apn
                )));
            }
        }
        Ok(())
    }

    /// True if the APN is served
    pub fn apn_is_served(&self, apn: &str) -> bool {
        self.apn.is_empty() || self.apn.iter().any(|served| served.eq_ignore_ascii_case(apn))
    }
}
