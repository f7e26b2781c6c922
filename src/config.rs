//! Configuration for script-consensus
//!
//! Values that callers thread explicitly into transactions, the verifier and
//! the interpreter. Missing fields take their defaults, so a partial JSON
//! document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FEE_PER_KB, DEFAULT_MAX_ELEMENT_SIZE};
use crate::error::{ConsensusError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Minimum fee rate in satoshis per 1000 bytes, used by new transactions
    /// and by the verifier's priority check
    /// Default: 50
    #[serde(default = "default_fee_per_kb")]
    pub fee_per_kb: u64,

    /// Record a stack snapshot per chunk during evaluation
    /// Default: false
    #[serde(default)]
    pub trace: bool,

    /// Largest stack item `OP_CAT`, `OP_NUM2BIN` or `OP_MUL` may build;
    /// larger results fail the script
    /// Default: 32 MiB
    #[serde(default = "default_max_element_size")]
    pub max_element_size: usize,
}

fn default_fee_per_kb() -> u64 {
    DEFAULT_FEE_PER_KB
}

fn default_max_element_size() -> usize {
    DEFAULT_MAX_ELEMENT_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fee_per_kb: DEFAULT_FEE_PER_KB,
            trace: false,
            max_element_size: DEFAULT_MAX_ELEMENT_SIZE,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ConsensusError::InvalidConfig(e.to_string().into()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConsensusError::InvalidConfig(e.to_string().into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fee_per_kb, 50);
        assert!(!config.trace);
        assert_eq!(config.max_element_size, DEFAULT_MAX_ELEMENT_SIZE);
        assert_eq!(Config::from_json("{}").unwrap(), config);
    }

    #[test]
    fn test_partial_json() {
        let config = Config::from_json(r#"{"trace": true}"#).unwrap();
        assert_eq!(config.fee_per_kb, DEFAULT_FEE_PER_KB);
        assert!(config.trace);

        let config = Config::from_json(r#"{"fee_per_kb": 1000}"#).unwrap();
        assert_eq!(config.fee_per_kb, 1000);

        let config = Config::from_json(r#"{"max_element_size": 520}"#).unwrap();
        assert_eq!(config.max_element_size, 520);
        assert_eq!(config.fee_per_kb, DEFAULT_FEE_PER_KB);
    }

    #[test]
    fn test_json_round_trip() {
        let config = Config {
            fee_per_kb: 7,
            trace: true,
            max_element_size: 1024,
        };
        assert_eq!(Config::from_json(&config.to_json().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_bad_json() {
        assert!(Config::from_json("{\"fee_per_kb\": -1}").is_err());
        assert!(Config::from_json("not json").is_err());
    }
}
