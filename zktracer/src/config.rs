use serde::{Deserialize, Serialize};
use zktracer_common::{CALL_DEPTH_LIMIT, MAX_CODE_SIZE, MAX_INIT_CODE_SIZE, STACK_LIMIT};

/// Chain and platform parameters the tracer checks executions against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    pub chain_id: u64,
    /// Maximum size of code returned by a deployment.
    pub max_code_size: usize,
    /// Maximum size of the init code of a deployment.
    pub max_init_code_size: usize,
    /// Whether transactions carrying an access list go through the
    /// pre-warming phase.
    pub prewarming: bool,
    pub stack_limit: usize,
    pub call_depth_limit: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            max_code_size: MAX_CODE_SIZE,
            max_init_code_size: MAX_INIT_CODE_SIZE,
            prewarming: true,
            stack_limit: STACK_LIMIT,
            call_depth_limit: CALL_DEPTH_LIMIT,
        }
    }
}

impl TracerConfig {
    /// Parses a configuration from JSON. Missing fields take their default
    /// value.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = TracerConfig::from_json(r#"{ "chain_id": 59144, "prewarming": false }"#)
            .expect("valid config");
        assert_eq!(config.chain_id, 59144);
        assert!(!config.prewarming);
        assert_eq!(config.max_code_size, 24576);
        assert_eq!(config.max_init_code_size, 49152);
    }

    #[test]
    fn roundtrips_through_json() {
        let config = TracerConfig {
            max_code_size: 100,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(TracerConfig::from_json(&json).unwrap(), config);
    }
}
