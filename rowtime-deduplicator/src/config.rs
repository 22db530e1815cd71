use std::time::Duration;

use envconfig::Envconfig;

use crate::error::DeduplicationError;
use crate::partition::PartitionWorkerConfig;
use crate::pipelines::{DeduplicationPolicy, KeySelector};

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // Deduplication policy
    #[envconfig(default = "true")]
    pub keep_last: bool,

    #[envconfig(default = "true")]
    pub generate_insert: bool,

    #[envconfig(default = "true")]
    pub generate_update_before: bool,

    #[envconfig(default = "1")]
    pub event_time_field_index: usize,

    // Record schema: number of fields every record is declared to carry
    #[envconfig(default = "3")]
    pub field_count: usize,

    // Comma-separated field positions forming the deduplication key
    #[envconfig(default = "0")]
    pub key_field_indices: String,

    // Runtime configuration
    #[envconfig(default = "4")]
    pub partition_count: u32,

    #[envconfig(default = "1000")]
    pub channel_buffer_size: usize,

    #[envconfig(default = "10000")]
    pub max_active_keys: usize,

    #[envconfig(default = "100000")]
    pub max_parked_candidates: usize,

    // In-memory state backend
    #[envconfig(default = "0")]
    pub state_read_latency_ms: u64,

    #[envconfig(default = "0")]
    pub state_write_latency_ms: u64,

    // Observability
    #[envconfig(default = "false")]
    pub metrics_enabled: bool,

    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "9102")]
    pub port: u16,

    #[envconfig(default = "false")]
    pub log_json: bool,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Get metrics server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn state_read_latency(&self) -> Duration {
        Duration::from_millis(self.state_read_latency_ms)
    }

    pub fn state_write_latency(&self) -> Duration {
        Duration::from_millis(self.state_write_latency_ms)
    }

    /// Build the deduplication policy, validated against the declared schema
    pub fn to_policy(&self) -> Result<DeduplicationPolicy, DeduplicationError> {
        let policy = if self.keep_last {
            DeduplicationPolicy::keep_last_row(self.event_time_field_index)
        } else {
            DeduplicationPolicy::keep_first_row(self.event_time_field_index)
        }
        .with_emit_insert_on_first(self.generate_insert)
        .with_emit_update_before(self.generate_update_before);

        policy.validate(self.field_count)?;
        Ok(policy)
    }

    /// Build the key selector, validated against the declared schema
    pub fn key_selector(&self) -> Result<KeySelector, DeduplicationError> {
        let indices = self
            .key_field_indices
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<usize>().map_err(|e| {
                    DeduplicationError::configuration(format!(
                        "invalid key field index '{s}': {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        KeySelector::new(indices, self.field_count)
    }

    pub fn to_worker_config(&self) -> PartitionWorkerConfig {
        PartitionWorkerConfig {
            channel_buffer_size: self.channel_buffer_size,
            max_active_keys: self.max_active_keys,
            max_parked_candidates: self.max_parked_candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::init_from_hashmap(&env).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]);

        let policy = config.to_policy().unwrap();
        assert_eq!(policy, DeduplicationPolicy::keep_last_row(1));
        assert_eq!(config.key_selector().unwrap().indices(), &[0]);
        assert_eq!(config.partition_count, 4);
        assert_eq!(config.to_worker_config().channel_buffer_size, 1000);
        assert_eq!(config.to_worker_config().max_parked_candidates, 100_000);
        assert!(!config.metrics_enabled);
        assert_eq!(config.bind_address(), "0.0.0.0:9102");
    }

    #[test]
    fn test_policy_flags_from_env() {
        let config = load(&[
            ("KEEP_LAST", "false"),
            ("GENERATE_INSERT", "false"),
            ("GENERATE_UPDATE_BEFORE", "false"),
            ("EVENT_TIME_FIELD_INDEX", "2"),
        ]);

        let policy = config.to_policy().unwrap();
        assert!(!policy.keep_last);
        assert!(!policy.emit_insert_on_first);
        assert!(!policy.emit_update_before);
        assert_eq!(policy.event_time_field_index, 2);
    }

    #[test]
    fn test_worker_limits_from_env() {
        let config = load(&[("MAX_ACTIVE_KEYS", "8"), ("MAX_PARKED_CANDIDATES", "32")]);

        let worker_config = config.to_worker_config();
        assert_eq!(worker_config.max_active_keys, 8);
        assert_eq!(worker_config.max_parked_candidates, 32);
    }

    #[test]
    fn test_event_time_index_beyond_schema_is_rejected() {
        let config = load(&[("EVENT_TIME_FIELD_INDEX", "5"), ("FIELD_COUNT", "3")]);

        assert!(matches!(
            config.to_policy(),
            Err(DeduplicationError::Configuration(_))
        ));
    }

    #[test]
    fn test_key_field_indices_parsing() {
        let config = load(&[("KEY_FIELD_INDICES", " 0, 2 ")]);
        assert_eq!(config.key_selector().unwrap().indices(), &[0, 2]);

        let config = load(&[("KEY_FIELD_INDICES", "0,x")]);
        let err = config.key_selector().unwrap_err();
        assert!(err.to_string().contains("invalid key field index"));

        let config = load(&[("KEY_FIELD_INDICES", "0,3"), ("FIELD_COUNT", "3")]);
        assert!(config.key_selector().is_err());
    }
}
