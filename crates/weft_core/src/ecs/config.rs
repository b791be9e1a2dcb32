// config.rs - World construction parameters

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse world config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{field} must be at least {min}")]
    OutOfRange { field: &'static str, min: usize },
}

/// Tuning knobs for a [`World`](crate::ecs::World). Every field has a
/// default, so a partial JSON object is a valid config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Entities to reserve index space for up front.
    pub entity_capacity: usize,
    /// Initial rows per column of a new table.
    pub table_capacity: usize,
    /// Command stages, one per worker thread. Stage 0 is the main thread.
    pub stage_count: usize,
    /// Reclaim empty tables at merge points.
    pub delete_empty_tables: bool,
    /// Merge points a table must stay empty before it is reclaimed.
    pub empty_table_grace_merges: u32,
    /// Freed entity ids lent to each stage before parallel iteration.
    pub stage_recycled_ids: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            entity_capacity: 1024,
            table_capacity: 16,
            stage_count: 1,
            delete_empty_tables: false,
            empty_table_grace_merges: 1,
            stage_recycled_ids: 256,
        }
    }
}

impl WorldConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "stage_count",
                min: 1,
            });
        }
        Ok(())
    }

    /// One stage per rayon worker.
    pub fn with_worker_stages(mut self) -> Self {
        self.stage_count = rayon::current_num_threads().max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config = WorldConfig::from_json(r#"{ "stage_count": 4 }"#).unwrap();
        assert_eq!(config.stage_count, 4);
        assert_eq!(config.table_capacity, WorldConfig::default().table_capacity);
        assert!(!config.delete_empty_tables);
    }

    #[test]
    fn zero_stages_rejected() {
        let err = WorldConfig::from_json(r#"{ "stage_count": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "stage_count", .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(WorldConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
