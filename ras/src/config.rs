use serde::{Deserialize, Serialize};

use crate::emitter::DEFAULT_LISTENER_CAPACITY;
use crate::error::{Error, Result};

/// Default number of requests the admission queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Limits of one storage context.
///
/// Missing fields take their defaults, so `{}` is a valid document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub queue_capacity: usize,
    pub listener_capacity: usize,
}

impl StorageConfig {
    /// # Errors
    ///
    /// `InvalidConfig` if either capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig("queue_capacity must be > 0".into()));
        }
        if self.listener_capacity == 0 {
            return Err(Error::InvalidConfig(
                "listener_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            listener_capacity: DEFAULT_LISTENER_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.queue_capacity, 512);
        assert_eq!(config.listener_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: StorageConfig = serde_json::from_str(r#"{"queue_capacity": 8}"#).unwrap();
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.listener_capacity, 64);
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let config = StorageConfig {
            queue_capacity: 0,
            ..StorageConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
