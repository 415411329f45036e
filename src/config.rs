use serde::Deserialize;

use crate::arena::{DEFAULT_ARENA_SIZE, MAX_ARENA_SIZE};
use crate::error::BridgeError;
use crate::handle::MAX_CAPACITY;
use crate::handle_table::{DEFAULT_CAPACITY, MIN_CAPACITY};

pub const DEFAULT_MAX_CALL_DEPTH: u32 = 256;

/// Sizing for one [`Bridge`](crate::Bridge).
///
/// `memory_limit` and `max_stack_size` are applied to every runtime the
/// bridge creates; `None` keeps the engine default.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub handle_capacity: usize,
    pub arena_size: usize,
    pub max_call_depth: u32,
    pub memory_limit: Option<usize>,
    pub max_stack_size: Option<usize>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            handle_capacity: DEFAULT_CAPACITY,
            arena_size: DEFAULT_ARENA_SIZE,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            memory_limit: None,
            max_stack_size: None,
        }
    }
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&self.handle_capacity) {
            return Err(BridgeError::Config(format!(
                "handle_capacity must be in {MIN_CAPACITY}..={MAX_CAPACITY}, got {}",
                self.handle_capacity
            )));
        }
        if self.arena_size == 0 || self.arena_size > MAX_ARENA_SIZE {
            return Err(BridgeError::Config(format!(
                "arena_size must be in 1..={MAX_ARENA_SIZE}, got {}",
                self.arena_size
            )));
        }
        if self.max_call_depth == 0 {
            return Err(BridgeError::Config("max_call_depth must be nonzero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.handle_capacity, 65536);
        assert_eq!(config.arena_size, 4 << 20);
    }

    #[test]
    fn rejects_out_of_range_capacity() {
        let config = BridgeConfig {
            handle_capacity: 1,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let config = BridgeConfig {
            handle_capacity: MAX_CAPACITY + 1,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_depth_and_empty_arena() {
        let config = BridgeConfig {
            max_call_depth: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
        let config = BridgeConfig {
            arena_size: 0,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{ "handle_capacity": 1024, "memory_limit": 1048576 }"#)
                .unwrap();
        assert_eq!(config.handle_capacity, 1024);
        assert_eq!(config.memory_limit, Some(1 << 20));
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_str::<BridgeConfig>(r#"{ "heap": 1 }"#);
        assert!(parsed.is_err());
    }
}
