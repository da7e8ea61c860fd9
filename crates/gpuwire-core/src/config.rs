use gpuwire_ipc::{TransportError, TransportLimits};
use thiserror::Error;

pub const ENV_MAX_MESSAGE_BYTES: &str = "GPUWIRE_MAX_MESSAGE_BYTES";
pub const ENV_CHUNK_SIZE: &str = "GPUWIRE_CHUNK_SIZE";
pub const ENV_MAX_OBJECTS_PER_TYPE: &str = "GPUWIRE_MAX_OBJECTS_PER_TYPE";

pub const DEFAULT_MAX_OBJECTS_PER_TYPE: u32 = 1 << 20;

/// Limits shared by both endpoints of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    /// Largest message the transport reassembles, and the largest single
    /// record either runtime will serialize.
    pub max_message_bytes: usize,
    pub chunk_size: usize,
    /// Highest object index (exclusive) the server adopts for any one type.
    pub max_objects_per_type: u32,
}

impl Default for WireConfig {
    fn default() -> Self {
        let transport = TransportLimits::default();
        Self {
            max_message_bytes: transport.max_message_bytes,
            chunk_size: transport.chunk_size,
            max_objects_per_type: DEFAULT_MAX_OBJECTS_PER_TYPE,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("max_objects_per_type must be non-zero")]
    NoObjects,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl WireConfig {
    /// Defaults overridden by `GPUWIRE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`WireConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            var: &'static str,
            default: T,
        ) -> Result<T, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
            }
        }

        let defaults = Self::default();
        let config = Self {
            max_message_bytes: parse(&lookup, ENV_MAX_MESSAGE_BYTES, defaults.max_message_bytes)?,
            chunk_size: parse(&lookup, ENV_CHUNK_SIZE, defaults.chunk_size)?,
            max_objects_per_type: parse(&lookup, ENV_MAX_OBJECTS_PER_TYPE, defaults.max_objects_per_type)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_objects_per_type == 0 {
            return Err(ConfigError::NoObjects);
        }
        self.transport_limits().validate()?;
        Ok(())
    }

    pub fn transport_limits(&self) -> TransportLimits {
        TransportLimits {
            max_message_bytes: self.max_message_bytes,
            chunk_size: self.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| vars.get(k).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        WireConfig::default().validate().unwrap();
        assert_eq!(WireConfig::from_lookup(lookup(&[])).unwrap(), WireConfig::default());
    }

    #[test]
    fn env_overrides() {
        let config = WireConfig::from_lookup(lookup(&[
            (ENV_MAX_MESSAGE_BYTES, "1048576"),
            (ENV_CHUNK_SIZE, " 4096 "),
            (ENV_MAX_OBJECTS_PER_TYPE, "64"),
        ]))
        .unwrap();
        assert_eq!(
            config,
            WireConfig {
                max_message_bytes: 1 << 20,
                chunk_size: 4096,
                max_objects_per_type: 64,
            }
        );
    }

    #[test]
    fn rejects_garbage_and_inconsistent_limits() {
        let err = WireConfig::from_lookup(lookup(&[(ENV_CHUNK_SIZE, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var: ENV_CHUNK_SIZE, .. }));

        let err = WireConfig::from_lookup(lookup(&[(ENV_MAX_MESSAGE_BYTES, "16")])).unwrap_err();
        assert!(matches!(err, ConfigError::Transport(_)));

        let err = WireConfig::from_lookup(lookup(&[(ENV_MAX_OBJECTS_PER_TYPE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoObjects));
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn message_limit_must_fit_a_record_size_field() {
        let at_limit = WireConfig {
            max_message_bytes: u32::MAX as usize,
            ..WireConfig::default()
        };
        at_limit.validate().unwrap();

        let over = WireConfig {
            max_message_bytes: u32::MAX as usize + 1,
            ..WireConfig::default()
        };
        assert!(matches!(
            over.validate(),
            Err(ConfigError::Transport(TransportError::InvalidLimits { .. }))
        ));
    }
}
