//! Live subscription configuration.

use fitmarket_proto::DEFAULT_NAMESPACE;

/// Default length of the random suffix in generated channel identifiers.
pub const DEFAULT_CHANNEL_TOKEN_LEN: usize = 10;

/// Shortest suffix accepted for generated channel identifiers.
///
/// Seven base-36 characters give about 7.8e10 combinations.
pub const MIN_CHANNEL_TOKEN_LEN: usize = 7;

/// Draws of a generated channel identifier before `open` gives up.
pub const MAX_CHANNEL_ID_ATTEMPTS: usize = 16;

/// Live subscription configuration.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Namespace used when a request does not name one.
    pub default_namespace: String,

    /// Length of the random suffix in generated channel identifiers.
    pub channel_token_len: usize,

    /// Catch handler panics instead of letting them unwind into the feed.
    pub isolate_handler_faults: bool,
}

impl LiveConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            channel_token_len: DEFAULT_CHANNEL_TOKEN_LEN,
            isolate_handler_faults: true,
        }
    }

    /// Set the default namespace.
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Set the channel token length. Values below the minimum are raised to it.
    pub fn with_channel_token_len(mut self, len: usize) -> Self {
        self.channel_token_len = len.max(MIN_CHANNEL_TOKEN_LEN);
        self
    }

    /// Token length actually used, never below [`MIN_CHANNEL_TOKEN_LEN`].
    pub fn effective_token_len(&self) -> usize {
        self.channel_token_len.max(MIN_CHANNEL_TOKEN_LEN)
    }

    /// Enable or disable handler fault isolation.
    pub fn with_fault_isolation(mut self, enabled: bool) -> Self {
        self.isolate_handler_faults = enabled;
        self
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LiveConfig::default();
        assert_eq!(config.default_namespace, "public");
        assert_eq!(config.channel_token_len, DEFAULT_CHANNEL_TOKEN_LEN);
        assert!(config.isolate_handler_faults);
    }

    #[test]
    fn test_config_builder() {
        let config = LiveConfig::new()
            .with_default_namespace("marketplace")
            .with_channel_token_len(16)
            .with_fault_isolation(false);

        assert_eq!(config.default_namespace, "marketplace");
        assert_eq!(config.channel_token_len, 16);
        assert!(!config.isolate_handler_faults);
    }

    #[test]
    fn test_token_len_floor() {
        let config = LiveConfig::new().with_channel_token_len(3);
        assert_eq!(config.channel_token_len, MIN_CHANNEL_TOKEN_LEN);
    }

    #[test]
    fn test_effective_token_len_ignores_direct_field_writes() {
        let mut config = LiveConfig::new();
        config.channel_token_len = 0;
        assert_eq!(config.effective_token_len(), MIN_CHANNEL_TOKEN_LEN);

        config.channel_token_len = 12;
        assert_eq!(config.effective_token_len(), 12);
    }
}
