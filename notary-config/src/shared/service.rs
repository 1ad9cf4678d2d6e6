use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{PipelineConfig, StoreConfig, ValidationError};

/// Complete configuration of the notary service.
///
/// Typically loaded once at startup with [`crate::load_config`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Pipeline runtime settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Record source and sink storage settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl ServiceConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pipeline.validate()?;
        self.store.validate()
    }
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_covers_nested_sections() {
        let mut config = ServiceConfig::default();
        assert!(config.validate().is_ok());

        config.pipeline.log_frequency = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroValue("pipeline.log_frequency"))
        );
    }
}
