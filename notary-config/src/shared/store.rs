use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Storage configuration for the SQLite record source and sink.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// Path of the SQLite database holding the `messages` table.
    #[serde(default = "default_source_path")]
    pub source_path: String,
    /// Path of the SQLite database holding the `signed` table.
    #[serde(default = "default_sink_path")]
    pub sink_path: String,
    /// Drops and recreates the `signed` table on startup.
    #[serde(default = "default_reset_sink")]
    pub reset_sink: bool,
    /// Number of synthetic records generated when the source table is empty.
    #[serde(default = "default_populate_count")]
    pub populate_count: usize,
    /// Upper bound on the random bytes behind a generated message.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Number of rows fetched from the source per query.
    #[serde(default = "default_read_page_size")]
    pub read_page_size: usize,
}

impl StoreConfig {
    pub const DEFAULT_SOURCE_PATH: &'static str = "messages.db";
    pub const DEFAULT_SINK_PATH: &'static str = "signed.db";
    pub const DEFAULT_POPULATE_COUNT: usize = 1000;
    pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 100_000_000;
    pub const DEFAULT_READ_PAGE_SIZE: usize = 256;

    /// Validates the store configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.source_path.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "store.source_path",
                constraint: "must not be empty".to_owned(),
            });
        }

        if self.sink_path.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "store.sink_path",
                constraint: "must not be empty".to_owned(),
            });
        }

        if self.source_path == self.sink_path {
            return Err(ValidationError::InvalidFieldValue {
                field: "store.sink_path",
                constraint: "must differ from `store.source_path`".to_owned(),
            });
        }

        if self.max_message_bytes == 0 {
            return Err(ValidationError::ZeroValue("store.max_message_bytes"));
        }

        if self.read_page_size == 0 {
            return Err(ValidationError::ZeroValue("store.read_page_size"));
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            source_path: default_source_path(),
            sink_path: default_sink_path(),
            reset_sink: default_reset_sink(),
            populate_count: default_populate_count(),
            max_message_bytes: default_max_message_bytes(),
            read_page_size: default_read_page_size(),
        }
    }
}

fn default_source_path() -> String {
    StoreConfig::DEFAULT_SOURCE_PATH.to_owned()
}

fn default_sink_path() -> String {
    StoreConfig::DEFAULT_SINK_PATH.to_owned()
}

fn default_reset_sink() -> bool {
    true
}

fn default_populate_count() -> usize {
    StoreConfig::DEFAULT_POPULATE_COUNT
}

fn default_max_message_bytes() -> usize {
    StoreConfig::DEFAULT_MAX_MESSAGE_BYTES
}

fn default_read_page_size() -> usize {
    StoreConfig::DEFAULT_READ_PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_source_and_sink_path_is_rejected() {
        let config = StoreConfig {
            sink_path: StoreConfig::DEFAULT_SOURCE_PATH.to_owned(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue {
                field: "store.sink_path",
                ..
            })
        ));
    }
}
