use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions probed, in order, for every configuration file stem.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Stem of the configuration file loaded in every environment.
const BASE_FILE_STEM: &str = "base";

/// Prefix of environment variable overrides, e.g. `APP_PIPELINE__BATCH_SIZE=50`.
const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by top-level configuration structs that can be loaded with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are parsed as comma separated lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Errors raised while locating, parsing or deserializing configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not find `{stem}` configuration in `{directory}` (tried {attempted})")]
    ConfigurationFileMissing {
        stem: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to build configuration: {0}")]
    Build(#[source] config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] config::ConfigError),
}

/// Loads configuration from `./configuration`.
///
/// See [`load_config_from`] for the layering rules.
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let current_dir = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    load_config_from(&current_dir.join(CONFIGURATION_DIR))
}

/// Loads configuration from `directory`.
///
/// Sources are layered in this order, later ones overriding earlier ones:
/// 1. `base.(yaml|yml|json)`
/// 2. `{environment}.(yaml|yml|json)` where the environment comes from `APP_ENVIRONMENT`
/// 3. `APP_`-prefixed environment variables, using `__` to separate nested keys
pub fn load_config_from<T>(directory: &Path) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            directory.to_path_buf(),
        ));
    }

    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    let base_file = find_configuration_file(directory, BASE_FILE_STEM)?;
    let environment_file = find_configuration_file(directory, environment.as_str())?;

    let mut environment_source = config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    if !T::LIST_PARSE_KEYS.is_empty() {
        environment_source = environment_source.list_separator(LIST_SEPARATOR);
        for key in T::LIST_PARSE_KEYS {
            environment_source = environment_source.with_list_parse_key(key);
        }
    }

    config::Config::builder()
        .add_source(config::File::from(base_file))
        .add_source(config::File::from(environment_file))
        .add_source(environment_source)
        .build()
        .map_err(LoadConfigError::Build)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)
}

/// Returns the first existing `{stem}.{extension}` file in `directory`.
fn find_configuration_file(directory: &Path, stem: &str) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{stem}.{extension}")))
        .collect();

    if let Some(path) = candidates.iter().find(|path| path.is_file()) {
        return Ok(path.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::ConfigurationFileMissing {
        stem: stem.to_owned(),
        directory: directory.to_path_buf(),
        attempted,
    })
}
