use serde::Deserialize;

use crate::environment::{Environment, DEV_ENV_NAME};

/// Directory containing configuration files relative to the application root.
const CONFIGURATION_DIR: &str = "configuration";

/// Name of the base configuration file loaded for all environments.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix for environment variable overrides in configuration.
const ENV_PREFIX: &str = "APP";

/// Separator between the environment variable prefix and the first key segment.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
///
/// For example, `APP_SYNC__SYNC_INTERVAL_SECS` sets the `sync.sync_interval_secs` field.
const ENV_SEPARATOR: &str = "__";

/// Loads the application configuration from YAML files and environment variables.
///
/// This function loads the base configuration file, then an environment-specific file
/// (determined by the `APP_ENVIRONMENT` variable, defaulting to `dev`), and finally
/// applies overrides from environment variables prefixed with `APP`. Nested keys are
/// separated by double underscores (`__`).
///
/// The resulting configuration is deserialized into the type `T`.
///
/// # Panics
///
/// Panics if the current working directory cannot be determined or if the value of
/// `APP_ENVIRONMENT` cannot be parsed into an [`Environment`].
///
/// Returns an error if configuration loading or deserialization fails.
pub fn load_config<'a, T>() -> Result<T, layered_config::ConfigError>
where
    T: Deserialize<'a>,
{
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join(CONFIGURATION_DIR);

    // Detect the running environment.
    // Default to `dev` if unspecified.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| DEV_ENV_NAME.into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");

    let environment_filename = format!("{}.yaml", environment.as_str());
    let settings = layered_config::Config::builder()
        .add_source(layered_config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(layered_config::File::from(
            configuration_directory.join(environment_filename),
        ))
        // Add in settings from environment variables (with a prefix of APP and '__' as separator)
        // E.g. `APP_STORE=memory` sets `SyncerConfig { store }` to `memory`.
        .add_source(
            layered_config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_PREFIX_SEPARATOR)
                .separator(ENV_SEPARATOR),
        )
        .build()?;

    settings.try_deserialize::<T>()
}
