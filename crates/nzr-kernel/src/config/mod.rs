//! Configuration loading
//!
//! Loads configuration documents in YAML, TOML, JSON, INI, RON or JSON5,
//! auto-detecting the format from the file extension and substituting
//! environment variables (`${VAR}` and `$VAR`) before parsing.
//!
//! The typed documents consumed by the foundation crate live in
//! [`documents`]: context store tuning, registry tuning and the model
//! catalog used for config-driven bulk loading.

use config::builder::{ConfigBuilder, DefaultState};
use config::{Config as Cfg, Environment, File};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

pub use config::FileFormat;

mod documents;
pub use documents::{CatalogConfig, ContextConfig, HubConfig, ModelDescriptor, RegistryConfig};

/// Failure to read or interpret a configuration document.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid in its format.
    #[error("Config parsing error: {0}")]
    Parse(String),

    /// The file extension maps to no supported format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The document parsed but does not match the target type.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// `${NAME}` or bare `$NAME`.
static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("env var pattern is valid")
});

/// Map a file extension (case-insensitive) onto a document format.
///
/// `yaml`/`yml`, `toml`, `json`, `ini`, `ron` and `json5` are understood.
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let path = path.as_ref();
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return Err(ConfigError::UnsupportedFormat(format!(
            "{} has no file extension",
            path.display()
        )));
    };

    let format = match ext.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => FileFormat::Yaml,
        "toml" => FileFormat::Toml,
        "json" => FileFormat::Json,
        "ini" => FileFormat::Ini,
        "ron" => FileFormat::Ron,
        "json5" => FileFormat::Json5,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    Ok(format)
}

/// Replace `${NAME}` and `$NAME` with the value of the environment variable.
///
/// Both forms are resolved in a single pass, so a substituted value is never
/// expanded again. Unset variables are kept verbatim.
pub fn substitute_env_vars(content: &str) -> String {
    ENV_VAR
        .replace_all(content, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Read a document and substitute its environment variables.
fn read_document(path: &Path) -> ConfigResult<(String, FileFormat)> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    tracing::debug!(path = %path.display(), ?format, "Loading configuration");
    Ok((substitute_env_vars(&content), format))
}

fn build<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load a typed document from a file, picking the format from its extension.
///
/// ```rust,ignore
/// use nzr_kernel::config::{load_config, CatalogConfig};
///
/// let catalog: CatalogConfig = load_config("models.yaml")?;
/// ```
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> ConfigResult<T> {
    let (content, format) = read_document(path.as_ref())?;
    build(Cfg::builder().add_source(File::from_str(&content, format)))
}

/// Parse a typed document held in memory.
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    let content = substitute_env_vars(content);
    build(Cfg::builder().add_source(File::from_str(&content, format)))
}

/// Layer several in-memory documents; keys in later documents win.
pub fn merge_configs<T: DeserializeOwned>(sources: &[(&str, FileFormat)]) -> ConfigResult<T> {
    let builder = sources
        .iter()
        .fold(Cfg::builder(), |builder, (content, format)| {
            builder.add_source(File::from_str(&substitute_env_vars(content), *format))
        });
    build(builder)
}

/// [`load_config`] with environment overrides layered on top.
///
/// Variables are named `<PREFIX>_<SECTION>__<KEY>`, e.g.
/// `NZR_CONTEXT__MAX_CONTEXTS=500` overrides `context.max_contexts`.
pub fn load_with_env<T: DeserializeOwned>(path: impl AsRef<Path>, env_prefix: &str) -> ConfigResult<T> {
    let (content, format) = read_document(path.as_ref())?;
    let overrides = Environment::with_prefix(env_prefix)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true);

    build(
        Cfg::builder()
            .add_source(File::from_str(&content, format))
            .add_source(overrides),
    )
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("models.yaml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("models.yml").unwrap(), FileFormat::Yaml);
        assert_eq!(detect_format("models.toml").unwrap(), FileFormat::Toml);
        assert_eq!(detect_format("models.json").unwrap(), FileFormat::Json);
        assert_eq!(detect_format("models.ini").unwrap(), FileFormat::Ini);
        assert_eq!(detect_format("models.ron").unwrap(), FileFormat::Ron);
        assert_eq!(detect_format("models.json5").unwrap(), FileFormat::Json5);
        assert!(detect_format("models.txt").is_err());
        assert!(detect_format("models").is_err());
    }

    #[test]
    fn test_substitute_leaves_unset_vars() {
        let out = substitute_env_vars("key: ${NZR_SURELY_UNSET_VAR_42}");
        assert_eq!(out, "key: ${NZR_SURELY_UNSET_VAR_42}");
    }

    #[test]
    fn test_substitution_is_single_pass() {
        unsafe {
            std::env::set_var("NZR_UNIT_OUTER", "$NZR_UNIT_INNER");
            std::env::set_var("NZR_UNIT_INNER", "leaked");
        }
        let out = substitute_env_vars("a: ${NZR_UNIT_OUTER}, b: $NZR_UNIT_INNER");
        unsafe {
            std::env::remove_var("NZR_UNIT_OUTER");
            std::env::remove_var("NZR_UNIT_INNER");
        }
        assert_eq!(out, "a: $NZR_UNIT_INNER, b: leaked");
    }

    #[test]
    fn test_from_str_toml() {
        let toml = r#"
max_contexts = 42
cleanup_interval_secs = 5
"#;

        let config: ContextConfig = from_str(toml, FileFormat::Toml).unwrap();
        assert_eq!(config.max_contexts, 42);
        assert_eq!(config.cleanup_interval_secs, 5);
        assert_eq!(config.max_message_history, 100);
        assert_eq!(config.default_ttl, Some(3600));
    }

    #[test]
    fn test_from_str_json5() {
        let json5 = r#"
{
    // registry tuning
    health_cache_ttl_secs: 5,
}
"#;

        let config: RegistryConfig = from_str(json5, FileFormat::Json5).unwrap();
        assert_eq!(config.health_cache_ttl_secs, 5);
        assert!(config.builtin_types);
    }

    #[test]
    fn test_merge_configs() {
        let base = r#"{ "max_contexts": 100, "max_message_history": 10 }"#;
        let overrides = r#"{ "max_contexts": 5 }"#;

        let config: ContextConfig =
            merge_configs(&[(base, FileFormat::Json), (overrides, FileFormat::Json)]).unwrap();
        assert_eq!(config.max_contexts, 5);
        assert_eq!(config.max_message_history, 10);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let result: ConfigResult<ContextConfig> = from_str("{ not json", FileFormat::Json);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
