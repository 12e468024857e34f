use super::SimulationConfig;
use crate::errors::ConfigError;
use std::fs;
use std::path::Path;

use tracing::info;

/// Loads a simulation configuration from a YAML or TOML file
///
/// # Arguments
///
/// * `file_path` - Path to the configuration file; the extension selects the format
///
/// # Returns
///
/// * `Result<SimulationConfig, ConfigError>` - The parsed configuration, with defaults for
///   every section the file leaves out
///
/// # Errors
///
/// Returns an error if:
/// * The file cannot be read
/// * The extension is neither `.yaml`, `.yml` nor `.toml`
/// * The content cannot be parsed into a SimulationConfig
pub fn load_config(file_path: &str) -> Result<SimulationConfig, ConfigError> {
    let extension = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_lowercase();
    let raw = fs::read_to_string(file_path).map_err(|source| ConfigError::Io {
        path: file_path.to_string(),
        source,
    })?;
    let config: SimulationConfig = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        "toml" => toml::from_str(&raw)?,
        other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
    };
    info!(
        "Loaded configuration from {} (provider: {})",
        file_path, config.llm.provider
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Provider;
    use std::io::Write;
    use std::time::Duration;

    fn write_config(name: &str, content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path.to_string_lossy().into_owned())
    }

    #[test]
    fn yaml_overrides_merge_with_defaults() {
        let (_dir, path) = write_config(
            "sim.yaml",
            "llm:\n  provider: gemini\nruntime:\n  component_timeout: 90s\n  max_fix_rounds: 1\n",
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.provider, Provider::Gemini);
        assert_eq!(config.llm.max_retries, 3);
        assert_eq!(config.runtime.component_timeout, Duration::from_secs(90));
        assert_eq!(config.runtime.max_fix_rounds, 1);
        assert_eq!(config.runtime.review_timeout, Duration::from_secs(600));
        assert_eq!(config.sandbox.root, "output");
    }

    #[test]
    fn toml_is_supported() {
        let (_dir, path) = write_config(
            "sim.toml",
            "request = \"Build a site\"\n[travel]\ntime_scale = 0.0\nmin_delay = \"10ms\"\n",
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.request.as_deref(), Some("Build a site"));
        assert_eq!(config.travel.time_scale, 0.0);
        assert_eq!(config.travel.min_delay, Duration::from_millis(10));
        assert_eq!(config.travel.speed, 5.0);
    }

    #[test]
    fn bad_durations_are_reported() {
        let (_dir, path) = write_config("sim.yaml", "runtime:\n  tool_timeout: soon\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid duration 'soon'"), "{}", err);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let (_dir, path) = write_config("sim.json", "{}");
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
