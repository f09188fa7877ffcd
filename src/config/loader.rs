use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::ServerConfig;

/// Load the bootstrap configuration: built-in defaults, layered with an optional file, layered
/// with `GATEWAY_`-prefixed environment overrides (§10.3). The file is optional so the gateway
/// can run purely off defaults + environment in a container.
pub async fn load_config(config_path: &str) -> Result<ServerConfig> {
    load_config_sync(config_path)
}

pub fn load_config_sync(config_path: &str) -> Result<ServerConfig> {
    let path = Path::new(config_path);
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let mut builder = Config::builder().add_source(Config::try_from(&ServerConfig::default())?);

    if path.exists() {
        let path_str = path
            .to_str()
            .ok_or_else(|| eyre::eyre!("invalid UTF-8 path: {}", path.display()))?;
        builder = builder.add_source(File::new(path_str, format));
    } else {
        tracing::info!(config_path, "no config file found, using defaults + environment");
    }

    let settings = builder
        .add_source(Environment::with_prefix("GATEWAY").separator("_"))
        .build()
        .with_context(|| format!("failed to build config from {}", path.display()))?;

    settings
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn loads_yaml_config() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
database_url: "sqlite://test.db"
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{yaml_content}").unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.database_url, "sqlite://test.db");
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let config = load_config("/nonexistent/gatewire.yaml").await.unwrap();
        assert_eq!(config.listen_addr, ServerConfig::default().listen_addr);
    }

    #[tokio::test]
    async fn environment_overrides_file() {
        let yaml_content = r#"
listen_addr: "127.0.0.1:3000"
"#;
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{yaml_content}").unwrap();

        // SAFETY: test-only, single-threaded env mutation scoped to this test.
        unsafe {
            std::env::set_var("GATEWAY_LISTEN_ADDR", "0.0.0.0:9000");
        }
        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        unsafe {
            std::env::remove_var("GATEWAY_LISTEN_ADDR");
        }

        assert_eq!(config.listen_addr, "0.0.0.0:9000");
    }
}
