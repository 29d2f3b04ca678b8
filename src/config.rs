use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
	pub database: DatabaseConfig,
	pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: String,
	pub database: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportConfig {
	/// Worker threads for batch imports, 0 for one per available CPU.
	pub jobs: usize,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfig {
			host: "localhost".to_string(),
			port: 3306,
			username: "username".to_string(),
			password: "password123".to_string(),
			database: "dmarc".to_string(),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("could not read config file `{0}`: {1}")]
	Read(std::path::PathBuf, std::io::Error),
	#[error("could not write default config file `{0}`: {1}")]
	Write(std::path::PathBuf, std::io::Error),
	#[error("invalid config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("could not serialize default config: {0}")]
	Serialize(#[from] toml::ser::Error),
}

impl Config {
	/// Reads the config at `path`, writing the default one there first if it is missing.
	pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
		if !path.exists() {
			tracing::info!(path = %path.display(), "could not find config, creating default");
			std::fs::write(path, toml::to_string(&Config::default())?)
				.map_err(|e| ConfigError::Write(path.to_path_buf(), e))?;
		}

		let config_text =
			std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
		Ok(toml::from_str(&config_text)?)
	}
}
