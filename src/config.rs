use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_yaml::Deserializer;
use url::Url;

const APP_NAME: &str = "postwithus";
const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_site_url")]
    pub site_url: String,
    #[serde(default = "default_site_name")]
    pub site_name: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub storage: StorageConfig,
    pub llm_timeout_secs: Option<u64>,
    #[serde(default = "default_max_document_tokens")]
    pub max_document_tokens: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    #[default]
    Memory,
    Sqlite { db_path: PathBuf },
}

fn default_model() -> String {
    "openai/gpt-3.5-turbo".to_string()
}

fn default_image_model() -> String {
    "stabilityai/stable-diffusion-xl-base-1.0".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_site_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_site_name() -> String {
    "Post-With-Us".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_server_url() -> String {
    "http://127.0.0.1:3001/".to_string()
}

fn default_max_document_tokens() -> usize {
    8_000
}

pub struct EnsureOutcome {
    pub path: PathBuf,
    pub created: bool,
}

impl Config {
    pub fn ensure_user_config() -> Result<EnsureOutcome> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_NAME);

        if let Some(path) = xdg_dirs.find_config_file(CONFIG_FILE) {
            return Ok(EnsureOutcome {
                path,
                created: false,
            });
        }

        let config_path = xdg_dirs
            .place_config_file(CONFIG_FILE)
            .context("Cannot create configuration directory")?;
        let mut config_file = File::create(&config_path)?;

        write!(
            &mut config_file,
            r#"# postwithus config (YAML)
# Only api_key is required; everything else falls back to the value shown.

api_key: "<your OpenRouter or OpenAI API key>"
model: "openai/gpt-3.5-turbo"
image_model: "stabilityai/stable-diffusion-xl-base-1.0"
api_base: "https://openrouter.ai/api/v1"

# Sent as HTTP-Referer / X-Title to the model provider
site_url: "http://localhost:3000"
site_name: "Post-With-Us"

# Server side
bind_addr: "127.0.0.1:3001"
storage:
  kind: memory
#  kind: sqlite
#  db_path: "/path/to/postwithus.sqlite3"

# Optional upper bound on a single model call, in seconds
# llm_timeout_secs: 60

# Attached documents in quick posts are trimmed to this many tokens
max_document_tokens: 8000

# Client side
server_url: "http://127.0.0.1:3001/"
"#
        )?;

        Ok(EnsureOutcome {
            path: config_path,
            created: true,
        })
    }

    pub fn get_user_config() -> Result<Config> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_NAME).find_config_file(CONFIG_FILE);

        match &xdg_dirs {
            Some(existing_config) => Config::from_path(existing_config),
            None => Err(anyhow!(
                "Could not read configuration file in config::get_user_config"
            )),
        }
    }

    pub fn from_path(path: &Path) -> Result<Config> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Config::from_yaml(&raw).map_err(|e| anyhow!("Invalid YAML in {}: {}", path.display(), e))
    }

    pub fn server_url(&self) -> Result<Url> {
        Url::parse(&self.server_url)
            .with_context(|| format!("Invalid server_url '{}'", self.server_url))
    }

    pub fn from_yaml(raw: &str) -> Result<Config> {
        let deserialized = Deserializer::from_str(raw);
        serde_path_to_error::deserialize(deserialized)
            .map_err(|e| anyhow!("at `{}`: {}", e.path(), e.inner()))
    }
}

/// Path of a client-side state file (preferences and drafts).
pub fn user_data_file(name: &str) -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(APP_NAME)
        .place_data_file(name)
        .context("Cannot create data directory")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let cfg = Config::from_yaml("api_key: \"k\"\n").unwrap();
        assert_eq!(cfg.api_key, "k");
        assert_eq!(cfg.model, "openai/gpt-3.5-turbo");
        assert_eq!(cfg.bind_addr, "127.0.0.1:3001");
        assert!(matches!(cfg.storage, StorageConfig::Memory));
        assert_eq!(cfg.llm_timeout_secs, None);
    }

    #[test]
    fn test_sqlite_storage_section() {
        let cfg = Config::from_yaml(
            "api_key: k\nstorage:\n  kind: sqlite\n  db_path: /tmp/posts.sqlite3\n",
        )
        .unwrap();
        match cfg.storage {
            StorageConfig::Sqlite { db_path } => {
                assert_eq!(db_path, PathBuf::from("/tmp/posts.sqlite3"))
            }
            other => panic!("unexpected storage {:?}", other),
        }
    }

    #[test]
    fn test_error_names_the_offending_key() {
        let err = Config::from_yaml("api_key: k\nllm_timeout_secs: soon\n").unwrap_err();
        assert!(err.to_string().contains("llm_timeout_secs"), "{}", err);
    }
}
