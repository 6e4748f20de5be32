//! Environment-driven configuration, read once at startup.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;

/// Which code-hosting platform the fetcher talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubKind {
    /// Public platform: `git ls-remote` resolution + `/archive/<commit>.zip` download.
    GitHub,
    /// Self-hosted platform: REST API resolution with the authentication chain.
    SelfHosted,
}

impl HubKind {
    pub fn from_env_value(value: &str) -> HubKind {
        if value.eq_ignore_ascii_case("github") {
            HubKind::GitHub
        } else {
            HubKind::SelfHosted
        }
    }
}

/// Immutable server configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub hub: HubKind,
    pub max_workers: usize,
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub temp_dir: PathBuf,
    pub settings_dir: PathBuf,
    pub model_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub login_key: Option<String>,
    pub password_key: Option<String>,
    pub pat_key: Option<String>,
}

impl Config {
    /// Read configuration from the environment. `API_KEY` is the only hard
    /// requirement; everything else has a default.
    pub fn from_env() -> Result<Config> {
        let api_key = std::env::var("API_KEY").context("API_KEY must be set")?;
        if api_key.trim().is_empty() {
            bail!("API_KEY must not be empty");
        }

        let max_workers = match std::env::var("MAX_WORKERS") {
            Ok(v) => v.parse::<usize>().context("MAX_WORKERS must be a positive integer")?,
            Err(_) => 10,
        };
        if max_workers == 0 {
            bail!("MAX_WORKERS must be a positive integer");
        }

        Ok(Config {
            hub: HubKind::from_env_value(&std::env::var("HubType").unwrap_or_default()),
            max_workers,
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8000),
            api_key,
            temp_dir: PathBuf::from(std::env::var("TEMP_DIR").unwrap_or_else(|_| "tmp".to_string())),
            settings_dir: PathBuf::from("Settings"),
            model_dir: PathBuf::from("Model"),
            datasets_dir: PathBuf::from("Datasets"),
            login_key: std::env::var("LOGIN_KEY").ok().filter(|k| !k.is_empty()),
            password_key: std::env::var("PASSWORD_KEY").ok().filter(|k| !k.is_empty()),
            pat_key: std::env::var("PAT_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    /// Back-pressure threshold: ingress rejects once the queue reaches this depth.
    pub fn queue_limit(&self) -> usize {
        2 * self.max_workers
    }

    pub fn rules_path(&self) -> PathBuf {
        self.settings_dir.join("rules.yml")
    }

    pub fn excluded_files_path(&self) -> PathBuf {
        self.settings_dir.join("excluded_files.yml")
    }

    pub fn excluded_extensions_path(&self) -> PathBuf {
        self.settings_dir.join("excluded_extensions.yml")
    }

    pub fn false_positive_path(&self) -> PathBuf {
        self.settings_dir.join("false-positive.yml")
    }

    pub fn frameworks_path(&self) -> PathBuf {
        self.settings_dir.join("frameworks.yml")
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join("secret_detector_model.pkl")
    }

    pub fn vectorizer_path(&self) -> PathBuf {
        self.model_dir.join("vectorizer.pkl")
    }

    pub fn secrets_dataset_path(&self) -> PathBuf {
        self.datasets_dir.join("Dataset_Secrets.txt")
    }

    pub fn non_secrets_dataset_path(&self) -> PathBuf {
        self.datasets_dir.join("Dataset_NonSecrets.txt")
    }

    /// Ensure the on-disk layout exists; missing directories are created.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.settings_dir, &self.model_dir, &self.datasets_dir, &self.temp_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(())
    }
}
