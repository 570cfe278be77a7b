// Local credential store.
//
// Credentials live in `~/.everywhere/config.json`. Environment variables with
// the `EVERYWHERE_` prefix override the stored values when reading but are
// never written back. A `Config` is built once in `main` and handed to each
// command handler by reference.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CliError, CliResult};

pub const DEFAULT_API_ENDPOINT: &str = "https://api.everywhere.dev/api/v1";

const CONFIG_DIR: &str = ".everywhere";
const CONFIG_FILE: &str = "config.json";
const ENV_API_URL: &str = "EVERYWHERE_API_URL";
const ENV_AUTH_TOKEN: &str = "EVERYWHERE_AUTH_TOKEN";
const ENV_USER_EMAIL: &str = "EVERYWHERE_USER_EMAIL";

/// On-disk record. Field names are part of the file format.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub user_email: String,
}

/// Values taken from the environment that shadow the stored credentials.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub auth_token: Option<String>,
    pub user_email: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            auth_token: non_empty_var(ENV_AUTH_TOKEN),
            user_email: non_empty_var(ENV_USER_EMAIL),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    path: PathBuf,
    api_url: String,
    stored: Credentials,
    overrides: EnvOverrides,
}

impl Config {
    /// Load from the default location, layering environment overrides.
    pub fn load() -> CliResult<Self> {
        let api_url = non_empty_var(ENV_API_URL).unwrap_or_else(|| DEFAULT_API_ENDPOINT.into());
        let mut config = Self::load_from(default_config_path()?, api_url)?;
        config.overrides = EnvOverrides::from_env();
        Ok(config)
    }

    /// Load the credential file at `path` without consulting the environment.
    /// A missing file yields empty credentials.
    pub fn load_from(path: PathBuf, api_url: impl Into<String>) -> CliResult<Self> {
        let stored = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|err| {
                CliError::filesystem(format!("failed to read {}", path.display()), err)
            })?;
            if raw.trim().is_empty() {
                Credentials::default()
            } else {
                serde_json::from_str(&raw).map_err(|err| {
                    CliError::filesystem(format!("failed to parse {}", path.display()), err)
                })?
            }
        } else {
            Credentials::default()
        };
        debug!(path = %path.display(), "loaded config");

        Ok(Self {
            path,
            api_url: api_url.into(),
            stored,
            overrides: EnvOverrides::default(),
        })
    }

    pub fn with_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn auth_token(&self) -> &str {
        self.overrides
            .auth_token
            .as_deref()
            .unwrap_or(&self.stored.auth_token)
    }

    pub fn user_email(&self) -> &str {
        self.overrides
            .user_email
            .as_deref()
            .unwrap_or(&self.stored.user_email)
    }

    pub fn is_authenticated(&self) -> bool {
        !self.auth_token().is_empty()
    }

    /// Returns the token every authenticated command must send. Only checks
    /// presence; the server decides whether it is valid.
    pub fn require_auth(&self) -> CliResult<&str> {
        if self.is_authenticated() {
            Ok(self.auth_token())
        } else {
            Err(CliError::NotAuthenticated)
        }
    }

    /// Persist a successful login.
    pub fn set_credentials(&mut self, token: &str, email: &str) -> CliResult<()> {
        self.stored.auth_token = token.to_string();
        self.stored.user_email = email.to_string();
        self.save()
    }

    pub fn clear_auth(&mut self) -> CliResult<()> {
        self.stored = Credentials::default();
        self.save()
    }

    fn save(&self) -> CliResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                CliError::filesystem(format!("failed to create {}", parent.display()), err)
            })?;
        }
        let json = serde_json::to_string_pretty(&self.stored).map_err(|err| {
            CliError::filesystem(format!("failed to encode {}", self.path.display()), err)
        })?;
        fs::write(&self.path, json).map_err(|err| {
            CliError::filesystem(format!("failed to write {}", self.path.display()), err)
        })?;
        debug!(path = %self.path.display(), "saved config");
        Ok(())
    }
}

/// `~/.everywhere/config.json`
pub fn default_config_path() -> CliResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::validation("could not determine the home directory"))?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serial_test::serial;
    use tempfile::TempDir;

    fn scratch() -> Result<(TempDir, PathBuf)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nested").join(CONFIG_FILE);
        Ok((dir, path))
    }

    #[test]
    fn missing_file_means_not_authenticated() -> Result<()> {
        let (_dir, path) = scratch()?;
        let config = Config::load_from(path, DEFAULT_API_ENDPOINT)?;
        assert!(!config.is_authenticated());
        assert!(matches!(config.require_auth(), Err(CliError::NotAuthenticated)));
        Ok(())
    }

    #[test]
    fn any_non_empty_token_passes_require_auth() -> Result<()> {
        let (_dir, path) = scratch()?;
        let mut config = Config::load_from(path, DEFAULT_API_ENDPOINT)?;
        config.set_credentials("not-checked-locally", "a@b.com")?;
        assert_eq!(config.require_auth()?, "not-checked-locally");
        Ok(())
    }

    #[test]
    fn credentials_round_trip_through_disk() -> Result<()> {
        let (_dir, path) = scratch()?;
        let mut config = Config::load_from(path.clone(), DEFAULT_API_ENDPOINT)?;
        config.set_credentials("abc123", "a@b.com")?;

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(raw["auth_token"], "abc123");
        assert_eq!(raw["user_email"], "a@b.com");

        let reloaded = Config::load_from(path, DEFAULT_API_ENDPOINT)?;
        assert_eq!(reloaded.auth_token(), "abc123");
        assert_eq!(reloaded.user_email(), "a@b.com");
        Ok(())
    }

    #[test]
    fn clear_auth_wipes_both_fields() -> Result<()> {
        let (_dir, path) = scratch()?;
        let mut config = Config::load_from(path.clone(), DEFAULT_API_ENDPOINT)?;
        config.set_credentials("abc123", "a@b.com")?;
        config.clear_auth()?;

        let reloaded = Config::load_from(path, DEFAULT_API_ENDPOINT)?;
        assert_eq!(reloaded.auth_token(), "");
        assert_eq!(reloaded.user_email(), "");
        Ok(())
    }

    #[test]
    fn overrides_shadow_stored_values_but_are_not_saved() -> Result<()> {
        let (_dir, path) = scratch()?;
        let mut config = Config::load_from(path.clone(), DEFAULT_API_ENDPOINT)?.with_overrides(
            EnvOverrides {
                auth_token: Some("from-env".into()),
                user_email: None,
            },
        );
        config.set_credentials("stored", "a@b.com")?;
        assert_eq!(config.auth_token(), "from-env");
        assert_eq!(config.user_email(), "a@b.com");

        let reloaded = Config::load_from(path, DEFAULT_API_ENDPOINT)?;
        assert_eq!(reloaded.auth_token(), "stored");
        Ok(())
    }

    #[test]
    #[serial]
    fn environment_variables_override_stored_credentials() -> Result<()> {
        let (_dir, path) = scratch()?;
        let mut stored = Config::load_from(path.clone(), DEFAULT_API_ENDPOINT)?;
        stored.set_credentials("stored-token", "stored@b.com")?;

        env::set_var(ENV_AUTH_TOKEN, "env-token");
        env::set_var(ENV_USER_EMAIL, "");
        let overrides = EnvOverrides::from_env();
        env::remove_var(ENV_AUTH_TOKEN);
        env::remove_var(ENV_USER_EMAIL);

        assert_eq!(overrides.auth_token.as_deref(), Some("env-token"));
        assert_eq!(overrides.user_email, None);

        let config = Config::load_from(path, DEFAULT_API_ENDPOINT)?.with_overrides(overrides);
        assert_eq!(config.auth_token(), "env-token");
        assert_eq!(config.user_email(), "stored@b.com");
        assert_eq!(config.require_auth()?, "env-token");
        Ok(())
    }

    #[test]
    #[serial]
    fn unset_environment_leaves_no_overrides() {
        env::remove_var(ENV_AUTH_TOKEN);
        env::remove_var(ENV_USER_EMAIL);
        let overrides = EnvOverrides::from_env();
        assert!(overrides.auth_token.is_none());
        assert!(overrides.user_email.is_none());
    }

    #[test]
    fn corrupt_file_is_a_filesystem_error() -> Result<()> {
        let (_dir, path) = scratch()?;
        fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))?;
        fs::write(&path, "{not json")?;
        let err = Config::load_from(path, DEFAULT_API_ENDPOINT).unwrap_err();
        assert!(matches!(err, CliError::Filesystem { .. }));
        Ok(())
    }
}
