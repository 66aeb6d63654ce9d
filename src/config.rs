//! Configuration manager for keyward.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ServerError};
use crate::provider::ProviderKind;
use crate::service::AuthPolicy;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    #[serde(default)]
    pub(crate) version: String,
    #[serde(skip)]
    pub(crate) path: PathBuf,
    /// Take client address from `X-Forwarded-For`.
    #[serde(default)]
    pub trust_forwarded: bool,
    /// Related to the authentication pipeline.
    #[serde(default)]
    pub auth: Auth,
    /// Related to failed attempts tracking.
    #[serde(default)]
    pub track: Track,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to LDAP3 configuration.
    #[serde(skip_serializing)]
    pub ldap: Option<Ldap>,
    /// Related to server-asserted identities.
    #[serde(skip_serializing)]
    pub browser: Option<Browser>,
}

/// Authentication pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    /// Providers in the order they are tried.
    pub providers: Vec<ProviderKind>,
    /// Accept a non-authoritative grant when nothing authoritative granted.
    pub accept_non_authoritative: bool,
    /// Stop the pipeline on the first authoritative denial.
    pub authoritative_deny_stops: bool,
    /// Upper bound, in seconds, for a single provider call.
    pub provider_timeout: Option<u64>,
}

impl Default for Auth {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderKind::Browser,
                ProviderKind::Ldap,
                ProviderKind::Database,
            ],
            accept_non_authoritative: false,
            authoritative_deny_stops: false,
            provider_timeout: None,
        }
    }
}

impl From<&Auth> for AuthPolicy {
    fn from(auth: &Auth) -> Self {
        Self {
            accept_non_authoritative: auth.accept_non_authoritative,
            authoritative_deny_stops: auth.authoritative_deny_stops,
            provider_timeout: auth.provider_timeout.map(Duration::from_secs),
        }
    }
}

/// Failed attempts tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Track {
    /// Failed attempts allowed inside `window`.
    pub max_attempts: i64,
    /// Window length in seconds.
    pub window: i64,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            window: 600,
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// LDAP configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ldap {
    /// `ldap://` or `ldaps://` URL of the directory.
    pub address: String,
    /// Service DN used to search users.
    pub user: Option<String>,
    /// Password of the service DN.
    pub password: Option<String>,
    /// DN under which users are searched.
    pub base_dn: String,
    /// Search filter, `{uid}` is replaced by the escaped login.
    pub users_filter: Option<String>,
    /// Connection timeout in seconds.
    pub timeout: Option<u64>,
    /// Directory is the only source of truth.
    #[serde(default)]
    pub authoritative: bool,
}

/// Server-asserted identity configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Browser {
    /// Header set by a reverse proxy, e.g. `X-Remote-User`.
    pub header: Option<String>,
    /// Domain appended to bare names before comparison.
    pub domain: Option<String>,
    #[serde(default)]
    pub authoritative: bool,
    /// Read the user part of `Authorization: Basic`. Only enable behind a
    /// server that verified these credentials itself.
    #[serde(default)]
    pub basic_auth: bool,
}

impl FromRef<crate::AppState> for Arc<Configuration> {
    fn from_ref(app_state: &crate::AppState) -> Arc<Configuration> {
        Arc::clone(&app_state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Instance version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        };

        let config = match File::open(&file_path) {
            Ok(file) => {
                let mut config: Configuration = serde_yaml::from_reader(file)
                    .map_err(|err| {
                        ServerError::Configuration(format!(
                            "cannot parse `{}`: {err}",
                            file_path.display()
                        ))
                    })?;
                config.version = VERSION.to_owned();
                config
            },
            Err(err) => self.error(err),
        };

        config.validate()?;
        Ok(Arc::new(config))
    }

    /// Reject configurations the pipeline cannot be wired from.
    pub fn validate(&self) -> Result<()> {
        for (index, kind) in self.auth.providers.iter().enumerate() {
            if self.auth.providers[..index].contains(kind) {
                return Err(ServerError::Configuration(format!(
                    "provider `{kind}` listed twice in `auth.providers`"
                )));
            }
        }

        if self.track.max_attempts < 1 || self.track.window < 1 {
            return Err(ServerError::Configuration(
                "`track.max_attempts` and `track.window` must be positive"
                    .into(),
            ));
        }

        if let Some(ldap) = &self.ldap {
            let url = Url::parse(&ldap.address).map_err(|err| {
                ServerError::Configuration(format!("invalid LDAP address: {err}"))
            })?;
            if !matches!(url.scheme(), "ldap" | "ldaps") {
                return Err(ServerError::Configuration(format!(
                    "LDAP address must use `ldap` or `ldaps`, got `{}`",
                    url.scheme()
                )));
            }
            if ldap.user.is_some() && ldap.password.is_none() {
                return Err(ServerError::Configuration(
                    "LDAP `user` requires `password`".into(),
                ));
            }
        }

        Ok(())
    }

    /// Providers to register, in order, skipping unconfigured ones.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        self.auth
            .providers
            .iter()
            .copied()
            .filter(|kind| match kind {
                ProviderKind::Browser => self.browser.is_some(),
                ProviderKind::Ldap => self.ldap.is_some(),
                ProviderKind::Database => true,
            })
            .collect()
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
name: vault
auth:
  providers: [ldap, database]
  authoritative_deny_stops: true
  provider_timeout: 5
ldap:
  address: ldaps://ldap.example.org
  base_dn: ou=people,dc=example,dc=org
"#;

    #[test]
    fn test_parse() {
        let config: Configuration = serde_yaml::from_str(CONFIG).unwrap();

        assert_eq!(config.name, "vault");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.enabled_providers(),
            vec![ProviderKind::Ldap, ProviderKind::Database]
        );
        assert_eq!(config.track, Track::default());

        let policy = AuthPolicy::from(&config.auth);
        assert!(policy.authoritative_deny_stops);
        assert!(!policy.accept_non_authoritative);
        assert_eq!(policy.provider_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_unconfigured_providers_are_skipped() {
        let config = Configuration::default();

        assert_eq!(config.enabled_providers(), vec![ProviderKind::Database]);
    }

    #[test]
    fn test_duplicate_provider() {
        let config: Configuration =
            serde_yaml::from_str("name: x\nauth:\n  providers: [database, database]\n")
                .unwrap();

        assert!(matches!(
            config.validate(),
            Err(ServerError::Configuration(_))
        ));
    }

    #[test]
    fn test_ldap_scheme() {
        let mut config = Configuration {
            ldap: Some(Ldap {
                address: "https://ldap.example.org".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        if let Some(ldap) = config.ldap.as_mut() {
            ldap.address = "ldap://ldap.example.org:389".into();
            ldap.user = Some("cn=admin,dc=example,dc=org".into());
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/config.yaml"))
            .read()
            .unwrap();

        assert_eq!(config.version(), VERSION);
        assert_eq!(config.auth, Auth::default());
    }

    #[test]
    fn test_unknown_provider_is_fatal() {
        let path = std::env::temp_dir().join("keyward-unknown-provider.yaml");
        std::fs::write(&path, "name: x\nauth:\n  providers: [kerberos]\n")
            .unwrap();

        let result = Configuration::default().path(path.clone()).read();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(ServerError::Configuration(_))));
    }
}
