//! LDAP support.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};

use crate::error::Result;

const DEFAULT_FILTER: &str = "(uid={uid})";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// `invalidCredentials` LDAP result code.
const INVALID_CREDENTIALS: u32 = 49;

/// Directory entry of an authenticated user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LdapEntry {
    pub dn: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

/// Directory able to verify user credentials.
#[async_trait]
pub trait LdapDirectory: Send + Sync {
    /// Verify `password` for `uid`.
    ///
    /// Returns `Ok(None)` when the directory refuses the credentials and
    /// `Err` when it cannot be reached.
    async fn authenticate(
        &self,
        uid: &str,
        password: &str,
    ) -> Result<Option<LdapEntry>>;
}

#[derive(Debug, Clone)]
pub struct LdapConfig {
    pub addr: String,
    pub base_dn: String,
    pub filter_template: String,
    pub bind_dn: Option<String>,
    pub bind_password: Option<String>,
    pub timeout: Duration,
}

impl LdapConfig {
    /// Create a new [`LdapConfig`].
    pub fn new(
        addr: impl Into<String>,
        base_dn: impl Into<String>,
        filter_template: Option<String>,
    ) -> Result<Self> {
        let template = filter_template.unwrap_or_else(|| DEFAULT_FILTER.into());

        if !template.contains("{uid}") {
            return Err(LdapError::FilterParsing.into());
        }

        Ok(Self {
            addr: addr.into(),
            base_dn: base_dn.into(),
            filter_template: template,
            bind_dn: None,
            bind_password: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Search users with a service account instead of anonymously.
    pub fn bind(mut self, dn: String, password: String) -> Self {
        self.bind_dn = Some(dn);
        self.bind_password = Some(password);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Search filter for user identifier.
    pub fn user_filter(&self, uid: &str) -> String {
        self.filter_template.replace("{uid}", &escape_ldap(uid))
    }
}

impl TryFrom<&crate::config::Ldap> for LdapConfig {
    type Error = crate::error::ServerError;

    fn try_from(cfg: &crate::config::Ldap) -> Result<Self> {
        let mut config =
            Self::new(&cfg.address, &cfg.base_dn, cfg.users_filter.clone())?;

        if let (Some(dn), Some(password)) = (&cfg.user, &cfg.password) {
            config = config.bind(dn.clone(), password.clone());
        }
        if let Some(timeout) = cfg.timeout {
            config = config.timeout(Duration::from_secs(timeout));
        }

        Ok(config)
    }
}

/// LDAP directory reached through [`ldap3`].
#[derive(Clone, Debug)]
pub struct Ldap {
    config: LdapConfig,
}

impl Ldap {
    /// Create a new [`Ldap`].
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LdapDirectory for Ldap {
    /// Search the user DN, then bind as this DN.
    ///
    /// A new connection is opened for every attempt, never reuse it.
    async fn authenticate(
        &self,
        uid: &str,
        password: &str,
    ) -> Result<Option<LdapEntry>> {
        // An empty password would be an unauthenticated bind.
        if password.is_empty() {
            return Ok(None);
        }

        let settings = LdapConnSettings::new().set_conn_timeout(self.config.timeout);
        let (handle, mut conn) =
            LdapConnAsync::with_settings(settings, &self.config.addr).await?;
        ldap3::drive!(handle);

        if let (Some(dn), Some(pwd)) =
            (&self.config.bind_dn, &self.config.bind_password)
        {
            conn.simple_bind(dn, pwd).await?.success()?;
        }

        let (results, _) = conn
            .search(
                &self.config.base_dn,
                Scope::Subtree,
                &self.config.user_filter(uid),
                vec!["cn", "mail", "memberOf"],
            )
            .await?
            .success()?;

        if results.len() != 1 {
            tracing::debug!(
                uid,
                entries = results.len(),
                "ldap search did not return exactly one entry"
            );
            conn.unbind().await?;
            return Ok(None);
        }

        let Some(entry) = results.into_iter().next().map(SearchEntry::construct)
        else {
            return Ok(None);
        };

        let bind = conn.simple_bind(&entry.dn, password).await?;
        if bind.rc == INVALID_CREDENTIALS {
            conn.unbind().await?;
            return Ok(None);
        }
        bind.success()?;
        conn.unbind().await?;

        Ok(Some(LdapEntry {
            name: first_attr(&entry, "cn"),
            email: first_attr(&entry, "mail"),
            groups: entry.attrs.get("memberOf").cloned().unwrap_or_default(),
            dn: entry.dn,
        }))
    }
}

fn first_attr(entry: &SearchEntry, name: &str) -> Option<String> {
    entry.attrs.get(name).and_then(|values| values.first()).cloned()
}

fn escape_ldap(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape_ldap("alice"), "alice");
        assert_eq!(escape_ldap("*)(uid=*"), r"\2a\29\28uid=\2a");
        assert_eq!(escape_ldap("a\\b\0"), r"a\5cb\00");
        assert_eq!(escape_ldap("élodie"), "élodie");
    }

    #[test]
    fn test_filter() {
        let config = LdapConfig::new(
            "ldap://localhost",
            "dc=example,dc=org",
            Some("(&(objectClass=person)(sAMAccountName={uid}))".into()),
        )
        .unwrap();

        assert_eq!(
            config.user_filter("bob*"),
            r"(&(objectClass=person)(sAMAccountName=bob\2a))"
        );
        assert_eq!(
            LdapConfig::new("ldap://localhost", "dc=example,dc=org", None)
                .unwrap()
                .user_filter("bob"),
            "(uid=bob)"
        );
    }

    #[test]
    fn test_filter_requires_placeholder() {
        assert!(
            LdapConfig::new("ldap://localhost", "dc=x", Some("(uid=*)".into()))
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_empty_password_is_refused() {
        let config =
            LdapConfig::new("ldap://127.0.0.1:1", "dc=example,dc=org", None)
                .unwrap();

        // Refused before any connection is attempted.
        let entry = Ldap::new(config).authenticate("alice", "").await.unwrap();
        assert!(entry.is_none());
    }
}
