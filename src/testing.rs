//! In-memory collaborators.
//!
//! MUST NEVER be used in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::crypto::Hash;
use crate::error::{Result, ServerError};
use crate::ldap::{LdapDirectory, LdapEntry};
use crate::provider::{
    AuthData, AuthOutcome, AuthProvider, DenyReason, ProviderKind,
};
use crate::track::{TrackRequest, TrackService};
use crate::user::{UserDataDto, UserLoginDto, UserPassService, UserService};

fn unavailable() -> ServerError {
    ServerError::Internal {
        details: "backend unavailable".into(),
        source: None,
    }
}

/// Users kept in a map, keyed by login.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, UserDataDto>>,
    hash: Option<Arc<Hash>>,
    migrations: AtomicUsize,
    fail_lookups: AtomicBool,
    fail_migrations: AtomicBool,
}

impl MemoryUserStore {
    /// Store able to migrate passwords with `hash`.
    pub fn with_hash(hash: Arc<Hash>) -> Self {
        Self {
            hash: Some(hash),
            ..Default::default()
        }
    }

    pub fn insert(&self, user: UserDataDto) {
        self.users.lock().unwrap().insert(user.login.clone(), user);
    }

    /// Number of successful migrations.
    pub fn migrations(&self) -> usize {
        self.migrations.load(Ordering::SeqCst)
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn fail_migrations(&self) {
        self.fail_migrations.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserService for MemoryUserStore {
    async fn get_by_login(&self, login: &str) -> Result<UserDataDto> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(unavailable());
        }

        self.users
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .ok_or(ServerError::NotFound)
    }
}

#[async_trait]
impl UserPassService for MemoryUserStore {
    async fn migrate_user_pass_by_id(&self, id: i64, plain: &str) -> Result<()> {
        if self.fail_migrations.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        let hash = self.hash.as_ref().ok_or_else(unavailable)?;
        let pass = hash.hash_key(plain)?;

        let mut users = self.users.lock().unwrap();
        let user = users
            .values_mut()
            .find(|user| user.id == id)
            .ok_or(ServerError::NotFound)?;
        user.pass = pass;
        user.hash_salt.clear();
        user.is_migrate = false;

        self.migrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Tracked attempts kept in a vector.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: Mutex<Vec<TrackRequest>>,
}

impl MemoryTrackStore {
    pub fn tracks(&self) -> Vec<TrackRequest> {
        self.tracks.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackService for MemoryTrackStore {
    async fn add(&self, track: &TrackRequest) -> Result<()> {
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn count_since(&self, track: &TrackRequest, since: i64) -> Result<i64> {
        let count = self
            .tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                t.source == track.source
                    && t.time >= since
                    && t.ipv4() == track.ipv4()
                    && t.ipv6() == track.ipv6()
            })
            .count();

        Ok(count as i64)
    }
}

/// Directory with a single account.
pub struct StaticDirectory {
    account: Option<(String, String)>,
}

impl StaticDirectory {
    pub fn new(uid: &str, password: &str) -> Self {
        Self {
            account: Some((uid.into(), password.into())),
        }
    }

    /// Directory failing every request.
    pub fn unreachable() -> Self {
        Self { account: None }
    }
}

#[async_trait]
impl LdapDirectory for StaticDirectory {
    async fn authenticate(
        &self,
        uid: &str,
        password: &str,
    ) -> Result<Option<LdapEntry>> {
        let Some((account, secret)) = &self.account else {
            return Err(unavailable());
        };

        if account == uid && secret == password {
            Ok(Some(LdapEntry {
                dn: format!("uid={uid},dc=example,dc=org"),
                name: Some(uid.to_owned()),
                ..Default::default()
            }))
        } else {
            Ok(None)
        }
    }
}

/// Scripted provider answer.
#[derive(Clone)]
pub enum Behaviour {
    /// Grant with a resolved user.
    Grant(UserDataDto),
    /// Grant without local user data, like a directory would.
    GrantExternal,
    Deny,
    Fail,
    Hang,
}

/// Provider answering the same way to every attempt.
pub struct StaticProvider {
    kind: ProviderKind,
    authoritative: bool,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl StaticProvider {
    pub fn new(kind: ProviderKind, authoritative: bool, behaviour: Behaviour) -> Self {
        Self {
            kind,
            authoritative,
            behaviour,
            calls: Arc::default(),
        }
    }

    /// Counter of `authenticate` calls.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl AuthProvider for StaticProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    async fn authenticate(&self, login: &UserLoginDto) -> Result<AuthOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match &self.behaviour {
            Behaviour::Grant(user) => Ok(AuthOutcome::Granted(AuthData::Database {
                user: user.clone(),
                migrated: false,
            })),
            Behaviour::GrantExternal => Ok(AuthOutcome::Granted(AuthData::Ldap(
                LdapEntry {
                    dn: format!("uid={},dc=example,dc=org", login.login()),
                    ..Default::default()
                },
            ))),
            Behaviour::Deny => Ok(AuthOutcome::Denied(DenyReason::InvalidPassword)),
            Behaviour::Fail => Err(unavailable()),
            Behaviour::Hang => std::future::pending().await,
        }
    }
}
