//! Authentication provider orchestration.
//!
//! Providers are tried in registration order. The first authoritative grant
//! wins; a non-authoritative grant is only kept as a candidate in case no
//! authoritative provider grants.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, ServerError};
use crate::provider::{
    AuthData, AuthOutcome, AuthProvider, AuthResult, DenyReason, ProviderKind,
};
use crate::user::{UserDataDto, UserLoginDto, UserService};

/// Decision rules of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthPolicy {
    /// Resolve a non-authoritative grant when no authoritative provider
    /// granted.
    pub accept_non_authoritative: bool,
    /// An authoritative denial ends the pipeline.
    pub authoritative_deny_stops: bool,
    /// Upper bound of a single provider call.
    pub provider_timeout: Option<Duration>,
}

/// Ordered set of providers for one login attempt.
pub struct AuthProviderService {
    providers: Vec<Box<dyn AuthProvider>>,
    users: Arc<dyn UserService>,
    policy: AuthPolicy,
}

impl AuthProviderService {
    /// Create a new [`AuthProviderService`] without providers.
    pub fn new(users: Arc<dyn UserService>, policy: AuthPolicy) -> Self {
        Self {
            providers: Vec::new(),
            users,
            policy,
        }
    }

    /// Append a provider after the ones already registered.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ProviderAlreadyRegistered`] if a provider of the
    /// same kind is registered.
    pub fn register(&mut self, provider: Box<dyn AuthProvider>) -> Result<()> {
        let kind = provider.kind();
        if self.providers.iter().any(|p| p.kind() == kind) {
            return Err(ServerError::ProviderAlreadyRegistered(kind));
        }

        self.providers.push(provider);
        Ok(())
    }

    /// Drop every registered provider.
    pub fn reset(&mut self) {
        self.providers.clear();
    }

    /// Registered kinds, in order.
    pub fn providers(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|p| p.kind()).collect()
    }

    async fn attempt(
        &self,
        provider: &dyn AuthProvider,
        login: &UserLoginDto,
    ) -> AuthResult {
        let kind = provider.kind();
        let outcome = match self.policy.provider_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, provider.authenticate(login))
                    .await
                    .unwrap_or_else(|_| Err(ServerError::Timeout(limit)))
            },
            None => provider.authenticate(login).await,
        };

        match outcome {
            Ok(outcome) => AuthResult {
                provider: kind,
                authoritative: provider.is_authoritative(),
                outcome,
            },
            // An unreachable backend never gets the last word.
            Err(err) => {
                tracing::error!(
                    provider = %kind,
                    login = login.login(),
                    error = %err,
                    "authentication provider failed"
                );
                AuthResult {
                    provider: kind,
                    authoritative: false,
                    outcome: AuthOutcome::Denied(DenyReason::Unavailable(
                        err.to_string(),
                    )),
                }
            },
        }
    }

    /// Run the pipeline for `login`.
    ///
    /// `on_attempt` sees every provider result, granted or not. Returns the
    /// resolved user, or `None` when the attempt is denied.
    ///
    /// # Errors
    ///
    /// Only when resolving a grant into a stored user fails; provider
    /// failures count as denials.
    pub async fn do_auth<F>(
        &self,
        login: &UserLoginDto,
        mut on_attempt: F,
    ) -> Result<Option<UserDataDto>>
    where
        F: FnMut(&AuthResult) + Send,
    {
        let mut candidate: Option<AuthResult> = None;

        for provider in &self.providers {
            let result = self.attempt(provider.as_ref(), login).await;
            on_attempt(&result);

            match (result.granted(), result.authoritative) {
                (true, true) => return self.resolve(login, result).await,
                (true, false) => {
                    candidate.get_or_insert(result);
                },
                (false, true) if self.policy.authoritative_deny_stops => {
                    tracing::debug!(
                        provider = %result.provider,
                        "authoritative denial ends pipeline"
                    );
                    return Ok(None);
                },
                (false, _) => {},
            }
        }

        match candidate {
            Some(result) if self.policy.accept_non_authoritative => {
                self.resolve(login, result).await
            },
            Some(result) => {
                tracing::debug!(
                    provider = %result.provider,
                    "non-authoritative grant discarded"
                );
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn resolve(
        &self,
        login: &UserLoginDto,
        result: AuthResult,
    ) -> Result<Option<UserDataDto>> {
        match result.outcome {
            AuthOutcome::Granted(AuthData::Database { user, .. }) => Ok(Some(user)),
            AuthOutcome::Granted(_) => {
                match self.users.get_by_login(login.login()).await {
                    Ok(user) => Ok(Some(user)),
                    Err(ServerError::NotFound) => {
                        tracing::warn!(
                            provider = %result.provider,
                            login = login.login(),
                            "granted login has no local account"
                        );
                        Ok(None)
                    },
                    Err(err) => Err(err),
                }
            },
            AuthOutcome::Denied(_) => Ok(None),
        }
    }
}
