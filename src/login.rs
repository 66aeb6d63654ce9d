//! Login flow around the authentication pipeline.

use crate::error::{Result, ServerError};
use crate::service::AuthProviderService;
use crate::telemetry;
use crate::track::{TrackRequest, Tracker};
use crate::user::{UserDataDto, UserLoginDto};

/// Source tag of tracked login attempts.
pub const LOGIN_SOURCE: &str = "login";

#[derive(Clone)]
pub struct LoginService {
    tracker: Tracker,
}

impl LoginService {
    /// Create a new [`LoginService`].
    pub fn new(tracker: Tracker) -> Self {
        Self { tracker }
    }

    /// Authenticate `login` coming from `address`.
    ///
    /// # Errors
    ///
    /// - [`ServerError::InvalidArgument`] if `address` is not an IP address.
    /// - [`ServerError::LockoutExceeded`] if the address failed too often.
    /// - [`ServerError::InvalidCredentials`] if every provider denied; one
    ///   failed attempt is tracked.
    pub async fn login(
        &self,
        auth: &AuthProviderService,
        login: &UserLoginDto,
        address: &str,
    ) -> Result<UserDataDto> {
        let track = TrackRequest::now(LOGIN_SOURCE, address)?;

        if let Err(err) = self.tracker.check(&track).await {
            if let ServerError::LockoutExceeded { attempts } = err {
                tracing::warn!(
                    login = login.login(),
                    %address,
                    attempts,
                    "login refused, too many failed attempts"
                );
                telemetry::record_lockout(LOGIN_SOURCE);
            }
            return Err(err);
        }

        let user = auth
            .do_auth(login, |result| {
                telemetry::record_attempt(login.login(), result)
            })
            .await?;

        match user {
            Some(user) => {
                tracing::info!(
                    user_id = user.id,
                    login = user.login.as_str(),
                    "login succeeded"
                );
                Ok(user)
            },
            None => {
                self.tracker.add(&track).await?;
                tracing::info!(login = login.login(), %address, "login denied");
                Err(ServerError::InvalidCredentials)
            },
        }
    }
}
