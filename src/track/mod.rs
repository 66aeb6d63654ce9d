//! Failed attempts tracking.
//!
//! Attempts are appended rows; lockout is a windowed count over them, so
//! concurrent writers never race on a shared counter.

mod repository;

pub use repository::*;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, ServerError};

/// One tracked attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    /// Unix timestamp, in seconds.
    pub time: i64,
    /// Where the attempt came from, e.g. `login`.
    pub source: String,
    pub user_id: Option<i64>,
    ipv4: Option<Vec<u8>>,
    ipv6: Option<Vec<u8>>,
}

impl TrackRequest {
    /// Create a new [`TrackRequest`] from a textual IP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidArgument`] if `address` is not an IPv4
    /// or IPv6 address.
    pub fn new(
        time: i64,
        source: impl Into<String>,
        address: &str,
    ) -> Result<Self> {
        let binary = decode_address(address)?;
        let (ipv4, ipv6) = match binary.len() {
            4 => (Some(binary), None),
            _ => (None, Some(binary)),
        };

        Ok(Self {
            time,
            source: source.into(),
            user_id: None,
            ipv4,
            ipv6,
        })
    }

    /// Create a [`TrackRequest`] stamped with the current time.
    pub fn now(source: impl Into<String>, address: &str) -> Result<Self> {
        Self::new(chrono::Utc::now().timestamp(), source, address)
    }

    /// Attach the user the attempt targeted.
    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[inline]
    pub fn ipv4(&self) -> Option<&[u8]> {
        self.ipv4.as_deref()
    }

    #[inline]
    pub fn ipv6(&self) -> Option<&[u8]> {
        self.ipv6.as_deref()
    }
}

fn decode_address(address: &str) -> Result<Vec<u8>> {
    let ip = address.trim().parse::<IpAddr>().map_err(|_| {
        ServerError::InvalidArgument(format!("invalid IP address `{address}`"))
    })?;

    Ok(match ip {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    })
}

/// Store of tracked attempts.
#[async_trait]
pub trait TrackService: Send + Sync {
    /// Append an attempt.
    async fn add(&self, track: &TrackRequest) -> Result<()>;

    /// Count attempts with the same source and address made at or after
    /// `since`.
    async fn count_since(&self, track: &TrackRequest, since: i64) -> Result<i64>;
}

/// Lockout policy over a [`TrackService`].
#[derive(Clone)]
pub struct Tracker {
    store: Arc<dyn TrackService>,
    max_attempts: i64,
    window: i64,
}

impl Tracker {
    /// Create a new [`Tracker`].
    pub fn new(
        store: Arc<dyn TrackService>,
        max_attempts: i64,
        window: i64,
    ) -> Self {
        Self {
            store,
            max_attempts,
            window,
        }
    }

    /// Fail with [`ServerError::LockoutExceeded`] once the source reached the
    /// maximum number of attempts inside the window.
    pub async fn check(&self, track: &TrackRequest) -> Result<()> {
        let attempts = self
            .store
            .count_since(track, track.time - self.window)
            .await?;

        if attempts >= self.max_attempts {
            return Err(ServerError::LockoutExceeded { attempts });
        }

        Ok(())
    }

    /// Record a failed attempt.
    pub async fn add(&self, track: &TrackRequest) -> Result<()> {
        self.store.add(track).await
    }
}
