//! Cryptogragic logics.
//!
//! Current passwords are stored as keyed Argon2id PHC strings. Legacy digests
//! only exist so that old accounts can be verified once and migrated.

use std::sync::LazyLock;

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Argon2, Params, Version};
use md5::Md5;
use rand::rngs::OsRng;
use regex_lite::Regex;
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::config::Argon2 as ArgonConfig;

/// Setting part (`$2y$NN$` followed by the 22 chars salt) of a bcrypt hash.
static BCRYPT_SETTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\$2[abxy]\$\d{2}\$[./A-Za-z0-9]{22}")
        .expect("bcrypt setting pattern is valid")
});

type Result<T> = std::result::Result<T, CryptoError>;

const DECOY_PASSWORD: &str = "keyward-decoy-password";

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("argon2 error: {0}")]
    Argon2(String),
    #[error("hash key is empty")]
    MissingKey,
}

/// Keyed password hasher.
///
/// The application secret is fed to Argon2id as its secret input, so a
/// leaked database alone is not enough to brute force passwords.
pub struct Hash {
    key: Zeroizing<Vec<u8>>,
    params: Params,
    /// Keyed hash of a throwaway password, verified for unknown logins.
    decoy: String,
    #[cfg(test)]
    verifications: std::sync::atomic::AtomicUsize,
}

impl Hash {
    /// Create a new [`Hash`].
    pub fn new(
        key: impl AsRef<[u8]>,
        config: Option<ArgonConfig>,
    ) -> Result<Self> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CryptoError::MissingKey);
        }

        let config = config.unwrap_or_default();
        let params = Params::new(
            config.memory_cost,
            config.iterations,
            config.parallelism,
            Some(config.hash_length),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        let mut hash = Self {
            key: Zeroizing::new(key.to_vec()),
            params,
            decoy: String::new(),
            #[cfg(test)]
            verifications: Default::default(),
        };
        hash.decoy = hash.hash_key(DECOY_PASSWORD)?;

        Ok(hash)
    }

    fn argon2(&self) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            self.key.as_slice(),
            argon2::Algorithm::Argon2id,
            Version::V0x13,
            self.params.clone(),
        )
        .map_err(|err| CryptoError::Argon2(err.to_string()))
    }

    /// Derive a keyed hash of `plain`.
    pub fn hash_key(&self, plain: impl AsRef<[u8]>) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()?
            .hash_password(plain.as_ref(), &salt)
            .map_err(|err| CryptoError::Argon2(err.to_string()))?;

        Ok(hash.to_string())
    }

    /// Check `plain` against a stored keyed hash.
    ///
    /// A stored value that is not a PHC string never matches.
    pub fn check_hash_key(&self, plain: impl AsRef<[u8]>, stored: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored) else {
            return false;
        };
        #[cfg(test)]
        self.verifications
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        match self.argon2() {
            Ok(argon2) => argon2.verify_password(plain.as_ref(), &parsed).is_ok(),
            Err(err) => {
                tracing::error!(error = %err, "cannot build keyed hasher");
                false
            },
        }
    }
}

impl Hash {
    /// Spend the same work as a real verification, for a login with no
    /// stored hash.
    pub fn check_decoy(&self, plain: impl AsRef<[u8]>) {
        let _ = self.check_hash_key(plain, &self.decoy);
    }

    #[cfg(test)]
    pub(crate) fn verifications(&self) -> usize {
        self.verifications.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Compare two strings without leaking the position of the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    constant_time_eq::constant_time_eq(a.as_bytes(), b.as_bytes())
}

/// Legacy `sha1(salt + password)` digest, hex encoded.
pub fn legacy_sha1(salt: &str, plain: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(salt.as_bytes());
    hasher.update(plain.as_bytes());

    hex::encode(hasher.finalize())
}

/// Legacy unsalted `md5(password)` digest, hex encoded.
pub fn legacy_md5(plain: &str) -> String {
    hex::encode(Md5::digest(plain.as_bytes()))
}

/// Legacy `crypt(password, salt)` check.
///
/// Old records stored a bcrypt setting string as salt, so the crypt output
/// is the stored hash itself when the password is right.
pub fn legacy_crypt_matches(plain: &str, salt: &str, stored: &str) -> bool {
    let Some(setting) = BCRYPT_SETTING.find(salt) else {
        return false;
    };

    stored.starts_with(setting.as_str())
        && bcrypt::verify(plain, stored).unwrap_or(false)
}

#[cfg(test)]
pub(crate) fn test_hash() -> Hash {
    let config = ArgonConfig {
        memory_cost: 256,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    };

    Hash::new(b"application-secret", Some(config)).unwrap()
}
