//! Password strength checks and bcrypt hashes.

use std::fmt::{self, Debug};

use bcrypt::BcryptError;
use zxcvbn::{Score, zxcvbn};

use crate::Error;

/// A plain text password that is strong enough to be hashed and stored.
///
/// Only [PasswordHash::new] can read it back out.
pub struct ValidatedPassword(String);

impl ValidatedPassword {
    /// Accept `password` if zxcvbn scores it at least three out of four.
    ///
    /// # Errors
    ///
    /// Returns [Error::TooWeak] with zxcvbn's suggestions otherwise.
    pub fn new(password: &str) -> Result<Self, Error> {
        let entropy = zxcvbn(password, &[]);

        if entropy.score() >= Score::Three {
            return Ok(Self(password.to_owned()));
        }

        let advice = entropy
            .feedback()
            .map(|feedback| feedback.to_string())
            .unwrap_or_else(|| "try a longer password".to_owned());

        Err(Error::TooWeak(advice))
    }

    /// Skip the strength check, for seeding test users.
    #[cfg(test)]
    pub fn new_unchecked(password: &str) -> Self {
        Self(password.to_owned())
    }
}

impl Debug for ValidatedPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValidatedPassword(********)")
    }
}

/// A bcrypt hash in modular crypt format, as stored in the user table.
#[derive(Debug, Clone, PartialEq)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// bcrypt's recommended work factor.
    pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

    /// A cost 12 hash that belongs to no user.
    ///
    /// Unknown usernames are checked against it so they are rejected in the
    /// same time as a wrong password.
    pub(crate) const DUMMY: &str = "$2b$12$Gwf0uvxH3L7JLfo0CC/NCOoijK2vQ/wbgP.LeNup8vj6gg31IiFkm";

    /// Hash `password` with a fresh salt and `cost` rounds.
    ///
    /// # Errors
    ///
    /// Returns [Error::HashingError] if bcrypt rejects the cost or input.
    pub fn new(password: ValidatedPassword, cost: u32) -> Result<Self, Error> {
        bcrypt::hash(password.0, cost)
            .map(Self)
            .map_err(|error| Error::HashingError(error.to_string()))
    }

    /// Wrap a hash read from the database.
    pub fn new_unchecked(hash: &str) -> Self {
        Self(hash.to_owned())
    }

    /// Whether `password` produces this hash. Blocks for as long as the cost demands.
    pub fn verify(&self, password: &str) -> Result<bool, BcryptError> {
        bcrypt::verify(password, &self.0)
    }
}

impl AsRef<str> for PasswordHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        Error,
        auth::{PasswordHash, ValidatedPassword},
    };

    #[test]
    fn weak_passwords_are_rejected() {
        for password in ["", "password", "kasir123"] {
            let result = ValidatedPassword::new(password);

            assert!(matches!(result, Err(Error::TooWeak(_))), "{password:?}");
        }
    }

    #[test]
    fn strong_password_is_accepted() {
        assert!(ValidatedPassword::new("nasi goreng pedas tanpa kecap").is_ok());
    }

    #[test]
    fn debug_hides_password() {
        let password = ValidatedPassword::new_unchecked("hunter2");

        assert!(!format!("{password:?}").contains("hunter2"));
    }

    #[test]
    fn dummy_hash_is_well_formed() {
        let hash = PasswordHash::new_unchecked(PasswordHash::DUMMY);

        assert!(hash.verify("okon").unwrap());
        assert!(!hash.verify("anything else").unwrap());
    }

    #[test]
    fn hash_verifies_only_its_password() {
        let hash = PasswordHash::new(ValidatedPassword::new_unchecked("hunter2"), 4).unwrap();

        assert_ne!(hash.as_ref(), "hunter2");
        assert!(hash.verify("hunter2").unwrap());
        assert!(!hash.verify("hunter3").unwrap());
    }
}
