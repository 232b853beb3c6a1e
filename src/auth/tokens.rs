//! Account links sent by email: activation and password reset.
//!
//! A link carries the user id as URL-safe base64 plus a JWT whose `fp`
//! claim fingerprints the account state. Activating the account or changing
//! the password changes the fingerprint, so every link works at most once.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::User;

pub const PURPOSE_ACTIVATION: &str = "activate";
pub const PURPOSE_PASSWORD_RESET: &str = "password-reset";

pub fn encode_uid(user_id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(user_id.to_string())
}

pub fn decode_uid(encoded: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Uuid::parse_str(&text).ok()
}

pub fn account_fingerprint(user: &User) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.password_hash.as_bytes());
    hasher.update([user.is_active as u8]);
    if let Some(last_login) = user.last_login {
        hasher.update(last_login.and_utc().timestamp().to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_survives_encoding() {
        let id = Uuid::new_v4();
        assert_eq!(decode_uid(&encode_uid(id)), Some(id));
    }

    #[test]
    fn garbage_uid_is_rejected() {
        assert_eq!(decode_uid("not-base64!"), None);
        assert_eq!(decode_uid(&URL_SAFE_NO_PAD.encode("plain text")), None);
    }
}
