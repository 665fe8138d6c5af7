use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

use crate::models::{ProfileRow, Role};
use crate::error::ApiError;

/// Check a login password against the argon2 PHC string stored in app_user.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id hash with a random salt, in PHC string form.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt = SaltString::generate(&mut PHOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| format!("argon2 hash error: {e}"))
}

/// Opaque bearer token handed to the client. Only its hash is stored.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hex of the token, as kept in session_token.session_token_hash.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Campaign creation and the radar are reserved for owners and assistants.
pub fn ensure_not_dentist(profile: &ProfileRow) -> Result<(), ApiError> {
    if profile.role == Role::Dentist {
        Err(ApiError::forbidden("Forbidden"))
    } else {
        Ok(())
    }
}

pub fn ensure_owner(profile: &ProfileRow) -> Result<(), ApiError> {
    if profile.role == Role::Owner {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the clinic owner can view analytics"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn password_round_trip() {
        let phc = hash_password("s3cret").unwrap();
        assert!(verify_password("s3cret", &phc));
        assert!(!verify_password("wrong", &phc));
        assert!(!verify_password("s3cret", "not-a-phc-string"));
    }

    #[test]
    fn token_hash_is_stable_hex() {
        let token = generate_access_token();
        assert_eq!(token.len(), 43);
        let h1 = hash_access_token(&token);
        assert_eq!(h1, hash_access_token(&token));
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_access_token("other"));
    }

    #[test]
    fn role_guards() {
        let mut profile = ProfileRow {
            id: Uuid::new_v4(),
            clinic_id: Uuid::new_v4(),
            role: Role::Dentist,
            full_name: None,
        };
        assert!(ensure_not_dentist(&profile).is_err());
        assert!(ensure_owner(&profile).is_err());

        profile.role = Role::Assistant;
        assert!(ensure_not_dentist(&profile).is_ok());
        assert!(ensure_owner(&profile).is_err());

        profile.role = Role::Owner;
        assert!(ensure_owner(&profile).is_ok());
    }
}
