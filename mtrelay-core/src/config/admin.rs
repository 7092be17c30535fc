use argon2::{Argon2, PasswordHash, PasswordVerifier};

/// Control surface authentication.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    /// Argon2 PHC string of the control token. `None` leaves the guarded
    /// routes open.
    pub token_hash: Option<String>,
}

impl AdminConfig {
    pub fn new(token_hash: Option<String>) -> Self {
        Self { token_hash }
    }

    pub fn is_open(&self) -> bool {
        self.token_hash.is_none()
    }

    /// `true` when no token is configured or `presented` matches the hash.
    pub fn authorize(&self, presented: Option<&str>) -> bool {
        let Some(hash) = &self.token_hash else {
            return true;
        };
        let Some(presented) = presented else {
            return false;
        };
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(presented.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::{
        PasswordHasher,
        password_hash::{SaltString, rand_core::OsRng},
    };

    #[test]
    fn test_authorize() {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"control-token", &salt)
            .unwrap()
            .to_string();
        let admin = AdminConfig::new(Some(hash));

        assert!(admin.authorize(Some("control-token")));
        assert!(!admin.authorize(Some("wrong")));
        assert!(!admin.authorize(None));

        let open = AdminConfig::default();
        assert!(open.is_open());
        assert!(open.authorize(None));
    }

    #[test]
    fn test_garbage_hash_rejects() {
        let admin = AdminConfig::new(Some("not-a-phc-string".to_string()));
        assert!(!admin.authorize(Some("anything")));
    }
}
