use serde::{Deserialize, Serialize};

/// Username/password pair for a private image registry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl RegistryAuth {
    /// Credentials are only meaningful with a username; an empty one yields `None`.
    pub fn from_parts(username: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let username = username.into();
        if username.is_empty() {
            return None;
        }
        Some(Self {
            username,
            password: password.into(),
        })
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_username_means_anonymous() {
        assert!(RegistryAuth::from_parts("", "secret").is_none());
        assert!(RegistryAuth::from_parts("bot", "").is_some());
    }

    #[test]
    fn debug_redacts_password() {
        let auth = RegistryAuth::from_parts("bot", "hunter2").unwrap();
        let dbg = format!("{auth:?}");
        assert!(dbg.contains("bot"));
        assert!(!dbg.contains("hunter2"));
    }
}
