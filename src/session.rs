use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::api::TokenProvider;
use crate::data::AuthService;
use crate::model::LoginRequest;
use crate::storage;

/// Session key holding the signed-in identity.
pub const USER_KEY: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not logged in")]
    NotLoggedIn,
    #[error("{0}")]
    InvalidLogin(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub username: String,
    pub token: String,
    pub user_id: String,
    pub profile_id: String,
}

impl Identity {
    pub fn viewer(&self) -> Viewer {
        Viewer {
            profile_id: self.profile_id.clone(),
            username: self.username.clone(),
        }
    }
}

/// The signed-in reader as views see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub profile_id: String,
    pub username: String,
}

pub struct Manager {
    store: Arc<storage::Store>,
    current: RwLock<Option<Identity>>,
}

impl Manager {
    pub fn new(store: Arc<storage::Store>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Restores the identity persisted by an earlier run. A corrupt entry is
    /// dropped rather than reported.
    pub fn load_existing(&self) -> Result<Option<Identity>> {
        let Some(value) = self.store.get_value(USER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Identity>(&value.value) {
            Ok(identity) => {
                *self.current.write() = Some(identity.clone());
                Ok(Some(identity))
            }
            Err(err) => {
                tracing::warn!(error = %err, "session: discarding unreadable identity");
                self.store.remove_value(USER_KEY)?;
                Ok(None)
            }
        }
    }

    pub fn login(&self, identity: Identity) -> Result<()> {
        let raw = serde_json::to_string(&identity).context("session: encode identity")?;
        self.store.put_value(USER_KEY, &raw)?;
        tracing::info!(username = %identity.username, "session: logged in");
        *self.current.write() = Some(identity);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        self.store.remove_value(USER_KEY)?;
        if let Some(identity) = self.current.write().take() {
            tracing::info!(username = %identity.username, "session: logged out");
        }
        Ok(())
    }

    pub fn current(&self) -> Option<Identity> {
        self.current.read().clone()
    }

    pub fn viewer(&self) -> Option<Viewer> {
        self.current.read().as_ref().map(Identity::viewer)
    }

    pub fn profile_id(&self) -> Result<String> {
        self.current
            .read()
            .as_ref()
            .map(|identity| identity.profile_id.clone())
            .ok_or_else(|| SessionError::NotLoggedIn.into())
    }

    pub fn authenticate(
        &self,
        auth: &dyn AuthService,
        username: &str,
        password: &str,
    ) -> Result<Identity> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(SessionError::InvalidLogin("Please fill in all fields.".into()).into());
        }
        let response = auth
            .login(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .context("session: login request")?;
        let identity = Identity {
            username: username.to_string(),
            token: response.token,
            user_id: response.user_id,
            profile_id: response.profile_id,
        };
        self.login(identity.clone())?;
        Ok(identity)
    }
}

impl TokenProvider for Manager {
    fn bearer_token(&self) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .map(|identity| identity.token.clone())
            .filter(|token| !token.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FixtureAuthService;
    use tempfile::tempdir;

    fn identity() -> Identity {
        Identity {
            username: "ana".into(),
            token: "tok".into(),
            user_id: "u1".into(),
            profile_id: "p1".into(),
        }
    }

    #[test]
    fn login_persists_across_managers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        let store = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(path.clone()),
            })
            .unwrap(),
        );
        let manager = Manager::new(store.clone());
        manager.login(identity()).unwrap();
        assert_eq!(manager.bearer_token().as_deref(), Some("tok"));
        drop(manager);

        let reopened = Manager::new(store);
        assert!(reopened.current().is_none());
        assert_eq!(reopened.load_existing().unwrap(), Some(identity()));
        assert_eq!(reopened.profile_id().unwrap(), "p1");
    }

    #[test]
    fn logout_clears_token() {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let manager = Manager::new(store.clone());
        manager.login(identity()).unwrap();
        manager.logout().unwrap();
        assert!(manager.bearer_token().is_none());
        assert!(store.get_value(USER_KEY).unwrap().is_none());
        let err = manager.profile_id().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NotLoggedIn)
        ));
    }

    #[test]
    fn corrupt_identity_is_dropped() {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        store.put_value(USER_KEY, "{not json").unwrap();
        let manager = Manager::new(store.clone());
        assert!(manager.load_existing().unwrap().is_none());
        assert!(store.get_value(USER_KEY).unwrap().is_none());
    }

    #[test]
    fn authenticate_requires_fields() {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let manager = Manager::new(store);
        let auth = FixtureAuthService::default();
        let err = manager.authenticate(&auth, " ", "pw").unwrap_err();
        assert_eq!(err.to_string(), "Please fill in all fields.");
    }

    #[test]
    fn authenticate_builds_identity() {
        let store = Arc::new(storage::Store::open_in_memory().unwrap());
        let manager = Manager::new(store);
        let auth = FixtureAuthService::default();
        let identity = manager.authenticate(&auth, "ana", "pw").unwrap();
        assert_eq!(identity.username, "ana");
        assert!(!identity.token.is_empty());
        assert_eq!(manager.current(), Some(identity));
    }
}
