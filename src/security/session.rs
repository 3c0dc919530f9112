use super::{AuthRequest, Authenticator, Identity, LoginOutcome, SetCookie};
use crate::error::DispatchError;
use crate::ids::SessionId;
use dashmap::DashMap;
use crate::config::SessionConfig;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Session cookie lifetime: 30 days.
pub const SESSION_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Persistence for established sessions.
pub trait SessionStore: Send + Sync {
    fn load(&self, session_id: &str) -> Option<Identity>;
    fn save(&self, session_id: &str, identity: Identity);
    fn remove(&self, session_id: &str) -> Option<Identity>;
}

/// In-process session store.
///
/// Sessions expire after the cookie lifetime; expired entries are dropped when
/// next loaded.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: DashMap<String, (Identity, Instant)>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::with_ttl(Duration::from_secs(SESSION_MAX_AGE_SECS))
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_id: &str) -> Option<Identity> {
        {
            let entry = self.sessions.get(session_id)?;
            let (identity, created) = entry.value();
            if created.elapsed() < self.ttl {
                return Some(identity.clone());
            }
        }
        self.sessions
            .remove_if(session_id, |_, (_, created)| created.elapsed() >= self.ttl);
        debug!("Expired session dropped");
        None
    }

    fn save(&self, session_id: &str, identity: Identity) {
        self.sessions
            .insert(session_id.to_string(), (identity, Instant::now()));
    }

    fn remove(&self, session_id: &str) -> Option<Identity> {
        self.sessions.remove(session_id).map(|(_, (identity, _))| identity)
    }
}

/// Credential strategy used by login: `Ok(None)` means the credentials were rejected.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credentials: &Value) -> Result<Option<Identity>, DispatchError>;
}

impl<F> CredentialVerifier for F
where
    F: Fn(&Value) -> Result<Option<Identity>, DispatchError> + Send + Sync,
{
    fn verify(&self, credentials: &Value) -> Result<Option<Identity>, DispatchError> {
        self(credentials)
    }
}

/// Cookie-session authenticator.
pub struct SessionAuthenticator<S, V> {
    cookie_name: String,
    store: S,
    verifier: V,
}

impl<S: SessionStore, V: CredentialVerifier> SessionAuthenticator<S, V> {
    pub fn new(cookie_name: impl Into<String>, store: S, verifier: V) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            store,
            verifier,
        }
    }

    /// Authenticator whose cookie is named by `session.key`.
    pub fn from_config(config: &SessionConfig, store: S, verifier: V) -> Self {
        Self::new(config.key.clone(), store, verifier)
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: SessionStore, V: CredentialVerifier> Authenticator for SessionAuthenticator<S, V> {
    fn identify(&self, req: &AuthRequest<'_>) -> Result<Option<Identity>, DispatchError> {
        Ok(req
            .get_cookie(&self.cookie_name)
            .and_then(|sid| self.store.load(sid)))
    }

    fn login(&self, req: &AuthRequest<'_>) -> Result<LoginOutcome, DispatchError> {
        let Some(identity) = self.verifier.verify(req.body)? else {
            debug!("Credentials rejected");
            return Err(DispatchError::unauthorized("Unauthorized access."));
        };

        let session_id = SessionId::new().to_string();
        self.store.save(&session_id, identity.clone());
        info!(identity = %identity.id, "Session established");

        Ok(LoginOutcome {
            identity,
            cookie: Some(SetCookie {
                name: self.cookie_name.clone(),
                value: session_id,
                max_age: Some(SESSION_MAX_AGE_SECS),
            }),
        })
    }

    fn logout(&self, req: &AuthRequest<'_>) -> Result<Option<SetCookie>, DispatchError> {
        let Some(sid) = req.get_cookie(&self.cookie_name) else {
            return Ok(None);
        };
        if let Some(identity) = self.store.remove(sid) {
            info!(identity = %identity.id, "Session closed");
        }
        Ok(Some(SetCookie {
            name: self.cookie_name.clone(),
            value: String::new(),
            max_age: Some(0),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn authenticator() -> SessionAuthenticator<MemorySessionStore, impl CredentialVerifier> {
        SessionAuthenticator::new(
            "sid",
            MemorySessionStore::default(),
            |body: &Value| -> Result<Option<Identity>, DispatchError> {
                Ok((body["username"] == "ada" && body["password"] == "secret")
                    .then(|| Identity::new("ada", json!({"role": "admin"}))))
            },
        )
    }

    fn request<'a>(
        headers: &'a HashMap<String, String>,
        cookies: &'a HashMap<String, String>,
        body: &'a Value,
    ) -> AuthRequest<'a> {
        AuthRequest {
            headers,
            cookies,
            body,
            identity: None,
        }
    }

    #[test]
    fn login_identify_logout_cycle() {
        let auth = authenticator();
        let headers = HashMap::new();
        let no_cookies = HashMap::new();
        let body = json!({"username": "ada", "password": "secret"});

        let outcome = auth.login(&request(&headers, &no_cookies, &body)).unwrap();
        assert_eq!(outcome.identity.id, "ada");
        let cookie = outcome.cookie.unwrap();
        assert_eq!(cookie.max_age, Some(SESSION_MAX_AGE_SECS));
        assert_eq!(auth.store().len(), 1);

        let cookies = HashMap::from([("sid".to_string(), cookie.value.clone())]);
        let identity = auth
            .identify(&request(&headers, &cookies, &Value::Null))
            .unwrap();
        assert_eq!(identity.map(|i| i.id), Some("ada".to_string()));

        let cleared = auth
            .logout(&request(&headers, &cookies, &Value::Null))
            .unwrap()
            .unwrap();
        assert_eq!(cleared.max_age, Some(0));
        assert!(auth.store().is_empty());
        assert!(auth
            .identify(&request(&headers, &cookies, &Value::Null))
            .unwrap()
            .is_none());
    }

    #[test]
    fn rejected_credentials_are_unauthorized() {
        let auth = authenticator();
        let headers = HashMap::new();
        let cookies = HashMap::new();
        let body = json!({"username": "ada", "password": "wrong"});
        let err = auth.login(&request(&headers, &cookies, &body)).unwrap_err();
        assert_eq!(err.status(), 401);
        assert!(auth.store().is_empty());
    }

    #[test]
    fn logout_without_session_is_a_no_op() {
        let auth = authenticator();
        let headers = HashMap::new();
        let cookies = HashMap::new();
        assert!(auth
            .logout(&request(&headers, &cookies, &Value::Null))
            .unwrap()
            .is_none());
    }

    #[test]
    fn cookie_name_comes_from_session_config() {
        let config = SessionConfig {
            key: "wp_session".to_string(),
        };
        let auth = SessionAuthenticator::from_config(
            &config,
            MemorySessionStore::default(),
            |_: &Value| -> Result<Option<Identity>, DispatchError> { Ok(None) },
        );
        assert_eq!(auth.cookie_name(), "wp_session");
    }

    #[test]
    fn expired_sessions_are_dropped_on_load() {
        let store = MemorySessionStore::with_ttl(Duration::ZERO);
        store.save("s1", Identity::new("ada", Value::Null));
        assert_eq!(store.len(), 1);
        assert!(store.load("s1").is_none());
        assert!(store.is_empty());

        let store = MemorySessionStore::default();
        store.save("s1", Identity::new("ada", Value::Null));
        assert_eq!(store.load("s1").map(|i| i.id), Some("ada".to_string()));
        assert_eq!(store.remove("s1").map(|i| i.id), Some("ada".to_string()));
    }
}
