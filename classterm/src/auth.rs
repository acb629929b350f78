//! Auth Gate: login, registration, and the signed identity cookie.
//!
//! Passwords are stored as argon2 hashes. The `user` cookie carries
//! `username|expiry|signature`, where `expiry` is a unix timestamp (`0` for
//! a remembered, non-expiring session) and `signature` is a hex HMAC-SHA256
//! over `username|expiry`.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::Sha256;
use tracing::{info, warn};

use crate::credentials::{CredentialRecord, CredentialRepository};
use crate::error::{AuthError, RegistrationError};
use crate::identity::{ADMIN_USERNAME, Identity, is_valid_username};

type HmacSha256 = Hmac<Sha256>;

/// Name of the identity cookie.
pub const COOKIE_NAME: &str = "user";

/// Lifetime of a session when "remember me" is off.
pub const SESSION_TTL_SECS: i64 = 24 * 60 * 60;

/// Browser-side Max-Age for remembered sessions (ten years).
const REMEMBER_MAX_AGE_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// An issued identity cookie.
#[derive(Debug, Clone)]
pub struct SessionCookie {
    value: String,
    username: String,
    expires_at: Option<DateTime<Utc>>,
    secure: bool,
}

impl SessionCookie {
    /// Signed cookie value.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_persistent(&self) -> bool {
        self.expires_at.is_none()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// `Set-Cookie` header value for this session.
    pub fn set_cookie_header(&self) -> String {
        let max_age = match self.expires_at {
            Some(_) => SESSION_TTL_SECS,
            None => REMEMBER_MAX_AGE_SECS,
        };
        let mut cookie = format!(
            "{COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
            self.value
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Generate a random secret for signing cookies.
pub fn generate_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// [`hash_password`] on the blocking pool.
async fn hash_password_blocking(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| anyhow!("Password hashing task failed: {e}"))?
}

/// [`verify_password`] on the blocking pool.
async fn verify_password_blocking(password: &str, hash: String) -> Result<bool> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| anyhow!("Password verification task failed: {e}"))
}

/// Validates credentials and issues or resolves identity cookies.
pub struct AuthGate {
    store: Arc<dyn CredentialRepository>,
    /// Keyed MAC, cloned per signature
    mac: HmacSha256,
    secure_cookies: bool,
}

impl AuthGate {
    pub fn new(
        store: Arc<dyn CredentialRepository>,
        secret: impl AsRef<[u8]>,
        secure_cookies: bool,
    ) -> Result<Self> {
        let mac = HmacSha256::new_from_slice(secret.as_ref())
            .map_err(|e| anyhow!("Invalid cookie secret: {e}"))?;
        Ok(Self {
            store,
            mac,
            secure_cookies,
        })
    }

    /// The credential store this gate reads and writes.
    pub fn store(&self) -> &Arc<dyn CredentialRepository> {
        &self.store
    }

    /// Authenticate and issue a session cookie.
    ///
    /// On success the `remember` choice is written back to the store.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember: bool,
    ) -> Result<SessionCookie, AuthError> {
        self.login_at(username, password, remember, Utc::now()).await
    }

    /// [`login`](Self::login) with an explicit issue time.
    pub async fn login_at(
        &self,
        username: &str,
        password: &str,
        remember: bool,
        now: DateTime<Utc>,
    ) -> Result<SessionCookie, AuthError> {
        let Some(record) = self.store.get(username).await else {
            warn!(username = %username, "Login failed: unknown user");
            return Err(AuthError::UnknownUser(username.to_string()));
        };

        let matches = match record.password_hash {
            Some(hash) => verify_password_blocking(password, hash).await?,
            None => false,
        };
        if !matches {
            warn!(username = %username, "Login failed: bad password");
            return Err(AuthError::BadPassword(username.to_string()));
        }

        self.store.set_remember(username, remember).await?;

        let expires_at = (!remember).then(|| now + Duration::seconds(SESSION_TTL_SECS));
        let cookie = self.issue(username, expires_at);

        info!(
            username = %username,
            role = %Identity::new(username).role(),
            remember,
            "User logged in"
        );
        Ok(cookie)
    }

    /// Resolve a cookie value to an identity. `None` means anonymous.
    ///
    /// Never touches the store.
    pub fn resolve_identity(&self, cookie_value: &str) -> Option<Identity> {
        self.resolve_identity_at(cookie_value, Utc::now())
    }

    /// [`resolve_identity`](Self::resolve_identity) at an explicit instant.
    pub fn resolve_identity_at(&self, cookie_value: &str, now: DateTime<Utc>) -> Option<Identity> {
        let mut parts = cookie_value.rsplitn(3, '|');
        let signature = parts.next()?;
        let expiry = parts.next()?;
        let username = parts.next()?;

        if username.is_empty() {
            return None;
        }

        let signature = hex::decode(signature).ok()?;
        let mut mac = self.mac.clone();
        mac.update(format!("{username}|{expiry}").as_bytes());
        mac.verify_slice(&signature).ok()?;

        let expiry: i64 = expiry.parse().ok()?;
        if expiry != 0 && now.timestamp() >= expiry {
            return None;
        }

        Some(Identity::new(username))
    }

    /// `Set-Cookie` header value that clears the identity cookie.
    ///
    /// Valid whether or not the request carried a cookie.
    pub fn logout(&self) -> String {
        let mut cookie = format!("{COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if self.secure_cookies {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Create a new credential record with `remember` unset.
    pub async fn register(&self, username: &str, password: &str) -> Result<(), RegistrationError> {
        if !is_valid_username(username) {
            return Err(RegistrationError::InvalidUsername(username.to_string()));
        }
        if username == ADMIN_USERNAME || self.store.get(username).await.is_some() {
            return Err(RegistrationError::UserExists(username.to_string()));
        }
        if password.is_empty() {
            return Err(RegistrationError::MissingPassword);
        }

        let record = CredentialRecord {
            password_hash: Some(hash_password_blocking(password).await?),
            remember: None,
        };
        // Another request may have registered the name since the check above
        if !self.store.insert_new(username, record).await? {
            return Err(RegistrationError::UserExists(username.to_string()));
        }

        info!(username = %username, "User registered");
        Ok(())
    }

    /// Write (or overwrite) the admin record's password.
    pub async fn bootstrap_admin(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(anyhow!("Admin password must not be empty"));
        }
        self.store
            .set_password(ADMIN_USERNAME, hash_password_blocking(password).await?)
            .await?;
        info!("Admin credentials written");
        Ok(())
    }

    fn issue(&self, username: &str, expires_at: Option<DateTime<Utc>>) -> SessionCookie {
        let expiry = expires_at.map(|at| at.timestamp()).unwrap_or(0);
        let payload = format!("{username}|{expiry}");

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        SessionCookie {
            value: format!("{payload}|{signature}"),
            username: username.to_string(),
            // Round to whole seconds so the cookie and the struct agree
            expires_at: expires_at.and_then(|at| Utc.timestamp_opt(at.timestamp(), 0).single()),
            secure: self.secure_cookies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::JsonCredentialStore;
    use crate::identity::Role;
    use tempfile::TempDir;

    fn gate(temp: &TempDir) -> AuthGate {
        let store = JsonCredentialStore::open(temp.path().join("database.json")).unwrap();
        AuthGate::new(Arc::new(store), "test-secret", false).unwrap()
    }

    #[test]
    fn test_password_hash_roundtrip() {
        let hash = hash_password("pw1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("pw1", &hash));
        assert!(!verify_password("pw2", &hash));
        assert!(!verify_password("pw1", "not-a-hash"));
    }

    #[tokio::test]
    async fn test_register_twice_keeps_first_password() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        gate.register("carol", "pw1").await.unwrap();
        let err = gate.register("carol", "pw2").await.unwrap_err();
        assert!(matches!(err, RegistrationError::UserExists(_)));

        assert!(gate.login("carol", "pw1", false).await.is_ok());
        assert!(matches!(
            gate.login("carol", "pw2", false).await,
            Err(AuthError::BadPassword(_))
        ));
    }

    #[tokio::test]
    async fn test_register_leaves_remember_unset() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        gate.register("carol", "pw1").await.unwrap();
        let record = gate.store().get("carol").await.unwrap();
        assert_eq!(record.remember, None);
        assert_ne!(record.password_hash.as_deref(), Some("pw1"));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        assert!(matches!(
            gate.register("carol", "").await,
            Err(RegistrationError::MissingPassword)
        ));
        assert!(matches!(
            gate.register("", "pw").await,
            Err(RegistrationError::InvalidUsername(_))
        ));
        assert!(matches!(
            gate.register("a b", "pw").await,
            Err(RegistrationError::InvalidUsername(_))
        ));
        assert!(matches!(
            gate.register("admin", "pw").await,
            Err(RegistrationError::UserExists(_))
        ));
    }

    #[tokio::test]
    async fn test_login_errors() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.register("carol", "pw1").await.unwrap();

        assert!(matches!(
            gate.login("carol", "wrong", false).await,
            Err(AuthError::BadPassword(_))
        ));
        assert!(matches!(
            gate.login("nope", "x", false).await,
            Err(AuthError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_login_persists_remember_flag() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.register("carol", "pw1").await.unwrap();

        gate.login("carol", "pw1", true).await.unwrap();
        assert_eq!(gate.store().get("carol").await.unwrap().remember, Some(true));

        gate.login("carol", "pw1", false).await.unwrap();
        assert_eq!(gate.store().get("carol").await.unwrap().remember, Some(false));
    }

    #[tokio::test]
    async fn test_remembered_cookie_never_expires() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.register("carol", "pw1").await.unwrap();

        let now = Utc::now();
        let cookie = gate.login_at("carol", "pw1", true, now).await.unwrap();
        assert!(cookie.is_persistent());

        let far_future = now + Duration::days(3650);
        assert!(!cookie.is_expired_at(far_future));
        let identity = gate.resolve_identity_at(cookie.value(), far_future).unwrap();
        assert_eq!(identity.username(), "carol");
    }

    #[tokio::test]
    async fn test_default_cookie_expires_after_one_day() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.register("carol", "pw1").await.unwrap();

        let now = Utc::now();
        let cookie = gate.login_at("carol", "pw1", false, now).await.unwrap();
        assert!(!cookie.is_persistent());

        let before = now + Duration::hours(23);
        let after = now + Duration::days(1) + Duration::seconds(1);
        assert!(!cookie.is_expired_at(before));
        assert!(cookie.is_expired_at(after));
        assert!(gate.resolve_identity_at(cookie.value(), before).is_some());
        assert!(gate.resolve_identity_at(cookie.value(), after).is_none());
    }

    #[tokio::test]
    async fn test_tampered_cookie_is_anonymous() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);
        gate.register("carol", "pw1").await.unwrap();
        let cookie = gate.login("carol", "pw1", true).await.unwrap();

        let forged = cookie.value().replacen("carol", "admin", 1);
        assert!(gate.resolve_identity(&forged).is_none());
        assert!(gate.resolve_identity("admin").is_none());
        assert!(gate.resolve_identity("").is_none());
        assert!(gate.resolve_identity("admin|0|zz").is_none());

        let other = AuthGate::new(gate.store().clone(), "other-secret", false).unwrap();
        assert!(other.resolve_identity(cookie.value()).is_none());
    }

    #[tokio::test]
    async fn test_admin_bootstrap_and_login() {
        let temp = TempDir::new().unwrap();
        let gate = gate(&temp);

        gate.bootstrap_admin("root-pw").await.unwrap();
        let cookie = gate.login("admin", "root-pw", false).await.unwrap();
        let identity = gate.resolve_identity(cookie.value()).unwrap();
        assert_eq!(identity.role(), Role::Admin);

        // Re-bootstrapping replaces the password
        gate.bootstrap_admin("new-pw").await.unwrap();
        assert!(gate.login("admin", "root-pw", false).await.is_err());
        assert!(gate.login("admin", "new-pw", false).await.is_ok());
    }

    #[test]
    fn test_cookie_headers() {
        let temp = TempDir::new().unwrap();
        let store = JsonCredentialStore::open(temp.path().join("database.json")).unwrap();
        let gate = AuthGate::new(Arc::new(store), "s", true).unwrap();

        let session = gate.issue("carol", None);
        let header = session.set_cookie_header();
        assert!(header.starts_with("user=carol|0|"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("Secure"));
        assert!(header.contains(&format!("Max-Age={REMEMBER_MAX_AGE_SECS}")));

        let cleared = gate.logout();
        assert!(cleared.starts_with("user=;"));
        assert!(cleared.contains("Max-Age=0"));
        // Idempotent
        assert_eq!(cleared, gate.logout());
    }
}
