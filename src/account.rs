//! Accounts and sessions.
//!
//! Sign-up first claims the email in `user_emails` under the store lock,
//! then writes a `users` profile and a separate `credentials` document
//! holding an argon2 hash. Sessions are a CLI convenience: library calls
//! always take an explicit [`Identity`].

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;
use uuid::Uuid;

use crate::config::AccountsConfig;
use crate::error::{Error, Result};
use crate::feed::FromDocument;
use crate::model::{fields, Identity, Role, User, CREDENTIALS, USERS, USER_EMAILS};
use crate::storage::Storage;
use crate::store::{server_timestamp, DocumentStore, Fields, Query};

/// Sign-up request.
#[derive(Debug, Clone, Default)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    /// Defaults to `accounts.default_role`.
    pub role: Option<String>,
}

pub struct Accounts {
    store: Arc<dyn DocumentStore>,
    config: AccountsConfig,
}

impl Accounts {
    pub fn new(store: Arc<dyn DocumentStore>, config: AccountsConfig) -> Self {
        Self { store, config }
    }

    pub fn sign_up(&self, request: SignUp) -> Result<User> {
        let email = normalize_email(&request.email)?;
        if request.password.is_empty() {
            return Err(Error::Validation("password is required".to_string()));
        }
        if request.password.chars().count() < self.config.min_password_len {
            return Err(Error::Validation(format!(
                "password must be at least {} characters",
                self.config.min_password_len
            )));
        }
        let role = match request.role.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Role::parse(raw)?,
            _ => self.config.default_role()?,
        };
        let display_name = request
            .display_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

        if self.find_user_by_email(&email)?.is_some() {
            return Err(Error::EmailInUse(email));
        }

        let password_hash = hash_password(&request.password)?;
        let uid = Ulid::new().to_string().to_ascii_lowercase();

        let mut claim = Fields::new();
        claim.insert(fields::UID.to_string(), Value::String(uid.clone()));
        if !self.store.create_document(USER_EMAILS, &email, claim)? {
            return Err(Error::EmailInUse(email));
        }

        let mut profile = Fields::new();
        profile.insert(fields::UID.to_string(), Value::String(uid.clone()));
        profile.insert(fields::EMAIL.to_string(), Value::String(email.clone()));
        profile.insert(fields::DISPLAY_NAME.to_string(), Value::String(display_name));
        profile.insert(fields::ROLE.to_string(), Value::String(role.as_str().to_string()));
        profile.insert(fields::CREATED_AT.to_string(), server_timestamp());
        profile.insert(fields::UPDATED_AT.to_string(), server_timestamp());

        let mut credentials = Fields::new();
        credentials.insert(fields::UID.to_string(), Value::String(uid.clone()));
        credentials.insert(fields::PASSWORD_HASH.to_string(), Value::String(password_hash));

        let written = self
            .store
            .set_document(USERS, &uid, profile)
            .and_then(|()| self.store.set_document(CREDENTIALS, &uid, credentials));
        if let Err(err) = written {
            self.discard_account(&email, &uid);
            return Err(err);
        }
        tracing::debug!(uid = %uid, role = %role, "account created");

        self.load_user(&uid)
    }

    /// Best-effort removal of a partially written account.
    fn discard_account(&self, email: &str, uid: &str) {
        for (collection, id) in [(CREDENTIALS, uid), (USERS, uid), (USER_EMAILS, email)] {
            match self.store.delete_document(collection, id) {
                Ok(_) | Err(Error::DocumentNotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(collection, id, error = %err, "failed to discard partial account")
                }
            }
        }
    }

    /// Check credentials. Unknown email and wrong password fail the same way.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email).map_err(|_| Error::InvalidCredentials)?;
        let user = self
            .find_user_by_email(&email)?
            .ok_or(Error::InvalidCredentials)?;

        let stored_hash = self
            .store
            .get_document(CREDENTIALS, &user.uid)?
            .and_then(|doc| doc.get_str(fields::PASSWORD_HASH).map(str::to_string))
            .ok_or(Error::InvalidCredentials)?;
        if !verify_password(password, &stored_hash)? {
            return Err(Error::InvalidCredentials);
        }

        tracing::debug!(uid = %user.uid, "signed in");
        Ok(user)
    }

    /// Current identity for a session, with the role read back from the
    /// user directory.
    pub fn identity_for(&self, session: &Session) -> Result<Identity> {
        let user = self.load_user(&session.uid).map_err(|err| match err {
            Error::UserNotFound(_) => Error::NotSignedIn,
            other => other,
        })?;
        Ok(Identity::new(user.uid, user.role))
    }

    fn load_user(&self, uid: &str) -> Result<User> {
        let doc = self
            .store
            .get_document(USERS, uid)?
            .ok_or_else(|| Error::UserNotFound(uid.to_string()))?;
        User::from_document(&doc)
            .map_err(|reason| Error::Store(format!("user {uid} is malformed: {reason}")))
    }

    /// The email claim is authoritative; profiles without one are matched
    /// by scanning `users`.
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        if let Some(claim) = self.store.get_document(USER_EMAILS, email)? {
            if let Some(uid) = claim.get_str(fields::UID) {
                return match self.load_user(uid) {
                    Ok(user) => Ok(Some(user)),
                    Err(Error::UserNotFound(_)) => Ok(None),
                    Err(err) => Err(err),
                };
            }
        }
        let docs = self.store.query(&Query::collection(USERS))?;
        Ok(docs
            .iter()
            .filter_map(|doc| User::from_document(doc).ok())
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }
}

fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() {
        return Err(Error::Validation("email is required".to_string()));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(Error::Validation(format!("invalid email '{email}'"))),
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| Error::PasswordHash(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Signed-in identity persisted in `session.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub uid: String,
    pub email: String,
    pub role: Role,
    pub signed_in_at: DateTime<Utc>,
}

impl Session {
    pub fn for_user(user: &User) -> Self {
        Self {
            uid: user.uid.clone(),
            email: user.email.clone(),
            role: user.role,
            signed_in_at: Utc::now(),
        }
    }

    pub fn load(storage: &Storage) -> Result<Option<Self>> {
        storage.read_json_opt(&storage.session_file())
    }

    pub fn save(&self, storage: &Storage) -> Result<()> {
        storage.write_json(&storage.session_file(), self)
    }

    /// Remove the session; returns whether one existed.
    pub fn clear(storage: &Storage) -> Result<bool> {
        storage.remove_file(&storage.session_file())
    }
}
