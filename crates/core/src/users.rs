//! User accounts and the active session.
//!
//! Registered users live as one JSON array under the `users` key, in registration order. The
//! active session is a separate `currentUser` document holding the user's profile without the
//! credential. The session is a cached projection: it is refreshed whenever that user's profile
//! or password is updated and cleared when the user is deleted, but it is not re-validated
//! against `users` on every read.
//!
//! ## Uniqueness
//!
//! `save_user` appends unconditionally. Only [`UserStore::register`] checks that the id and
//! email are unused, so callers that bypass registration can create duplicates; lookups then
//! return the first match.
//!
//! ## Failure signalling
//!
//! Misses are `None`/`false`. A failed login does not say whether the identifier or the password
//! was wrong. Only storage faults surface as `Err`.

use crate::config::CoreConfig;
use crate::constants::{CURRENT_USER_KEY, USERS_KEY};
use crate::password::PasswordHash;
use crate::storage::{read_collection, write_collection, KeyValueStore};
use crate::validation::validate_registration;
use crate::{PortalError, PortalResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A user as seen by the rest of the portal: everything except the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub date_of_birth: String,
    pub gender: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurance_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<DateTime<Utc>>,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A stored account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub password: PasswordHash,
}

impl User {
    pub fn new(profile: UserProfile, password: PasswordHash) -> Self {
        Self { profile, password }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn email(&self) -> &str {
        &self.profile.email
    }
}

/// Partial profile edit.
///
/// There is no `id` field: an account's id cannot be changed through an update.
/// `password` is plaintext here and is hashed when the update is applied.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub blood_type: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
    pub password: Option<String>,
}

impl UserUpdate {
    fn apply(self, user: &mut User, iterations: u32) {
        let profile = &mut user.profile;
        fn set(target: &mut String, value: Option<String>) {
            if let Some(v) = value {
                *target = v;
            }
        }
        fn set_opt(target: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *target = value;
            }
        }

        set(&mut profile.first_name, self.first_name);
        set(&mut profile.last_name, self.last_name);
        set(&mut profile.email, self.email);
        set(&mut profile.date_of_birth, self.date_of_birth);
        set(&mut profile.gender, self.gender);
        set(&mut profile.phone, self.phone);
        set_opt(&mut profile.address, self.address);
        set_opt(&mut profile.emergency_contact, self.emergency_contact);
        set_opt(&mut profile.blood_type, self.blood_type);
        set_opt(&mut profile.insurance_provider, self.insurance_provider);
        set_opt(&mut profile.insurance_number, self.insurance_number);

        if let Some(password) = self.password {
            user.password = PasswordHash::create(&password, iterations);
        }
    }
}

/// Raw registration form values.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub date_of_birth: String,
    pub gender: String,
    pub phone: String,
    pub address: Option<String>,
    pub emergency_contact: Option<String>,
    pub blood_type: Option<String>,
    pub insurance_provider: Option<String>,
    pub insurance_number: Option<String>,
    pub terms_accepted: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Registry of user accounts plus the single active session.
#[derive(Clone)]
pub struct UserStore {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn KeyValueStore>,
}

impl UserStore {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { cfg, store }
    }

    /// Appends `user` to the registry. No uniqueness check.
    pub fn save_user(&self, user: User) -> PortalResult<()> {
        let mut users = self.get_users()?;
        users.push(user);
        write_collection(self.store.as_ref(), USERS_KEY, &users)
    }

    /// All users in insertion order; empty when nothing is stored.
    pub fn get_users(&self) -> PortalResult<Vec<User>> {
        read_collection(self.store.as_ref(), USERS_KEY)
    }

    pub fn get_user_by_email(&self, email: &str) -> PortalResult<Option<User>> {
        Ok(self.get_users()?.into_iter().find(|u| u.email() == email))
    }

    pub fn get_user_by_id(&self, id: &str) -> PortalResult<Option<User>> {
        Ok(self.get_users()?.into_iter().find(|u| u.id() == id))
    }

    pub fn set_current_user(&self, profile: &UserProfile) -> PortalResult<()> {
        let raw = serde_json::to_string(profile).map_err(|source| PortalError::Serialization {
            key: CURRENT_USER_KEY.to_string(),
            source,
        })?;
        self.store.set(CURRENT_USER_KEY, &raw)
    }

    /// The active session, or `None` when there is none or the stored document is unreadable.
    pub fn get_current_user(&self) -> PortalResult<Option<UserProfile>> {
        let Some(raw) = self.store.get(CURRENT_USER_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                tracing::warn!("ignoring unreadable session document: {}", e);
                Ok(None)
            }
        }
    }

    pub fn clear_current_user(&self) -> PortalResult<()> {
        self.store.remove(CURRENT_USER_KEY)
    }

    /// Signs in by email or id.
    ///
    /// On success the session is replaced with the matching user's profile, which is also
    /// returned. Every failure returns `None`.
    ///
    /// An unknown identifier still pays for one password derivation, so response time does not
    /// reveal which accounts exist.
    pub fn login(&self, identifier: &str, password: &str) -> PortalResult<Option<UserProfile>> {
        let mut candidates = self
            .get_users()?
            .into_iter()
            .filter(|u| u.email() == identifier || u.id() == identifier)
            .peekable();

        let user = if candidates.peek().is_none() {
            let _ = self.miss_hash().verify(password);
            None
        } else {
            candidates.find(|u| u.password.verify(password))
        };

        match user {
            Some(user) => {
                if user.password.iterations() < self.cfg.password_hash_iterations() {
                    tracing::debug!(
                        user_id = %user.profile.id,
                        iterations = user.password.iterations(),
                        "stored password hash uses fewer rounds than configured"
                    );
                }
                self.set_current_user(&user.profile)?;
                tracing::info!(user_id = %user.profile.id, "user logged in");
                Ok(Some(user.profile))
            }
            None => {
                tracing::debug!("login rejected");
                Ok(None)
            }
        }
    }

    fn miss_hash(&self) -> PasswordHash {
        PasswordHash::unmatchable(self.cfg.password_hash_iterations())
    }

    /// Ends the session. The registry is untouched.
    pub fn logout(&self) -> PortalResult<()> {
        self.clear_current_user()
    }

    /// Merges `update` into the user with `id`.
    ///
    /// Returns `false` if no such user exists. If the user is the active session, the session
    /// projection is rewritten from the updated record.
    pub fn update_user(&self, id: &str, update: UserUpdate) -> PortalResult<bool> {
        let mut users = self.get_users()?;
        let Some(index) = users.iter().position(|u| u.id() == id) else {
            tracing::debug!(user_id = %id, "update for unknown user");
            return Ok(false);
        };

        update.apply(&mut users[index], self.cfg.password_hash_iterations());
        write_collection(self.store.as_ref(), USERS_KEY, &users)?;

        if let Some(current) = self.get_current_user()? {
            if current.id == id {
                self.set_current_user(&users[index].profile)?;
            }
        }

        Ok(true)
    }

    /// Removes every user with `id`, ending the session if it belonged to them.
    pub fn delete_user(&self, id: &str) -> PortalResult<bool> {
        let users = self.get_users()?;
        let before = users.len();
        let remaining: Vec<User> = users.into_iter().filter(|u| u.id() != id).collect();

        if remaining.len() == before {
            return Ok(false);
        }

        write_collection(self.store.as_ref(), USERS_KEY, &remaining)?;

        if let Some(current) = self.get_current_user()? {
            if current.id == id {
                self.clear_current_user()?;
            }
        }

        tracing::info!(user_id = %id, "user deleted");
        Ok(true)
    }

    /// True iff the user exists and `password` matches the stored credential.
    pub fn validate_password(&self, id: &str, password: &str) -> PortalResult<bool> {
        Ok(self
            .get_user_by_id(id)?
            .map(|u| u.password.verify(password))
            .unwrap_or(false))
    }

    /// Replaces the password after checking the current one.
    pub fn change_password(
        &self,
        id: &str,
        current_password: &str,
        new_password: &str,
    ) -> PortalResult<bool> {
        if !self.validate_password(id, current_password)? {
            return Ok(false);
        }

        self.update_user(
            id,
            UserUpdate {
                password: Some(new_password.to_string()),
                ..UserUpdate::default()
            },
        )
    }

    /// Validates a registration form, checks id/email are unused and stores the new account.
    ///
    /// # Errors
    ///
    /// - `PortalError::Validation` with per-field messages when the form is invalid
    /// - `PortalError::UserExists` when the id or email is already registered
    pub fn register(&self, form: Registration) -> PortalResult<UserProfile> {
        validate_registration(&form)?;

        let id = form.id.trim().to_string();
        let email = form.email.trim().to_string();
        let exists = self
            .get_users()?
            .iter()
            .any(|u| u.id() == id || u.email() == email);
        if exists {
            return Err(PortalError::UserExists);
        }

        let profile = UserProfile {
            id,
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
            email,
            date_of_birth: form.date_of_birth.trim().to_string(),
            gender: form.gender.trim().to_string(),
            phone: form.phone.trim().to_string(),
            address: non_blank(form.address),
            emergency_contact: non_blank(form.emergency_contact),
            blood_type: non_blank(form.blood_type),
            insurance_provider: non_blank(form.insurance_provider),
            insurance_number: non_blank(form.insurance_number),
            registration_date: Some(Utc::now()),
        };
        let password = PasswordHash::create(&form.password, self.cfg.password_hash_iterations());

        self.save_user(User::new(profile.clone(), password))?;
        tracing::info!(user_id = %profile.id, "user registered");

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_PASSWORD_HASH_ITERATIONS;
    use crate::storage::{FileStore, MemoryStore};
    use std::path::PathBuf;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn test_cfg() -> Arc<CoreConfig> {
        Arc::new(
            CoreConfig::new(PathBuf::from("unused"), MIN_PASSWORD_HASH_ITERATIONS, 5)
                .expect("CoreConfig::new should succeed"),
        )
    }

    fn test_store() -> UserStore {
        UserStore::new(test_cfg(), Arc::new(MemoryStore::new()))
    }

    fn registration(id: &str, email: &str) -> Registration {
        Registration {
            id: id.into(),
            first_name: "Amira".into(),
            last_name: "Saleh".into(),
            email: email.into(),
            password: "secret123".into(),
            confirm_password: "secret123".into(),
            date_of_birth: "1990-04-12".into(),
            gender: "female".into(),
            phone: "01001234567".into(),
            blood_type: Some("O+".into()),
            address: Some("   ".into()),
            terms_accepted: true,
            ..Registration::default()
        }
    }

    fn raw_user(id: &str, email: &str, first_name: &str) -> User {
        User::new(
            UserProfile {
                id: id.into(),
                first_name: first_name.into(),
                last_name: "Test".into(),
                email: email.into(),
                date_of_birth: "1985-01-01".into(),
                gender: "male".into(),
                phone: "01001234567".into(),
                address: None,
                emergency_contact: None,
                blood_type: None,
                insurance_provider: None,
                insurance_number: None,
                registration_date: None,
            },
            PasswordHash::create("secret123", MIN_PASSWORD_HASH_ITERATIONS),
        )
    }

    #[test]
    fn test_get_users_empty_when_nothing_stored() {
        let users = test_store();
        assert!(users.get_users().unwrap().is_empty());
        assert!(users.get_user_by_id("1010101010").unwrap().is_none());
        assert!(users.get_current_user().unwrap().is_none());
    }

    #[test]
    fn test_save_user_does_not_reject_duplicates() {
        let users = test_store();
        users.save_user(raw_user("1010101010", "a@b.com", "First")).unwrap();
        users.save_user(raw_user("1010101010", "c@d.com", "Second")).unwrap();

        assert_eq!(users.get_users().unwrap().len(), 2);
        let found = users.get_user_by_id("1010101010").unwrap().unwrap();
        assert_eq!(found.profile.first_name, "First");
    }

    #[test]
    fn test_distinct_ids_resolve_to_distinct_users() {
        let users = test_store();
        users.save_user(raw_user("1111111111", "a@b.com", "A")).unwrap();
        users.save_user(raw_user("2222222222", "c@d.com", "B")).unwrap();

        let a = users.get_user_by_id("1111111111").unwrap().unwrap();
        let b = users.get_user_by_id("2222222222").unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(
            users.get_user_by_email("c@d.com").unwrap().unwrap().id(),
            "2222222222"
        );
    }

    #[test]
    fn test_login_by_email_returns_profile_without_password() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        let profile = users.login("a@b.com", "secret123").unwrap().unwrap();
        assert_eq!(profile.id, "1010101010");

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password").is_none());

        assert_eq!(users.get_current_user().unwrap(), Some(profile));
    }

    #[test]
    fn test_login_by_id_with_wrong_password_is_not_found() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        assert!(users.login("1010101010", "wrong").unwrap().is_none());
        assert!(users.get_current_user().unwrap().is_none());
    }

    #[test]
    fn test_login_unknown_identifier_is_not_found() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        assert!(users.login("nobody@b.com", "secret123").unwrap().is_none());
    }

    #[test]
    fn test_login_miss_derives_at_configured_rounds() {
        let cfg = Arc::new(CoreConfig::new(PathBuf::from("unused"), 4_321, 5).unwrap());
        let users = UserStore::new(cfg, Arc::new(MemoryStore::new()));

        assert_eq!(users.miss_hash().iterations(), 4_321);
    }

    #[test]
    fn test_login_unknown_identifier_costs_a_derivation() {
        fn fastest_of_three(f: impl Fn()) -> Duration {
            (0..3)
                .map(|_| {
                    let start = Instant::now();
                    f();
                    start.elapsed()
                })
                .min()
                .unwrap()
        }

        let cfg = Arc::new(CoreConfig::new(PathBuf::from("unused"), 20_000, 5).unwrap());
        let users = UserStore::new(cfg, Arc::new(MemoryStore::new()));
        users.register(registration("1010101010", "a@b.com")).unwrap();

        let unknown = fastest_of_three(|| {
            assert!(users.login("nobody@b.com", "secret123").unwrap().is_none());
        });
        let wrong = fastest_of_three(|| {
            assert!(users.login("a@b.com", "wrong-pass").unwrap().is_none());
        });

        // Both paths run one 20k-round derivation; without it the miss path is microseconds
        assert!(
            unknown * 4 >= wrong,
            "unknown identifier took {:?}, wrong password took {:?}",
            unknown,
            wrong
        );
    }

    #[test]
    fn test_login_by_id_succeeds() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        assert!(users.login("1010101010", "secret123").unwrap().is_some());
    }

    #[test]
    fn test_logout_clears_session_only() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();
        users.login("a@b.com", "secret123").unwrap();

        users.logout().unwrap();

        assert!(users.get_current_user().unwrap().is_none());
        assert_eq!(users.get_users().unwrap().len(), 1);
    }

    #[test]
    fn test_update_user_refreshes_session() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();
        users.login("a@b.com", "secret123").unwrap();

        let updated = users
            .update_user(
                "1010101010",
                UserUpdate {
                    phone: Some("01119998888".into()),
                    insurance_provider: Some("Misr Insurance".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();
        assert!(updated);

        let session = users.get_current_user().unwrap().unwrap();
        assert_eq!(session.phone, "01119998888");
        assert_eq!(session.insurance_provider.as_deref(), Some("Misr Insurance"));
        assert_eq!(session.blood_type.as_deref(), Some("O+"));
    }

    #[test]
    fn test_update_other_user_leaves_session_alone() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();
        users.register(registration("2020202020", "c@d.com")).unwrap();
        users.login("a@b.com", "secret123").unwrap();

        users
            .update_user(
                "2020202020",
                UserUpdate {
                    first_name: Some("Omar".into()),
                    ..UserUpdate::default()
                },
            )
            .unwrap();

        let session = users.get_current_user().unwrap().unwrap();
        assert_eq!(session.id, "1010101010");
        assert_eq!(session.first_name, "Amira");
    }

    #[test]
    fn test_update_unknown_user_returns_false() {
        let users = test_store();
        assert!(!users.update_user("404", UserUpdate::default()).unwrap());
    }

    #[test]
    fn test_delete_user_ends_their_session() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();
        users.login("a@b.com", "secret123").unwrap();

        assert!(users.delete_user("1010101010").unwrap());
        assert!(users.get_current_user().unwrap().is_none());
        assert!(users.get_users().unwrap().is_empty());
        assert!(!users.delete_user("1010101010").unwrap());
    }

    #[test]
    fn test_change_password_wrong_current_leaves_password() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        assert!(!users
            .change_password("1010101010", "not-it", "newsecret1")
            .unwrap());
        assert!(users.validate_password("1010101010", "secret123").unwrap());
        assert!(!users.validate_password("1010101010", "newsecret1").unwrap());
    }

    #[test]
    fn test_change_password_success() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();
        users.login("1010101010", "secret123").unwrap();

        assert!(users
            .change_password("1010101010", "secret123", "newsecret1")
            .unwrap());
        assert!(users.login("1010101010", "newsecret1").unwrap().is_some());
        assert!(users.login("1010101010", "secret123").unwrap().is_none());
    }

    #[test]
    fn test_validate_password_unknown_user() {
        let users = test_store();
        assert!(!users.validate_password("404", "secret123").unwrap());
    }

    #[test]
    fn test_corrupt_session_reads_as_none() {
        let store = Arc::new(MemoryStore::new());
        store.set(CURRENT_USER_KEY, "{\"id\":").unwrap();
        let users = UserStore::new(test_cfg(), store);

        assert!(users.get_current_user().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_user_collection_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(USERS_KEY, "not json").unwrap();
        let users = UserStore::new(test_cfg(), store);

        assert!(matches!(
            users.get_users(),
            Err(PortalError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_register_rejects_existing_id_or_email() {
        let users = test_store();
        users.register(registration("1010101010", "a@b.com")).unwrap();

        assert!(matches!(
            users.register(registration("1010101010", "x@y.com")),
            Err(PortalError::UserExists)
        ));
        assert!(matches!(
            users.register(registration("2020202020", "a@b.com")),
            Err(PortalError::UserExists)
        ));
    }

    #[test]
    fn test_register_rejects_invalid_form() {
        let users = test_store();
        let mut form = registration("1010101010", "a@b.com");
        form.confirm_password = "different".into();

        assert!(matches!(
            users.register(form),
            Err(PortalError::Validation(_))
        ));
        assert!(users.get_users().unwrap().is_empty());
    }

    #[test]
    fn test_register_normalises_optional_fields() {
        let users = test_store();
        let profile = users.register(registration("1010101010", "a@b.com")).unwrap();

        assert_eq!(profile.address, None);
        assert_eq!(profile.blood_type.as_deref(), Some("O+"));
        assert!(profile.registration_date.is_some());
    }

    #[test]
    fn test_stored_document_has_no_plaintext_password() {
        let store = Arc::new(MemoryStore::new());
        let users = UserStore::new(test_cfg(), store.clone());
        users.register(registration("1010101010", "a@b.com")).unwrap();

        let raw = store.get(USERS_KEY).unwrap().unwrap();
        assert!(!raw.contains("secret123"));
        assert!(raw.contains("\"firstName\":\"Amira\""));
    }

    #[test]
    fn test_users_survive_restart() {
        let temp = TempDir::new().unwrap();

        let before = {
            let users = UserStore::new(test_cfg(), Arc::new(FileStore::open(temp.path()).unwrap()));
            users.register(registration("1010101010", "a@b.com")).unwrap();
            users.register(registration("2020202020", "c@d.com")).unwrap();
            users.get_users().unwrap()
        };

        let users = UserStore::new(test_cfg(), Arc::new(FileStore::open(temp.path()).unwrap()));
        assert_eq!(users.get_users().unwrap(), before);
        assert!(users.login("c@d.com", "secret123").unwrap().is_some());
    }
}
