//! Constants used throughout the medportal core crate.
//!
//! Storage key names are part of the persisted layout: changing one orphans existing data.

/// Key holding the JSON array of registered users.
pub const USERS_KEY: &str = "users";

/// Key holding the active session (a user profile without the password).
pub const CURRENT_USER_KEY: &str = "currentUser";

/// Key holding the JSON array of medical records for all patients.
pub const MEDICAL_RECORDS_KEY: &str = "medicalRecords";

/// Key holding the JSON array of appointments.
pub const APPOINTMENTS_KEY: &str = "appointments";

/// Default directory for the on-disk key-value area.
pub const DEFAULT_DATA_DIR: &str = "portal_data";

/// Number of records returned by the recent-records view unless configured otherwise.
pub const DEFAULT_RECENT_RECORDS_LIMIT: usize = 5;

/// PBKDF2 rounds used for new password hashes unless configured otherwise.
pub const DEFAULT_PASSWORD_HASH_ITERATIONS: u32 = 100_000;

/// Lowest accepted PBKDF2 round count.
pub const MIN_PASSWORD_HASH_ITERATIONS: u32 = 1_000;

/// Minimum password length accepted at registration and password change.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Date value that the legacy reschedule entry point treats as "cancel".
pub const CANCELLED_SENTINEL: &str = "cancelled";
