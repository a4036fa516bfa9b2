//! # Medportal Core
//!
//! Core data stores for the patient portal:
//! - User accounts and the single active session ([`users`])
//! - Per-patient medical records with ownership-gated mutation ([`records`])
//! - Session-scoped appointments ([`appointments`])
//!
//! All state lives in a flat key-value area ([`storage`]), one JSON document per key.
//!
//! **No presentation concerns**: forms, rendering and argument parsing belong in the
//! `medportal` binary.

pub mod appointments;
pub mod config;
pub mod constants;
pub mod error;
pub mod password;
pub mod portal;
pub mod records;
pub mod storage;
pub mod users;
pub mod validation;

pub use config::CoreConfig;
pub use error::{PortalError, PortalResult};
pub use medportal_types::{EmailAddress, NonEmptyText, TextError};
pub use portal::PortalService;
