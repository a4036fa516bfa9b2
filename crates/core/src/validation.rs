//! Form-level input validation.
//!
//! These checks run before a store is touched. Failures are collected per form field so the
//! caller can show every message inline at once, and are returned as
//! [`PortalError::Validation`] rather than aborting on the first problem.

use crate::constants::MIN_PASSWORD_LEN;
use crate::records::RecordDraft;
use crate::users::Registration;
use crate::{PortalError, PortalResult};
use medportal_types::EmailAddress;
use std::collections::BTreeMap;
use std::fmt;

pub const REQUIRED_MESSAGE: &str = "This field is required";

/// Field name → message, ordered by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `message` for `field`, replacing any earlier message for the same field.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `Ok(())` when nothing was recorded, otherwise `PortalError::Validation`.
    pub fn into_result(self) -> PortalResult<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(PortalError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, message) in &self.0 {
            if !first {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", field, message)?;
            first = false;
        }
        Ok(())
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn all_digits_between(value: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts an optional leading `+` followed by 10-15 digits, ignoring whitespace.
pub fn is_valid_phone(phone: &str) -> bool {
    let compact: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);
    all_digits_between(digits, 10, 15)
}

/// National ID numbers are 10-14 digits.
pub fn is_valid_national_id(id: &str) -> bool {
    all_digits_between(id, 10, 14)
}

/// Validates a registration form.
pub fn validate_registration(form: &Registration) -> PortalResult<()> {
    let mut errors = ValidationErrors::new();

    let required = [
        ("id", &form.id),
        ("firstName", &form.first_name),
        ("lastName", &form.last_name),
        ("email", &form.email),
        ("password", &form.password),
        ("dateOfBirth", &form.date_of_birth),
        ("gender", &form.gender),
        ("phone", &form.phone),
    ];
    for (field, value) in required {
        if is_blank(value) {
            errors.add(field, REQUIRED_MESSAGE);
        }
    }

    if !is_blank(&form.email) && !EmailAddress::is_plausible(&form.email) {
        errors.add("email", "Please enter a valid email address");
    }

    if !form.password.is_empty() && form.password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!(
                "Password must be at least {} characters long",
                MIN_PASSWORD_LEN
            ),
        );
    }

    if form.password != form.confirm_password {
        errors.add("confirmPassword", "Passwords do not match");
    }

    if !is_blank(&form.phone) && !is_valid_phone(&form.phone) {
        errors.add("phone", "Please enter a valid phone number");
    }

    if !is_blank(&form.id) && !is_valid_national_id(&form.id) {
        errors.add("id", "Please enter a valid ID number (10-14 digits)");
    }

    if !form.terms_accepted {
        errors.add("terms", "You must accept the terms and conditions");
    }

    errors.into_result()
}

/// Validates the new-password half of a change-password form.
pub fn validate_new_password(new_password: &str, confirm_password: &str) -> PortalResult<()> {
    let mut errors = ValidationErrors::new();

    if new_password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "newPassword",
            format!(
                "New password must be at least {} characters long",
                MIN_PASSWORD_LEN
            ),
        );
    }

    if new_password != confirm_password {
        errors.add("confirmPassword", "New passwords do not match");
    }

    errors.into_result()
}

/// Validates the metadata half of a record upload.
pub fn validate_record_draft(draft: &RecordDraft) -> PortalResult<()> {
    let mut errors = ValidationErrors::new();

    if is_blank(&draft.record_type) {
        errors.add("type", "Please select a record type");
    }
    if is_blank(&draft.category) {
        errors.add("category", "Please select a record category");
    }
    if is_blank(&draft.date) {
        errors.add("date", "Please enter the date of the record");
    }

    errors.into_result()
}
