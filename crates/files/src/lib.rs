//! medportal attachment encoding
//!
//! Medical records carry their uploaded file inline: the record keeps the original filename, the
//! media type, the byte size and a self-contained `data:<mime>;base64,<payload>` URL. This crate
//! turns raw upload bytes into those fields and back again.
//!
//! ## Upload policy
//!
//! - Files larger than the configured limit (5 MiB by default) are rejected
//! - Only PDF, JPEG, PNG, GIF and Word documents are accepted by default
//! - The media type is sniffed from the bytes first, then the caller's declared type, then the
//!   filename extension
//! - A SHA-256 digest of the bytes is returned alongside the payload so callers can log or
//!   compare uploads without holding the bytes
//!
//! ## Example Usage
//!
//! ```no_run
//! use medportal_files::{AttachmentPolicy, FilesService};
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let service = FilesService::new(AttachmentPolicy::default());
//! let encoded = service.encode_path(Path::new("scans/chest-xray.png"))?;
//! println!("{} ({} bytes)", encoded.file_name, encoded.file_size);
//! # Ok(())
//! # }
//! ```

mod attachment;
mod constants;

pub use attachment::{AttachmentPolicy, DecodedFile, EncodedFile, FilesService};
pub use constants::{DEFAULT_ALLOWED_MEDIA_TYPES, DEFAULT_MAX_FILE_SIZE};

/// Errors that can occur while encoding or decoding attachments
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// The file exceeds the policy's size limit
    #[error("File size {size} bytes exceeds the maximum of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    /// The media type is not on the policy's allow-list (or could not be determined)
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The filename was empty or not valid UTF-8
    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    /// The stored payload is not a base64 data URL
    #[error("Invalid data URL: {0}")]
    InvalidDataUrl(String),

    /// The base64 payload could not be decoded
    #[error("Base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
