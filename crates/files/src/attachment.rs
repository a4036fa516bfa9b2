//! Upload encoding service
//!
//! [`FilesService`] validates an upload against an [`AttachmentPolicy`] and produces the
//! [`EncodedFile`] fields a medical record stores. Decoding reverses the data URL back into
//! bytes for viewing or export.
//!
//! # Media type resolution
//!
//! Browsers report a media type derived from the file extension, which is easy to spoof. The
//! service sniffs magic bytes with `infer` first and only falls back to the declared type, then
//! to the extension table, when sniffing finds nothing.

use crate::constants::{DEFAULT_ALLOWED_MEDIA_TYPES, DEFAULT_MAX_FILE_SIZE, EXTENSION_MEDIA_TYPES};
use crate::FilesError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use medportal_types::NonEmptyText;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const BASE64_MARKER: &str = ";base64,";

/// Size and media-type limits for uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPolicy {
    max_size_bytes: u64,
    allowed_media_types: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_FILE_SIZE,
            allowed_media_types: DEFAULT_ALLOWED_MEDIA_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AttachmentPolicy {
    pub fn new(max_size_bytes: u64, allowed_media_types: Vec<String>) -> Self {
        Self {
            max_size_bytes,
            allowed_media_types,
        }
    }

    /// Returns true if `media_type` is on the allow-list (case-insensitive).
    pub fn permits(&self, media_type: &str) -> bool {
        self.allowed_media_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(media_type))
    }
}

/// The record-facing view of an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedFile {
    /// Original filename (final path component only)
    pub file_name: NonEmptyText,

    /// Resolved media type
    pub file_type: NonEmptyText,

    /// Size of the raw bytes
    pub file_size: u64,

    /// `data:<mime>;base64,<payload>`
    pub file_data: String,

    /// Lowercase hex SHA-256 of the raw bytes
    pub sha256: String,
}

/// Bytes recovered from a stored data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFile {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

/// Encodes uploads for inline storage.
#[derive(Debug, Clone, Default)]
pub struct FilesService {
    policy: AttachmentPolicy,
}

impl FilesService {
    pub fn new(policy: AttachmentPolicy) -> Self {
        Self { policy }
    }

    /// Validates and encodes an in-memory upload.
    ///
    /// # Arguments
    ///
    /// * `file_name` - Name reported by the uploader; any directory components are dropped
    /// * `declared_type` - Media type reported by the uploader, if any
    /// * `bytes` - Raw file content
    ///
    /// # Errors
    ///
    /// Returns `FilesError` if:
    /// - the filename is blank ([`FilesError::InvalidFileName`])
    /// - the content exceeds the size limit ([`FilesError::FileTooLarge`])
    /// - no allowed media type can be resolved ([`FilesError::UnsupportedMediaType`])
    pub fn encode(
        &self,
        file_name: &str,
        declared_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<EncodedFile, FilesError> {
        let base_name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_name);
        let file_name = NonEmptyText::new(base_name)
            .map_err(|_| FilesError::InvalidFileName(file_name.to_string()))?;

        let size = bytes.len() as u64;
        if size > self.policy.max_size_bytes {
            return Err(FilesError::FileTooLarge {
                size,
                max: self.policy.max_size_bytes,
            });
        }

        let media_type = resolve_media_type(file_name.as_str(), declared_type, bytes)
            .ok_or_else(|| FilesError::UnsupportedMediaType("unknown".into()))?;
        if !self.policy.permits(&media_type) {
            return Err(FilesError::UnsupportedMediaType(media_type));
        }

        let file_data = format!("data:{}{}{}", media_type, BASE64_MARKER, STANDARD.encode(bytes));
        let file_type = NonEmptyText::new(&media_type)
            .map_err(|_| FilesError::UnsupportedMediaType(media_type.clone()))?;

        Ok(EncodedFile {
            file_name,
            file_type,
            file_size: size,
            file_data,
            sha256: Self::digest(bytes),
        })
    }

    /// Reads a file from disk and encodes it.
    ///
    /// The size limit is checked against file metadata before the content is read.
    pub fn encode_path(&self, source_path: &Path) -> Result<EncodedFile, FilesError> {
        let metadata = fs::metadata(source_path).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to stat source file {}: {}", source_path.display(), e),
            ))
        })?;
        if metadata.len() > self.policy.max_size_bytes {
            return Err(FilesError::FileTooLarge {
                size: metadata.len(),
                max: self.policy.max_size_bytes,
            });
        }

        let bytes = fs::read(source_path).map_err(|e| {
            FilesError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read source file {}: {}", source_path.display(), e),
            ))
        })?;

        let file_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilesError::InvalidFileName(source_path.display().to_string()))?;

        self.encode(file_name, None, &bytes)
    }

    /// Splits a stored `data:` URL back into its media type and bytes.
    pub fn decode(file_data: &str) -> Result<DecodedFile, FilesError> {
        let rest = file_data
            .strip_prefix("data:")
            .ok_or_else(|| FilesError::InvalidDataUrl("missing data: prefix".into()))?;
        let (media_type, payload) = rest
            .split_once(BASE64_MARKER)
            .ok_or_else(|| FilesError::InvalidDataUrl("missing ;base64, marker".into()))?;

        Ok(DecodedFile {
            media_type: media_type.to_string(),
            bytes: STANDARD.decode(payload)?,
        })
    }

    /// Lowercase hex SHA-256 of `bytes`.
    pub fn digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

fn resolve_media_type(
    file_name: &str,
    declared_type: Option<&str>,
    bytes: &[u8],
) -> Option<String> {
    if let Some(kind) = infer::get(bytes) {
        return Some(kind.mime_type().to_string());
    }

    if let Some(declared) = declared_type.map(str::trim).filter(|t| !t.is_empty()) {
        return Some(declared.to_ascii_lowercase());
    }

    let extension = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    EXTENSION_MEDIA_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| mime.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_HEADER: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_encode_detects_png_from_bytes() {
        let service = FilesService::default();
        let encoded = service
            .encode("scan.bin", Some("application/octet-stream"), &PNG_HEADER)
            .unwrap();

        assert_eq!(encoded.file_type.as_str(), "image/png");
        assert_eq!(encoded.file_size, 8);
        assert!(encoded.file_data.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_encode_strips_directories_from_name() {
        let service = FilesService::default();
        let encoded = service
            .encode("/tmp/uploads/lab-results.pdf", None, b"%PDF-1.4\n%test")
            .unwrap();

        assert_eq!(encoded.file_name.as_str(), "lab-results.pdf");
        assert_eq!(encoded.file_type.as_str(), "application/pdf");
    }

    #[test]
    fn test_encode_falls_back_to_declared_type() {
        let policy = AttachmentPolicy::new(1024, vec!["text/plain".into()]);
        let service = FilesService::new(policy);
        let encoded = service
            .encode("notes.txt", Some("Text/Plain"), b"blood pressure 120/80")
            .unwrap();

        assert_eq!(encoded.file_type.as_str(), "text/plain");
    }

    #[test]
    fn test_encode_falls_back_to_extension() {
        let service = FilesService::default();
        // Not a real GIF, but nothing sniffable and no declared type
        let encoded = service.encode("chart.GIF", None, b"????").unwrap();

        assert_eq!(encoded.file_type.as_str(), "image/gif");
    }

    #[test]
    fn test_encode_rejects_disallowed_type() {
        let service = FilesService::default();
        let result = service.encode("notes.txt", Some("text/plain"), b"hello");

        assert!(matches!(
            result,
            Err(FilesError::UnsupportedMediaType(ref t)) if t == "text/plain"
        ));
    }

    #[test]
    fn test_encode_rejects_unknown_type() {
        let service = FilesService::default();
        let result = service.encode("mystery", None, b"hello");

        assert!(matches!(result, Err(FilesError::UnsupportedMediaType(_))));
    }

    #[test]
    fn test_encode_rejects_oversized_file() {
        let policy = AttachmentPolicy::new(4, vec!["image/png".into()]);
        let service = FilesService::new(policy);
        let result = service.encode("scan.png", None, &PNG_HEADER);

        assert!(matches!(
            result,
            Err(FilesError::FileTooLarge { size: 8, max: 4 })
        ));
    }

    #[test]
    fn test_encode_rejects_blank_name() {
        let service = FilesService::default();
        let result = service.encode("   ", None, &PNG_HEADER);

        assert!(matches!(result, Err(FilesError::InvalidFileName(_))));
    }

    #[test]
    fn test_decode_recovers_bytes_and_type() {
        let service = FilesService::default();
        let encoded = service.encode("scan.png", None, &PNG_HEADER).unwrap();

        let decoded = FilesService::decode(&encoded.file_data).unwrap();
        assert_eq!(decoded.media_type, "image/png");
        assert_eq!(decoded.bytes, PNG_HEADER.to_vec());
        assert_eq!(FilesService::digest(&decoded.bytes), encoded.sha256);
    }

    #[test]
    fn test_decode_rejects_plain_base64() {
        let result = FilesService::decode("iVBORw0KGgo=");
        assert!(matches!(result, Err(FilesError::InvalidDataUrl(_))));
    }

    #[test]
    fn test_decode_rejects_corrupt_payload() {
        let result = FilesService::decode("data:image/png;base64,***");
        assert!(matches!(result, Err(FilesError::Decode(_))));
    }

    #[test]
    fn test_digest_is_known_value() {
        assert_eq!(
            FilesService::digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_encode_path_reads_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("xray.png");
        fs::write(&path, PNG_HEADER).unwrap();

        let service = FilesService::default();
        let encoded = service.encode_path(&path).unwrap();
        assert_eq!(encoded.file_name.as_str(), "xray.png");
        assert_eq!(encoded.file_size, 8);
    }

    #[test]
    fn test_encode_path_missing_file() {
        let service = FilesService::default();
        let result = service.encode_path(Path::new("/non-existent/file.pdf"));

        assert!(matches!(result, Err(FilesError::Io(_))));
    }

    #[test]
    fn test_encoded_file_serialises_camel_case() {
        let service = FilesService::default();
        let encoded = service.encode("scan.png", None, &PNG_HEADER).unwrap();
        let json = serde_json::to_string(&encoded).unwrap();

        assert!(json.contains("\"fileName\":\"scan.png\""));
        assert!(json.contains("\"fileSize\":8"));
    }
}
