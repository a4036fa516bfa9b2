//! Portal service.
//!
//! Owns the shared configuration and key-value backend for one process and hands out the
//! individual stores. The stores never call each other; anything that spans two of them (for
//! example, listing the records of the logged-in user) is composed by the caller.

use crate::appointments::AppointmentStore;
use crate::config::CoreConfig;
use crate::records::{MedicalRecord, MedicalRecordStore, RecordDraft};
use crate::storage::{FileStore, KeyValueStore};
use crate::users::UserStore;
use crate::PortalResult;
use medportal_files::FilesService;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct PortalService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn KeyValueStore>,
    files: FilesService,
}

impl PortalService {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cfg,
            store,
            files: FilesService::default(),
        }
    }

    /// Opens a [`FileStore`] under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::StorageDirCreation` if the directory cannot be created.
    pub fn open(cfg: Arc<CoreConfig>) -> PortalResult<Self> {
        let store = FileStore::open(cfg.data_dir())?;
        tracing::debug!(data_dir = %cfg.data_dir().display(), "opened portal data directory");
        Ok(Self::new(cfg, Arc::new(store)))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.cfg.clone(), self.store.clone())
    }

    pub fn records(&self) -> MedicalRecordStore {
        MedicalRecordStore::new(self.cfg.clone(), self.store.clone())
    }

    /// Starts an appointment session from persisted state.
    pub fn appointments(&self) -> PortalResult<AppointmentStore> {
        AppointmentStore::load(self.store.clone())
    }

    pub fn files(&self) -> &FilesService {
        &self.files
    }

    /// Encodes the file at `path` and stores it as a new record for `patient_id`.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Attachment` when the file is unreadable, too large or of a
    /// disallowed type, and `PortalError::Validation` when the draft is incomplete.
    pub fn upload_file(
        &self,
        patient_id: &str,
        draft: RecordDraft,
        path: &Path,
    ) -> PortalResult<MedicalRecord> {
        let file = self.files.encode_path(path)?;
        self.records().create_record(patient_id, draft, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MIN_PASSWORD_HASH_ITERATIONS;
    use crate::users::Registration;
    use crate::PortalError;
    use tempfile::TempDir;

    fn open_portal(temp: &TempDir) -> PortalService {
        let cfg = CoreConfig::new(
            temp.path().join("portal_data"),
            MIN_PASSWORD_HASH_ITERATIONS,
            5,
        )
        .unwrap();
        PortalService::open(Arc::new(cfg)).unwrap()
    }

    #[test]
    fn test_open_creates_data_dir() {
        let temp = TempDir::new().unwrap();
        let portal = open_portal(&temp);
        assert!(portal.config().data_dir().is_dir());
    }

    #[test]
    fn test_session_user_uploads_and_lists_records() {
        let temp = TempDir::new().unwrap();
        let portal = open_portal(&temp);

        portal
            .users()
            .register(Registration {
                id: "1010101010".into(),
                first_name: "Amira".into(),
                last_name: "Saleh".into(),
                email: "a@b.com".into(),
                password: "secret123".into(),
                confirm_password: "secret123".into(),
                date_of_birth: "1990-04-12".into(),
                gender: "female".into(),
                phone: "01001234567".into(),
                terms_accepted: true,
                ..Registration::default()
            })
            .unwrap();
        let session = portal.users().login("a@b.com", "secret123").unwrap().unwrap();

        let file = portal
            .files()
            .encode("xray.png", None, b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR")
            .unwrap();
        let draft = RecordDraft {
            record_type: "Imaging".into(),
            category: "Radiology".into(),
            date: "2024-02-01".into(),
            ..RecordDraft::default()
        };
        portal.records().create_record(&session.id, draft, file).unwrap();

        // A second process sees the same state
        let reopened = open_portal(&temp);
        let current = reopened.users().get_current_user().unwrap().unwrap();
        let records = reopened.records().get_records_by_patient_id(&current.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].file_type, "image/png");
        assert_eq!(reopened.appointments().unwrap().appointments().len(), 2);
    }

    #[test]
    fn test_upload_file_rejects_disallowed_type() {
        let temp = TempDir::new().unwrap();
        let portal = open_portal(&temp);
        let path = temp.path().join("notes.exe");
        std::fs::write(&path, b"MZ\x90\0binary").unwrap();

        let draft = RecordDraft {
            record_type: "Lab".into(),
            category: "Blood".into(),
            date: "2024-02-01".into(),
            ..RecordDraft::default()
        };
        let result = portal.upload_file("1010101010", draft, &path);

        assert!(matches!(result, Err(PortalError::Attachment(_))));
        assert!(portal.records().get_records().unwrap().is_empty());
    }
}
