//! Medical record storage.
//!
//! All records for all patients are stored as one JSON array under `medicalRecords`. Every
//! query loads the whole array and filters it, which is fine for the handful of records a
//! single patient keeps locally.
//!
//! ## Ownership
//!
//! Each record belongs to the patient whose id is in `patientId`. Two operations enforce that:
//!
//! - [`MedicalRecordStore::update_record`] refuses to touch a record owned by someone else
//! - [`MedicalRecordStore::delete_medical_record`] checks ownership before calling the
//!   unconditional [`MedicalRecordStore::delete_record`] primitive
//!
//! A missing record and a record owned by someone else both come back as `false`, so callers
//! cannot probe for other patients' record ids. The two cases are logged differently.

use crate::config::CoreConfig;
use crate::constants::MEDICAL_RECORDS_KEY;
use crate::storage::{read_collection, write_collection, KeyValueStore};
use crate::validation::validate_record_draft;
use crate::PortalResult;
use chrono::{DateTime, Utc};
use medportal_files::EncodedFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalRecord {
    pub id: String,
    pub patient_id: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub category: String,
    /// Clinical date as entered on the form
    pub date: String,
    pub doctor: String,
    pub hospital: String,
    pub description: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    /// `data:<mime>;base64,<payload>`
    pub file_data: String,
    pub upload_date: DateTime<Utc>,
    /// Template-specific fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Partial record edit.
///
/// `id` and `patientId` are not representable: a record can never be re-keyed or handed to
/// another patient through an update.
#[derive(Debug, Clone, Default)]
pub struct MedicalRecordUpdate {
    pub record_type: Option<String>,
    pub category: Option<String>,
    pub date: Option<String>,
    pub doctor: Option<String>,
    pub hospital: Option<String>,
    pub description: Option<String>,
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub file_size: Option<u64>,
    pub file_data: Option<String>,
    pub upload_date: Option<DateTime<Utc>>,
    pub custom_fields: Option<BTreeMap<String, String>>,
}

impl MedicalRecordUpdate {
    /// Replaces the file fields with a newly encoded attachment.
    pub fn with_attachment(mut self, file: EncodedFile) -> Self {
        self.file_name = Some(file.file_name.into_inner());
        self.file_type = Some(file.file_type.into_inner());
        self.file_size = Some(file.file_size);
        self.file_data = Some(file.file_data);
        self
    }

    fn apply(self, record: &mut MedicalRecord) {
        macro_rules! merge {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field {
                    record.$field = v;
                })*
            };
        }
        merge!(
            record_type,
            category,
            date,
            doctor,
            hospital,
            description,
            file_name,
            file_type,
            file_size,
            file_data,
            upload_date
        );
        if self.custom_fields.is_some() {
            record.custom_fields = self.custom_fields;
        }
    }
}

/// Metadata entered on the upload form.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub record_type: String,
    pub category: String,
    pub date: String,
    pub doctor: String,
    pub hospital: String,
    pub description: String,
    pub custom_fields: Option<BTreeMap<String, String>>,
}

/// Orders by `uploadDate` descending, then id ascending.
pub fn sort_newest_first(records: &mut [MedicalRecord]) {
    records.sort_by(|a, b| {
        b.upload_date
            .cmp(&a.upload_date)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    Missing,
    Foreign,
    Owned,
}

/// Registry of medical records for every patient.
#[derive(Clone)]
pub struct MedicalRecordStore {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn KeyValueStore>,
}

impl MedicalRecordStore {
    pub fn new(cfg: Arc<CoreConfig>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { cfg, store }
    }

    fn save_records(&self, records: &[MedicalRecord]) -> PortalResult<()> {
        write_collection(self.store.as_ref(), MEDICAL_RECORDS_KEY, records)
    }

    /// Appends `record` and returns it. Field validation is the caller's job.
    pub fn upload_record(&self, record: MedicalRecord) -> PortalResult<MedicalRecord> {
        let mut records = self.get_records()?;
        records.push(record.clone());
        self.save_records(&records)?;
        Ok(record)
    }

    /// Validates the form, assigns an id and upload time, and stores a new record.
    ///
    /// # Errors
    ///
    /// Returns `PortalError::Validation` when type, category or date is blank.
    pub fn create_record(
        &self,
        patient_id: &str,
        draft: RecordDraft,
        file: EncodedFile,
    ) -> PortalResult<MedicalRecord> {
        validate_record_draft(&draft)?;

        let record = MedicalRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            patient_id: patient_id.to_string(),
            record_type: draft.record_type.trim().to_string(),
            category: draft.category.trim().to_string(),
            date: draft.date.trim().to_string(),
            doctor: draft.doctor,
            hospital: draft.hospital,
            description: draft.description,
            file_name: file.file_name.into_inner(),
            file_type: file.file_type.into_inner(),
            file_size: file.file_size,
            file_data: file.file_data,
            upload_date: Utc::now(),
            custom_fields: draft.custom_fields,
            last_modified: None,
        };

        let record = self.upload_record(record)?;
        tracing::info!(
            record_id = %record.id,
            patient_id = %record.patient_id,
            sha256 = %file.sha256,
            "medical record uploaded"
        );
        Ok(record)
    }

    /// Every record for every patient, in upload order.
    pub fn get_records(&self) -> PortalResult<Vec<MedicalRecord>> {
        read_collection(self.store.as_ref(), MEDICAL_RECORDS_KEY)
    }

    pub fn get_records_by_patient_id(&self, patient_id: &str) -> PortalResult<Vec<MedicalRecord>> {
        Ok(self
            .get_records()?
            .into_iter()
            .filter(|r| r.patient_id == patient_id)
            .collect())
    }

    pub fn get_record_by_id(&self, id: &str) -> PortalResult<Option<MedicalRecord>> {
        Ok(self.get_records()?.into_iter().find(|r| r.id == id))
    }

    /// Removes the first record with `id` regardless of owner.
    ///
    /// Callers acting for a patient must go through [`Self::delete_medical_record`].
    pub fn delete_record(&self, id: &str) -> PortalResult<bool> {
        let mut records = self.get_records()?;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            return Ok(false);
        };

        records.remove(index);
        self.save_records(&records)?;
        Ok(true)
    }

    pub fn get_records_by_type(
        &self,
        patient_id: &str,
        record_type: &str,
    ) -> PortalResult<Vec<MedicalRecord>> {
        let mut records = self.get_records_by_patient_id(patient_id)?;
        records.retain(|r| r.record_type == record_type);
        Ok(records)
    }

    pub fn get_records_by_category(
        &self,
        patient_id: &str,
        category: &str,
    ) -> PortalResult<Vec<MedicalRecord>> {
        let mut records = self.get_records_by_patient_id(patient_id)?;
        records.retain(|r| r.category == category);
        Ok(records)
    }

    /// The patient's newest uploads first, at most `limit` of them.
    ///
    /// Records uploaded at the same instant are ordered by id ascending.
    pub fn get_recent_records(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> PortalResult<Vec<MedicalRecord>> {
        let mut records = self.get_records_by_patient_id(patient_id)?;
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    /// [`Self::get_recent_records`] with the configured default limit.
    pub fn get_recent_medical_records(&self, patient_id: &str) -> PortalResult<Vec<MedicalRecord>> {
        self.get_recent_records(patient_id, self.cfg.recent_records_limit())
    }

    /// Merges `update` into the record if `patient_id` owns it, stamping `lastModified`.
    pub fn update_record(
        &self,
        id: &str,
        update: MedicalRecordUpdate,
        patient_id: &str,
    ) -> PortalResult<bool> {
        let mut records = self.get_records()?;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            tracing::debug!(record_id = %id, "update for unknown record");
            return Ok(false);
        };

        if records[index].patient_id != patient_id {
            tracing::warn!(
                record_id = %id,
                requested_by = %patient_id,
                "record update refused: not the owner"
            );
            return Ok(false);
        }

        let record = &mut records[index];
        update.apply(record);
        record.last_modified = Some(Utc::now());

        self.save_records(&records)?;
        Ok(true)
    }

    fn ownership(&self, record_id: &str, patient_id: &str) -> PortalResult<Ownership> {
        Ok(match self.get_record_by_id(record_id)? {
            None => Ownership::Missing,
            Some(r) if r.patient_id == patient_id => Ownership::Owned,
            Some(_) => Ownership::Foreign,
        })
    }

    /// True iff the record exists and belongs to `patient_id`.
    pub fn validate_record_ownership(
        &self,
        record_id: &str,
        patient_id: &str,
    ) -> PortalResult<bool> {
        Ok(self.ownership(record_id, patient_id)? == Ownership::Owned)
    }

    /// Deletes a record on behalf of `patient_id`.
    ///
    /// Ownership is checked first; the record is only removed when it belongs to the caller.
    pub fn delete_medical_record(&self, id: &str, patient_id: &str) -> PortalResult<bool> {
        match self.ownership(id, patient_id)? {
            Ownership::Owned => {
                let removed = self.delete_record(id)?;
                if removed {
                    tracing::info!(
                        record_id = %id,
                        patient_id = %patient_id,
                        "medical record deleted"
                    );
                }
                Ok(removed)
            }
            Ownership::Foreign => {
                tracing::warn!(
                    record_id = %id,
                    requested_by = %patient_id,
                    "record delete refused: not the owner"
                );
                Ok(false)
            }
            Ownership::Missing => {
                tracing::debug!(record_id = %id, "delete for unknown record");
                Ok(false)
            }
        }
    }
}
