//! Session-scoped appointment list.
//!
//! The list is bootstrapped from the `appointments` key once per session by
//! [`load_appointments`], which seeds two default visits the first time. Reschedules and
//! cancellations only change the in-memory list until [`AppointmentStore::save`] is called.
//! Bookings are written through immediately.
//!
//! An appointment is either active or cancelled. Cancelled is terminal: a cancelled
//! appointment can no longer be rescheduled.

use crate::constants::{APPOINTMENTS_KEY, CANCELLED_SENTINEL};
use crate::storage::{read_collection, write_collection, KeyValueStore};
use crate::{PortalError, PortalResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: u64,
    pub date: String,
    pub time: String,
    pub doctor: String,
    pub specialty: String,
    /// Absent while the appointment is active
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AppointmentStatus>,
}

impl Appointment {
    pub fn is_active(&self) -> bool {
        self.status != Some(AppointmentStatus::Cancelled)
    }
}

/// A change requested for one appointment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppointmentCommand {
    Reschedule { date: String, time: String },
    Cancel,
}

/// Booking form contents; the id is assigned on booking.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub date: String,
    pub time: String,
    pub doctor: String,
    pub specialty: String,
}

fn default_appointments() -> Vec<Appointment> {
    let seed = |id, date: &str, time: &str, doctor: &str, specialty: &str| Appointment {
        id,
        date: date.to_string(),
        time: time.to_string(),
        doctor: doctor.to_string(),
        specialty: specialty.to_string(),
        status: None,
    };
    vec![
        seed(1, "2024-02-15", "10:00 AM", "Dr. Ahmed Hassan", "Cardiology"),
        seed(2, "2024-02-20", "2:30 PM", "Dr. Mona Ali", "Pediatrics"),
    ]
}

/// Returns the persisted appointments, seeding and persisting the defaults when none exist.
pub fn load_appointments(store: &dyn KeyValueStore) -> PortalResult<Vec<Appointment>> {
    if store.get(APPOINTMENTS_KEY)?.is_some() {
        return read_collection(store, APPOINTMENTS_KEY);
    }

    let defaults = default_appointments();
    write_collection(store, APPOINTMENTS_KEY, &defaults)?;
    tracing::info!(count = defaults.len(), "seeded default appointments");
    Ok(defaults)
}

pub struct AppointmentStore {
    store: Arc<dyn KeyValueStore>,
    appointments: Vec<Appointment>,
}

impl AppointmentStore {
    /// Starts a session from the persisted list.
    pub fn load(store: Arc<dyn KeyValueStore>) -> PortalResult<Self> {
        let appointments = load_appointments(store.as_ref())?;
        Ok(Self {
            store,
            appointments,
        })
    }

    /// All appointments in the session, cancelled ones included.
    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }

    /// Applies `command` to appointment `id`.
    ///
    /// Returns false when the appointment is unknown, or already cancelled.
    pub fn apply(&mut self, id: u64, command: AppointmentCommand) -> bool {
        let Some(appointment) = self.appointments.iter_mut().find(|a| a.id == id) else {
            tracing::debug!(appointment_id = id, "unknown appointment");
            return false;
        };

        if !appointment.is_active() {
            tracing::debug!(appointment_id = id, "appointment already cancelled");
            return false;
        }

        match command {
            AppointmentCommand::Reschedule { date, time } => {
                appointment.date = date;
                appointment.time = time;
            }
            AppointmentCommand::Cancel => {
                appointment.status = Some(AppointmentStatus::Cancelled);
            }
        }
        true
    }

    /// Legacy entry point where a `date` of `"cancelled"` means cancel.
    pub fn reschedule_appointment(&mut self, id: u64, date: &str, time: &str) -> bool {
        let command = if date == CANCELLED_SENTINEL {
            AppointmentCommand::Cancel
        } else {
            AppointmentCommand::Reschedule {
                date: date.to_string(),
                time: time.to_string(),
            }
        };
        self.apply(id, command)
    }

    pub fn cancel_appointment(&mut self, id: u64) -> bool {
        self.apply(id, AppointmentCommand::Cancel)
    }

    /// Appointments that are not cancelled, in their original order.
    pub fn get_active_appointments(&self) -> Vec<&Appointment> {
        self.appointments.iter().filter(|a| a.is_active()).collect()
    }

    /// Books a new appointment with the next free id and persists it straight away.
    ///
    /// Only the new entry is written; pending reschedules in this session stay unsaved.
    pub fn book_appointment(&mut self, new: NewAppointment) -> PortalResult<Appointment> {
        for (field, value) in [
            ("date", &new.date),
            ("time", &new.time),
            ("doctor", &new.doctor),
        ] {
            if value.trim().is_empty() {
                return Err(PortalError::InvalidInput(format!("{field} is required")));
            }
        }

        let mut persisted = load_appointments(self.store.as_ref())?;
        let next_id = persisted
            .iter()
            .chain(self.appointments.iter())
            .map(|a| a.id)
            .max()
            .unwrap_or(0)
            + 1;

        let appointment = Appointment {
            id: next_id,
            date: new.date,
            time: new.time,
            doctor: new.doctor,
            specialty: new.specialty,
            status: None,
        };

        persisted.push(appointment.clone());
        write_collection(self.store.as_ref(), APPOINTMENTS_KEY, &persisted)?;
        self.appointments.push(appointment.clone());

        tracing::info!(appointment_id = appointment.id, "appointment booked");
        Ok(appointment)
    }

    /// Writes the session list back to storage.
    pub fn save(&self) -> PortalResult<()> {
        write_collection(self.store.as_ref(), APPOINTMENTS_KEY, &self.appointments)
    }
}
