use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medportal_core::appointments::{Appointment, AppointmentCommand, NewAppointment};
use medportal_core::config::{
    password_hash_iterations_from_env_value, recent_records_limit_from_env_value,
};
use medportal_core::constants::DEFAULT_DATA_DIR;
use medportal_core::records::{
    MedicalRecord, MedicalRecordStore, MedicalRecordUpdate, RecordDraft, sort_newest_first,
};
use medportal_core::users::{Registration, UserProfile, UserUpdate};
use medportal_core::validation::{ValidationErrors, validate_new_password};
use medportal_core::{CoreConfig, PortalError, PortalResult, PortalService};
use medportal_files::FilesService;

#[derive(Parser)]
#[command(name = "medportal")]
#[command(about = "Patient portal: accounts, medical records and appointments")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new patient account
    Register {
        /// National ID number (10-14 digits)
        id: String,
        first_name: String,
        last_name: String,
        email: String,
        password: String,
        /// Date of birth (YYYY-MM-DD)
        date_of_birth: String,
        gender: String,
        phone: String,
        /// Repeat of the password (defaults to the password)
        #[arg(long)]
        confirm_password: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        emergency_contact: Option<String>,
        #[arg(long)]
        blood_type: Option<String>,
        #[arg(long)]
        insurance_provider: Option<String>,
        #[arg(long)]
        insurance_number: Option<String>,
        /// Accept the terms and conditions
        #[arg(long)]
        accept_terms: bool,
    },
    /// Log in with email or ID
    Login { identifier: String, password: String },
    /// End the current session
    Logout,
    /// Show the logged-in user
    Whoami {
        /// Print the session as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit the logged-in user's profile
    UpdateProfile {
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        date_of_birth: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        emergency_contact: Option<String>,
        #[arg(long)]
        blood_type: Option<String>,
        #[arg(long)]
        insurance_provider: Option<String>,
        #[arg(long)]
        insurance_number: Option<String>,
    },
    /// Change the logged-in user's password
    ChangePassword {
        current_password: String,
        new_password: String,
        confirm_password: String,
    },
    /// Delete the logged-in user's account
    DeleteUser { password: String },
    /// Upload a medical record for the logged-in user
    Upload {
        /// File to attach
        path: PathBuf,
        #[arg(long = "type")]
        record_type: String,
        #[arg(long)]
        category: String,
        /// Date of the record (defaults to today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = "")]
        doctor: String,
        #[arg(long, default_value = "")]
        hospital: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Template field as key=value (repeatable)
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },
    /// List the logged-in user's medical records
    Records {
        #[arg(long = "type")]
        record_type: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Only the newest uploads, after the type/category filters
        #[arg(long)]
        recent: bool,
        /// Limit for --recent (defaults to MEDPORTAL_RECENT_LIMIT)
        #[arg(long, requires = "recent")]
        limit: Option<usize>,
    },
    /// Show one medical record
    ShowRecord {
        id: String,
        /// Write the attached file here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Edit one of the logged-in user's medical records
    EditRecord {
        id: String,
        #[arg(long = "type")]
        record_type: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        doctor: Option<String>,
        #[arg(long)]
        hospital: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Replace the attachment
        #[arg(long)]
        file: Option<PathBuf>,
        /// Replace all template fields with these key=value pairs
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },
    /// Delete one of the logged-in user's medical records
    DeleteRecord { id: String },
    /// List appointments
    Appointments {
        /// Include cancelled appointments
        #[arg(long)]
        all: bool,
    },
    /// Book a new appointment
    Book {
        /// Date (YYYY-MM-DD)
        date: String,
        /// Time, e.g. "10:00 AM"
        time: String,
        doctor: String,
        #[arg(default_value = "")]
        specialty: String,
    },
    /// Move an appointment to a new date and time
    Reschedule { id: u64, date: String, time: String },
    /// Cancel an appointment
    Cancel { id: u64 },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn custom_fields(fields: Vec<(String, String)>) -> Option<BTreeMap<String, String>> {
    if fields.is_empty() {
        None
    } else {
        Some(fields.into_iter().collect())
    }
}

/// Main entry point for the patient portal CLI
///
/// # Environment Variables
/// - `MEDPORTAL_DATA_DIR`: Directory holding the key-value documents (default: "portal_data")
/// - `MEDPORTAL_PASSWORD_ITERATIONS`: PBKDF2 rounds for new password hashes (default: 100000)
/// - `MEDPORTAL_RECENT_LIMIT`: Default number of recent records shown (default: 5)
/// - `RUST_LOG`: Log filter (default: "medportal=info")
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("medportal=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'medportal --help' for commands");
        return Ok(());
    };

    let data_dir = std::env::var("MEDPORTAL_DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let iterations = password_hash_iterations_from_env_value(
        std::env::var("MEDPORTAL_PASSWORD_ITERATIONS").ok(),
    )?;
    let recent_limit =
        recent_records_limit_from_env_value(std::env::var("MEDPORTAL_RECENT_LIMIT").ok())?;

    tracing::debug!(
        data_dir = %data_dir.display(),
        iterations,
        recent_limit,
        "resolved configuration"
    );
    let cfg = Arc::new(CoreConfig::new(data_dir, iterations, recent_limit)?);
    let portal = PortalService::open(cfg)?;

    run(&portal, command).map_err(report_validation)
}

/// Lists each rejected form field on stderr and shortens the error to a summary.
fn report_validation(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<PortalError>() {
        Some(PortalError::Validation(errors)) => {
            for line in validation_lines(errors) {
                eprintln!("{line}");
            }
            anyhow::anyhow!("{} field(s) need correcting", errors.len())
        }
        _ => err,
    }
}

fn validation_lines(errors: &ValidationErrors) -> Vec<String> {
    errors
        .iter()
        .map(|(field, message)| format!("  {field}: {message}"))
        .collect()
}

struct RecordFilter {
    record_type: Option<String>,
    category: Option<String>,
    /// Newest-first limit
    recent: Option<usize>,
}

/// The patient's records matching `filter`; `recent` applies after type and category.
fn select_records(
    store: &MedicalRecordStore,
    patient_id: &str,
    filter: &RecordFilter,
) -> PortalResult<Vec<MedicalRecord>> {
    let mut records = match &filter.record_type {
        Some(record_type) => store.get_records_by_type(patient_id, record_type)?,
        None => store.get_records_by_patient_id(patient_id)?,
    };
    if let Some(category) = &filter.category {
        records.retain(|r| &r.category == category);
    }
    if let Some(limit) = filter.recent {
        sort_newest_first(&mut records);
        records.truncate(limit);
    }
    Ok(records)
}

fn require_session(portal: &PortalService) -> anyhow::Result<UserProfile> {
    match portal.users().get_current_user()? {
        Some(profile) => Ok(profile),
        None => bail!("not logged in; run 'medportal login' first"),
    }
}

fn run(portal: &PortalService, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Register {
            id,
            first_name,
            last_name,
            email,
            password,
            date_of_birth,
            gender,
            phone,
            confirm_password,
            address,
            emergency_contact,
            blood_type,
            insurance_provider,
            insurance_number,
            accept_terms,
        } => {
            let confirm_password = confirm_password.unwrap_or_else(|| password.clone());
            let profile = portal.users().register(Registration {
                id,
                first_name,
                last_name,
                email,
                password,
                confirm_password,
                date_of_birth,
                gender,
                phone,
                address,
                emergency_contact,
                blood_type,
                insurance_provider,
                insurance_number,
                terms_accepted: accept_terms,
            })?;
            println!("Registered {} ({})", profile.full_name(), profile.id);
        }
        Commands::Login {
            identifier,
            password,
        } => match portal.users().login(&identifier, &password)? {
            Some(profile) => println!("Welcome, {}", profile.full_name()),
            None => bail!("invalid email/ID or password"),
        },
        Commands::Logout => {
            portal.users().logout()?;
            println!("Logged out");
        }
        Commands::Whoami { json } => match portal.users().get_current_user()? {
            Some(profile) if json => println!("{}", serde_json::to_string_pretty(&profile)?),
            Some(profile) => print_profile(&profile),
            None => println!("Not logged in"),
        },
        Commands::UpdateProfile {
            first_name,
            last_name,
            email,
            date_of_birth,
            gender,
            phone,
            address,
            emergency_contact,
            blood_type,
            insurance_provider,
            insurance_number,
        } => {
            let session = require_session(portal)?;
            let update = UserUpdate {
                first_name,
                last_name,
                email,
                date_of_birth,
                gender,
                phone,
                address,
                emergency_contact,
                blood_type,
                insurance_provider,
                insurance_number,
                password: None,
            };
            if !portal.users().update_user(&session.id, update)? {
                bail!("account {} no longer exists", session.id);
            }
            println!("Profile updated");
        }
        Commands::ChangePassword {
            current_password,
            new_password,
            confirm_password,
        } => {
            let session = require_session(portal)?;
            validate_new_password(&new_password, &confirm_password)?;
            if !portal
                .users()
                .change_password(&session.id, &current_password, &new_password)?
            {
                bail!("current password is incorrect");
            }
            println!("Password changed");
        }
        Commands::DeleteUser { password } => {
            let session = require_session(portal)?;
            let users = portal.users();
            if !users.validate_password(&session.id, &password)? {
                bail!("password is incorrect");
            }
            users.delete_user(&session.id)?;
            println!("Account {} deleted", session.id);
        }
        Commands::Upload {
            path,
            record_type,
            category,
            date,
            doctor,
            hospital,
            description,
            fields,
        } => {
            let session = require_session(portal)?;
            let draft = RecordDraft {
                record_type,
                category,
                date: date.unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string()),
                doctor,
                hospital,
                description,
                custom_fields: custom_fields(fields),
            };
            let record = portal
                .upload_file(&session.id, draft, &path)
                .with_context(|| format!("cannot upload {}", path.display()))?;
            println!("Uploaded record {}", record.id);
        }
        Commands::Records {
            record_type,
            category,
            recent,
            limit,
        } => {
            let session = require_session(portal)?;
            let filter = RecordFilter {
                record_type,
                category,
                recent: recent.then(|| limit.unwrap_or(portal.config().recent_records_limit())),
            };
            let records = select_records(&portal.records(), &session.id, &filter)?;
            if records.is_empty() {
                println!("No records found.");
            }
            for record in &records {
                print_record_line(record);
            }
        }
        Commands::ShowRecord { id, output } => {
            let session = require_session(portal)?;
            let store = portal.records();
            let record = match store.get_record_by_id(&id)? {
                Some(r) if r.patient_id == session.id => r,
                _ => bail!("record {id} not found"),
            };
            print_record(&record);
            if let Some(output) = output {
                let decoded = FilesService::decode(&record.file_data)?;
                std::fs::write(&output, &decoded.bytes)
                    .with_context(|| format!("cannot write {}", output.display()))?;
                println!("Saved attachment to {}", output.display());
            }
        }
        Commands::EditRecord {
            id,
            record_type,
            category,
            date,
            doctor,
            hospital,
            description,
            file,
            fields,
        } => {
            let session = require_session(portal)?;
            let mut update = MedicalRecordUpdate {
                record_type,
                category,
                date,
                doctor,
                hospital,
                description,
                custom_fields: custom_fields(fields),
                ..MedicalRecordUpdate::default()
            };
            if let Some(path) = file {
                let encoded = portal
                    .files()
                    .encode_path(&path)
                    .with_context(|| format!("cannot attach {}", path.display()))?;
                update = update.with_attachment(encoded);
            }
            if !portal.records().update_record(&id, update, &session.id)? {
                bail!("record {id} not found");
            }
            println!("Record {id} updated");
        }
        Commands::DeleteRecord { id } => {
            let session = require_session(portal)?;
            if !portal.records().delete_medical_record(&id, &session.id)? {
                bail!("record {id} not found");
            }
            println!("Record {id} deleted");
        }
        Commands::Appointments { all } => {
            let appointments = portal.appointments()?;
            let listed: Vec<&Appointment> = if all {
                appointments.appointments().iter().collect()
            } else {
                appointments.get_active_appointments()
            };
            if listed.is_empty() {
                println!("No appointments.");
            }
            for appointment in listed {
                print_appointment(appointment);
            }
        }
        Commands::Book {
            date,
            time,
            doctor,
            specialty,
        } => {
            let mut appointments = portal.appointments()?;
            let booked = appointments.book_appointment(NewAppointment {
                date,
                time,
                doctor,
                specialty,
            })?;
            println!("Booked appointment {}", booked.id);
        }
        Commands::Reschedule { id, date, time } => {
            let mut appointments = portal.appointments()?;
            if !appointments.apply(id, AppointmentCommand::Reschedule { date, time }) {
                bail!("appointment {id} not found or already cancelled");
            }
            appointments.save()?;
            println!("Appointment {id} rescheduled");
        }
        Commands::Cancel { id } => {
            let mut appointments = portal.appointments()?;
            if !appointments.cancel_appointment(id) {
                bail!("appointment {id} not found or already cancelled");
            }
            appointments.save()?;
            println!("Appointment {id} cancelled");
        }
    }

    Ok(())
}

fn print_profile(profile: &UserProfile) {
    println!("ID: {}", profile.id);
    println!("Name: {}", profile.full_name());
    println!("Email: {}", profile.email);
    println!("Date of birth: {}", profile.date_of_birth);
    println!("Gender: {}", profile.gender);
    println!("Phone: {}", profile.phone);
    let optional = [
        ("Address", &profile.address),
        ("Emergency contact", &profile.emergency_contact),
        ("Blood type", &profile.blood_type),
        ("Insurance provider", &profile.insurance_provider),
        ("Insurance number", &profile.insurance_number),
    ];
    for (label, value) in optional {
        if let Some(value) = value {
            println!("{label}: {value}");
        }
    }
}

fn print_record_line(record: &MedicalRecord) {
    println!(
        "{}  {}  {} / {}  {}  ({}, {} bytes)",
        record.id,
        record.date,
        record.record_type,
        record.category,
        record.upload_date.format("%Y-%m-%d %H:%M"),
        record.file_name,
        record.file_size
    );
}

fn print_record(record: &MedicalRecord) {
    println!("ID: {}", record.id);
    println!("Type: {}", record.record_type);
    println!("Category: {}", record.category);
    println!("Date: {}", record.date);
    println!("Doctor: {}", record.doctor);
    println!("Hospital: {}", record.hospital);
    println!("Description: {}", record.description);
    println!(
        "File: {} ({}, {} bytes)",
        record.file_name, record.file_type, record.file_size
    );
    println!("Uploaded: {}", record.upload_date.to_rfc3339());
    if let Some(modified) = record.last_modified {
        println!("Last modified: {}", modified.to_rfc3339());
    }
    if let Some(fields) = &record.custom_fields {
        for (key, value) in fields {
            println!("  {key}: {value}");
        }
    }
}

fn print_appointment(appointment: &Appointment) {
    let status = if appointment.is_active() {
        ""
    } else {
        "  [cancelled]"
    };
    println!(
        "#{}  {} {}  {}  {}{}",
        appointment.id,
        appointment.date,
        appointment.time,
        appointment.doctor,
        appointment.specialty,
        status
    );
}
