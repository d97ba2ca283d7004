use async_trait::async_trait;
use thiserror::Error;

use triage_core::domain::appointment::{
    Appointment, AppointmentId, Doctor, DoctorId, NewAppointment, PatientId, Slot,
};

pub mod appointment;
pub mod memory;

pub use appointment::SqlAppointmentRepository;
pub use memory::InMemoryAppointmentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingOutcome {
    Booked(Appointment),
    SlotTaken,
    UnknownDoctor,
    UnknownPatient,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RescheduleOutcome {
    Rescheduled(Appointment),
    NotFound,
    SlotTaken,
}

/// Appointment store shared by the booking and cancellation tools.
///
/// `book` and `reschedule` must be atomic with respect to the slot check: two
/// concurrent requests for the same doctor and slot never both succeed.
#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    /// Doctors whose name contains `name` (case-insensitive), or all doctors.
    async fn search_doctors(&self, name: Option<&str>) -> Result<Vec<Doctor>, RepositoryError>;

    async fn is_slot_free(
        &self,
        doctor_id: DoctorId,
        slot: &Slot,
        excluding: Option<AppointmentId>,
    ) -> Result<bool, RepositoryError>;

    async fn book(&self, appointment: NewAppointment) -> Result<BookingOutcome, RepositoryError>;

    async fn find_appointment(
        &self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError>;

    /// Returns `false` when no appointment with `id` exists.
    async fn cancel(&self, id: AppointmentId) -> Result<bool, RepositoryError>;

    async fn reschedule(
        &self,
        id: AppointmentId,
        slot: Slot,
    ) -> Result<RescheduleOutcome, RepositoryError>;

    async fn save_doctor(&self, doctor: Doctor) -> Result<(), RepositoryError>;

    async fn save_patient(&self, id: PatientId, name: &str) -> Result<(), RepositoryError>;
}
