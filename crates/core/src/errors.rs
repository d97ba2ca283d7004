use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid date or time format, expected YYYY-MM-DD and HH:MM")]
    InvalidSlotFormat,
    #[error("appointment must be booked for a future time")]
    SlotInPast,
    #[error("appointment time must be between {opening_hour:02}:00 and {closing_hour:02}:00")]
    OutsideClinicHours { opening_hour: u32, closing_hour: u32 },
}
