use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Bookable hours are `[OPENING_HOUR, CLOSING_HOUR)`.
pub const OPENING_HOUR: u32 = 8;
pub const CLOSING_HOUR: u32 = 22;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DoctorId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatientId(pub i64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppointmentId(pub i64);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: DoctorId,
    pub name: String,
    pub specialization: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl Slot {
    /// Parses `YYYY-MM-DD` and `HH:MM`.
    pub fn parse(date: &str, time: &str) -> Result<Self, DomainError> {
        let date = NaiveDate::parse_from_str(date.trim(), DATE_FORMAT);
        let time = NaiveTime::parse_from_str(time.trim(), TIME_FORMAT);
        match (date, time) {
            (Ok(date), Ok(time)) => Ok(Self { date, time }),
            _ => Err(DomainError::InvalidSlotFormat),
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn date_string(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }

    pub fn time_string(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    /// A slot can be booked only in the future and within clinic hours.
    pub fn ensure_bookable(&self, now: NaiveDateTime) -> Result<(), DomainError> {
        if self.starts_at() <= now {
            return Err(DomainError::SlotInPast);
        }
        if !(OPENING_HOUR..CLOSING_HOUR).contains(&self.time.hour()) {
            return Err(DomainError::OutsideClinicHours {
                opening_hour: OPENING_HOUR,
                closing_hour: CLOSING_HOUR,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub doctor_id: DoctorId,
    pub patient_id: PatientId,
    pub slot: Slot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAppointment {
    pub doctor_id: DoctorId,
    pub patient_id: PatientId,
    pub slot: Slot,
}
