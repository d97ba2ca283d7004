use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use triage_core::domain::appointment::{
    Appointment, AppointmentId, Doctor, DoctorId, NewAppointment, PatientId, Slot,
};

use super::{AppointmentRepository, BookingOutcome, RepositoryError, RescheduleOutcome};
use crate::DbPool;

pub struct SqlAppointmentRepository {
    pool: DbPool,
}

impl SqlAppointmentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn decode_appointment(row: &SqliteRow) -> Result<Appointment, RepositoryError> {
    let date: String = row.try_get("appointment_date")?;
    let time: String = row.try_get("appointment_time")?;
    let slot = Slot::parse(&date, &time).map_err(|error| {
        RepositoryError::Decode(format!("appointment slot `{date} {time}`: {error}"))
    })?;

    Ok(Appointment {
        id: AppointmentId(row.try_get("id")?),
        doctor_id: DoctorId(row.try_get("doctor_id")?),
        patient_id: PatientId(row.try_get("patient_id")?),
        slot,
    })
}

fn decode_doctor(row: &SqliteRow) -> Result<Doctor, RepositoryError> {
    Ok(Doctor {
        id: DoctorId(row.try_get("id")?),
        name: row.try_get("name")?,
        specialization: row.try_get("specialization")?,
    })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

#[async_trait::async_trait]
impl AppointmentRepository for SqlAppointmentRepository {
    async fn search_doctors(&self, name: Option<&str>) -> Result<Vec<Doctor>, RepositoryError> {
        let rows = match name.map(str::trim).filter(|value| !value.is_empty()) {
            Some(name) => {
                sqlx::query(
                    "SELECT id, name, specialization FROM doctor
                     WHERE name LIKE '%' || ?1 || '%' COLLATE NOCASE
                     ORDER BY id",
                )
                .bind(name)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT id, name, specialization FROM doctor ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(decode_doctor).collect()
    }

    async fn is_slot_free(
        &self,
        doctor_id: DoctorId,
        slot: &Slot,
        excluding: Option<AppointmentId>,
    ) -> Result<bool, RepositoryError> {
        let taken: i64 = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM appointment
                WHERE doctor_id = ?1 AND appointment_date = ?2 AND appointment_time = ?3
                  AND (?4 IS NULL OR id != ?4)
            )",
        )
        .bind(doctor_id.0)
        .bind(slot.date_string())
        .bind(slot.time_string())
        .bind(excluding.map(|id| id.0))
        .fetch_one(&self.pool)
        .await?;

        Ok(taken == 0)
    }

    async fn book(&self, appointment: NewAppointment) -> Result<BookingOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let doctor_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM doctor WHERE id = ?1)")
                .bind(appointment.doctor_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if doctor_exists == 0 {
            return Ok(BookingOutcome::UnknownDoctor);
        }

        let patient_exists: i64 =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM patient WHERE id = ?1)")
                .bind(appointment.patient_id.0)
                .fetch_one(&mut *tx)
                .await?;
        if patient_exists == 0 {
            return Ok(BookingOutcome::UnknownPatient);
        }

        let inserted = sqlx::query(
            "INSERT INTO appointment (doctor_id, patient_id, appointment_date, appointment_time)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(appointment.doctor_id.0)
        .bind(appointment.patient_id.0)
        .bind(appointment.slot.date_string())
        .bind(appointment.slot.time_string())
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(result) => AppointmentId(result.last_insert_rowid()),
            Err(error) if is_unique_violation(&error) => return Ok(BookingOutcome::SlotTaken),
            Err(error) => return Err(error.into()),
        };
        tx.commit().await?;

        Ok(BookingOutcome::Booked(Appointment {
            id,
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
            slot: appointment.slot,
        }))
    }

    async fn find_appointment(
        &self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, doctor_id, patient_id, appointment_date, appointment_time
             FROM appointment WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_appointment).transpose()
    }

    async fn cancel(&self, id: AppointmentId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM appointment WHERE id = ?1").bind(id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reschedule(
        &self,
        id: AppointmentId,
        slot: Slot,
    ) -> Result<RescheduleOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, doctor_id, patient_id, appointment_date, appointment_time
             FROM appointment WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(existing) = row.as_ref().map(decode_appointment).transpose()? else {
            return Ok(RescheduleOutcome::NotFound);
        };

        let updated = sqlx::query(
            "UPDATE appointment SET appointment_date = ?1, appointment_time = ?2 WHERE id = ?3",
        )
        .bind(slot.date_string())
        .bind(slot.time_string())
        .bind(id.0)
        .execute(&mut *tx)
        .await;

        match updated {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => return Ok(RescheduleOutcome::SlotTaken),
            Err(error) => return Err(error.into()),
        }
        tx.commit().await?;

        Ok(RescheduleOutcome::Rescheduled(Appointment { slot, ..existing }))
    }

    async fn save_doctor(&self, doctor: Doctor) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO doctor (id, name, specialization) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                                           specialization = excluded.specialization",
        )
        .bind(doctor.id.0)
        .bind(doctor.name)
        .bind(doctor.specialization)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_patient(&self, id: PatientId, name: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO patient (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(id.0)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
