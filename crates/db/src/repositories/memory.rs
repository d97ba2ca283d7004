use std::collections::BTreeMap;

use tokio::sync::RwLock;

use triage_core::domain::appointment::{
    Appointment, AppointmentId, Doctor, DoctorId, NewAppointment, PatientId, Slot,
};

use super::{AppointmentRepository, BookingOutcome, RepositoryError, RescheduleOutcome};

#[derive(Default)]
struct ClinicTables {
    doctors: BTreeMap<DoctorId, Doctor>,
    patients: BTreeMap<PatientId, String>,
    appointments: BTreeMap<AppointmentId, Appointment>,
    last_appointment_id: i64,
}

impl ClinicTables {
    fn slot_taken(&self, doctor_id: DoctorId, slot: &Slot, excluding: Option<AppointmentId>) -> bool {
        self.appointments.values().any(|appointment| {
            appointment.doctor_id == doctor_id
                && &appointment.slot == slot
                && Some(appointment.id) != excluding
        })
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    tables: RwLock<ClinicTables>,
}

#[async_trait::async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn search_doctors(&self, name: Option<&str>) -> Result<Vec<Doctor>, RepositoryError> {
        let tables = self.tables.read().await;
        let needle = name.map(|value| value.trim().to_lowercase()).filter(|value| !value.is_empty());

        Ok(tables
            .doctors
            .values()
            .filter(|doctor| match &needle {
                Some(needle) => doctor.name.to_lowercase().contains(needle),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn is_slot_free(
        &self,
        doctor_id: DoctorId,
        slot: &Slot,
        excluding: Option<AppointmentId>,
    ) -> Result<bool, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(!tables.slot_taken(doctor_id, slot, excluding))
    }

    async fn book(&self, appointment: NewAppointment) -> Result<BookingOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;

        if !tables.doctors.contains_key(&appointment.doctor_id) {
            return Ok(BookingOutcome::UnknownDoctor);
        }
        if !tables.patients.contains_key(&appointment.patient_id) {
            return Ok(BookingOutcome::UnknownPatient);
        }
        if tables.slot_taken(appointment.doctor_id, &appointment.slot, None) {
            return Ok(BookingOutcome::SlotTaken);
        }

        tables.last_appointment_id += 1;
        let booked = Appointment {
            id: AppointmentId(tables.last_appointment_id),
            doctor_id: appointment.doctor_id,
            patient_id: appointment.patient_id,
            slot: appointment.slot,
        };
        tables.appointments.insert(booked.id, booked.clone());
        Ok(BookingOutcome::Booked(booked))
    }

    async fn find_appointment(
        &self,
        id: AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.appointments.get(&id).cloned())
    }

    async fn cancel(&self, id: AppointmentId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write().await;
        Ok(tables.appointments.remove(&id).is_some())
    }

    async fn reschedule(
        &self,
        id: AppointmentId,
        slot: Slot,
    ) -> Result<RescheduleOutcome, RepositoryError> {
        let mut tables = self.tables.write().await;

        let Some(doctor_id) = tables.appointments.get(&id).map(|existing| existing.doctor_id)
        else {
            return Ok(RescheduleOutcome::NotFound);
        };
        if tables.slot_taken(doctor_id, &slot, Some(id)) {
            return Ok(RescheduleOutcome::SlotTaken);
        }

        match tables.appointments.get_mut(&id) {
            Some(existing) => {
                existing.slot = slot;
                Ok(RescheduleOutcome::Rescheduled(existing.clone()))
            }
            None => Ok(RescheduleOutcome::NotFound),
        }
    }

    async fn save_doctor(&self, doctor: Doctor) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.doctors.insert(doctor.id, doctor);
        Ok(())
    }

    async fn save_patient(&self, id: PatientId, name: &str) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        tables.patients.insert(id, name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use triage_core::domain::appointment::{
        AppointmentId, Doctor, DoctorId, NewAppointment, PatientId, Slot,
    };

    use crate::repositories::{
        AppointmentRepository, BookingOutcome, InMemoryAppointmentRepository, RescheduleOutcome,
    };

    async fn seeded() -> InMemoryAppointmentRepository {
        let repo = InMemoryAppointmentRepository::default();
        repo.save_doctor(Doctor {
            id: DoctorId(1),
            name: "Dr. Sarah Ahmed".to_string(),
            specialization: "Cardiology".to_string(),
        })
        .await
        .expect("save doctor");
        repo.save_doctor(Doctor {
            id: DoctorId(2),
            name: "Dr. Omar Haddad".to_string(),
            specialization: "Dermatology".to_string(),
        })
        .await
        .expect("save doctor");
        repo.save_patient(PatientId(10), "Lina").await.expect("save patient");
        repo
    }

    fn slot(date: &str, time: &str) -> Slot {
        Slot::parse(date, time).expect("valid slot")
    }

    #[tokio::test]
    async fn doctor_search_is_case_insensitive_substring() {
        let repo = seeded().await;

        let found = repo.search_doctors(Some("sarah")).await.expect("search");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, DoctorId(1));

        let all = repo.search_doctors(None).await.expect("search all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn second_booking_for_same_slot_is_rejected() {
        let repo = seeded().await;
        let request = NewAppointment {
            doctor_id: DoctorId(1),
            patient_id: PatientId(10),
            slot: slot("2030-01-05", "10:00"),
        };

        let first = repo.book(request.clone()).await.expect("book");
        assert!(matches!(first, BookingOutcome::Booked(_)));
        assert_eq!(repo.book(request).await.expect("book"), BookingOutcome::SlotTaken);
    }

    #[tokio::test]
    async fn concurrent_bookings_for_one_slot_admit_exactly_one() {
        let repo = Arc::new(seeded().await);
        let request = NewAppointment {
            doctor_id: DoctorId(2),
            patient_id: PatientId(10),
            slot: slot("2030-01-05", "11:30"),
        };

        let handles = (0..8)
            .map(|_| {
                let repo = Arc::clone(&repo);
                let request = request.clone();
                tokio::spawn(async move { repo.book(request).await })
            })
            .collect::<Vec<_>>();

        let mut booked = 0;
        for handle in handles {
            if let BookingOutcome::Booked(_) = handle.await.expect("join").expect("book") {
                booked += 1;
            }
        }
        assert_eq!(booked, 1);
    }

    #[tokio::test]
    async fn booking_requires_known_doctor_and_patient() {
        let repo = seeded().await;

        let unknown_doctor = repo
            .book(NewAppointment {
                doctor_id: DoctorId(99),
                patient_id: PatientId(10),
                slot: slot("2030-01-05", "10:00"),
            })
            .await
            .expect("book");
        assert_eq!(unknown_doctor, BookingOutcome::UnknownDoctor);

        let unknown_patient = repo
            .book(NewAppointment {
                doctor_id: DoctorId(1),
                patient_id: PatientId(99),
                slot: slot("2030-01-05", "10:00"),
            })
            .await
            .expect("book");
        assert_eq!(unknown_patient, BookingOutcome::UnknownPatient);
    }

    #[tokio::test]
    async fn reschedule_ignores_own_slot_and_rejects_taken_ones() {
        let repo = seeded().await;
        let BookingOutcome::Booked(first) = repo
            .book(NewAppointment {
                doctor_id: DoctorId(1),
                patient_id: PatientId(10),
                slot: slot("2030-01-05", "10:00"),
            })
            .await
            .expect("book")
        else {
            panic!("first booking should succeed");
        };
        repo.book(NewAppointment {
            doctor_id: DoctorId(1),
            patient_id: PatientId(10),
            slot: slot("2030-01-05", "12:00"),
        })
        .await
        .expect("book");

        let same = repo.reschedule(first.id, first.slot).await.expect("reschedule");
        assert!(matches!(same, RescheduleOutcome::Rescheduled(_)));

        let taken = repo.reschedule(first.id, slot("2030-01-05", "12:00")).await.expect("reschedule");
        assert_eq!(taken, RescheduleOutcome::SlotTaken);

        let missing =
            repo.reschedule(AppointmentId(404), slot("2030-01-06", "09:00")).await.expect("reschedule");
        assert_eq!(missing, RescheduleOutcome::NotFound);
    }

    #[tokio::test]
    async fn cancel_reports_whether_anything_was_removed() {
        let repo = seeded().await;
        let BookingOutcome::Booked(booked) = repo
            .book(NewAppointment {
                doctor_id: DoctorId(2),
                patient_id: PatientId(10),
                slot: slot("2030-02-01", "09:15"),
            })
            .await
            .expect("book")
        else {
            panic!("booking should succeed");
        };

        assert!(repo.cancel(booked.id).await.expect("cancel"));
        assert!(!repo.cancel(booked.id).await.expect("cancel again"));
        assert_eq!(repo.find_appointment(booked.id).await.expect("find"), None);
    }
}
