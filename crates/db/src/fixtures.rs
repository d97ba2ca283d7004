use serde::Serialize;
use triage_core::domain::appointment::{Doctor, DoctorId, PatientId};

use crate::repositories::{AppointmentRepository, RepositoryError};

struct SeedDoctor {
    id: i64,
    name: &'static str,
    specialization: &'static str,
}

const SEED_DOCTORS: &[SeedDoctor] = &[
    SeedDoctor { id: 1, name: "Dr. Sarah Ahmed", specialization: "Cardiology" },
    SeedDoctor { id: 2, name: "Dr. Omar Haddad", specialization: "Dermatology" },
    SeedDoctor { id: 3, name: "Dr. Lina Nasser", specialization: "Pediatrics" },
    SeedDoctor { id: 4, name: "Dr. Karim Saleh", specialization: "Orthopedics" },
    SeedDoctor { id: 5, name: "Dr. Maya Khoury", specialization: "General Practice" },
];

const SEED_PATIENTS: &[(i64, &str)] =
    &[(1, "Demo Patient"), (2, "Rami Aziz"), (3, "Nour Farah")];

/// Deterministic clinic directory used by `triage seed` and the end-to-end tests.
pub struct ClinicSeedDataset;

#[derive(Clone, Debug, Serialize)]
pub struct SeedResult {
    pub doctors_seeded: usize,
    pub patients_seeded: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(String, bool)>,
}

impl ClinicSeedDataset {
    pub fn doctors() -> Vec<Doctor> {
        SEED_DOCTORS
            .iter()
            .map(|doctor| Doctor {
                id: DoctorId(doctor.id),
                name: doctor.name.to_string(),
                specialization: doctor.specialization.to_string(),
            })
            .collect()
    }

    /// Idempotent: re-running overwrites the seeded rows in place.
    pub async fn load(repo: &dyn AppointmentRepository) -> Result<SeedResult, RepositoryError> {
        for doctor in Self::doctors() {
            repo.save_doctor(doctor).await?;
        }
        for (id, name) in SEED_PATIENTS {
            repo.save_patient(PatientId(*id), name).await?;
        }

        Ok(SeedResult { doctors_seeded: SEED_DOCTORS.len(), patients_seeded: SEED_PATIENTS.len() })
    }

    pub async fn verify(
        repo: &dyn AppointmentRepository,
    ) -> Result<VerificationResult, RepositoryError> {
        let present = repo.search_doctors(None).await?;
        let checks = Self::doctors()
            .into_iter()
            .map(|expected| {
                let found = present.iter().any(|doctor| doctor == &expected);
                (format!("doctor-{}", expected.id.0), found)
            })
            .collect::<Vec<_>>();

        let all_present = checks.iter().all(|(_, found)| *found);
        Ok(VerificationResult { all_present, checks })
    }
}

#[cfg(test)]
mod tests {
    use super::ClinicSeedDataset;
    use crate::repositories::{AppointmentRepository, InMemoryAppointmentRepository};

    #[tokio::test]
    async fn seeding_twice_is_idempotent() {
        let repo = InMemoryAppointmentRepository::default();

        ClinicSeedDataset::load(&repo).await.expect("first load");
        let second = ClinicSeedDataset::load(&repo).await.expect("second load");

        assert_eq!(second.doctors_seeded, 5);
        assert_eq!(repo.search_doctors(None).await.expect("search").len(), 5);
        assert!(ClinicSeedDataset::verify(&repo).await.expect("verify").all_present);
    }

    #[tokio::test]
    async fn verification_reports_missing_doctors() {
        let repo = InMemoryAppointmentRepository::default();
        let result = ClinicSeedDataset::verify(&repo).await.expect("verify");

        assert!(!result.all_present);
        assert_eq!(result.checks.len(), 5);
    }
}
