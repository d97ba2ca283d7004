use crate::commands::{load_config, runtime, CommandResult};
use triage_db::{
    connect_with_settings, migrations, ClinicSeedDataset, SeedResult, SqlAppointmentRepository,
};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let repo = SqlAppointmentRepository::new(pool.clone());
        let seeded = ClinicSeedDataset::load(&repo)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = ClinicSeedDataset::verify(&repo)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let failed_checks = verification
            .checks
            .iter()
            .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
            .collect::<Vec<_>>();
        let run_result: Result<SeedResult, (&'static str, String, u8)> =
            if verification.all_present {
                Ok(seeded)
            } else {
                Err(("seed_verification", verification_failure_message(&failed_checks), 6u8))
            };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    let doctors = ClinicSeedDataset::doctors()
        .iter()
        .map(|doctor| format!("  - {} {} ({})", doctor.id.0, doctor.name, doctor.specialization))
        .collect::<Vec<_>>();
    format!(
        "clinic directory loaded: {} doctors, {} patients\n{}",
        seeded.doctors_seeded,
        seeded.patients_seeded,
        doctors.join("\n")
    )
}

fn verification_failure_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
