//! Appointment tools bound to the booking and cancellation handlers.
//!
//! Every tool is a thin adapter over [`AppointmentRepository`]. Domain-level
//! refusals (slot taken, appointment missing, bad slot) are successful tool
//! executions returning `{"success": false, "message": ...}`; only store
//! failures surface as [`ToolError`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use triage_core::domain::appointment::{
    Appointment, AppointmentId, DoctorId, NewAppointment, PatientId, Slot,
};
use triage_core::errors::DomainError;
use triage_db::{AppointmentRepository, BookingOutcome, RepositoryError, RescheduleOutcome};

use crate::tools::{parse_arguments, schema_of, Tool, ToolError, ToolRegistry};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time; appointment slots carry no timezone.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

fn refused(message: &str) -> Value {
    json!({ "success": false, "message": message })
}

fn slot_refusal(error: &DomainError) -> Value {
    match error {
        DomainError::SlotInPast => refused("Appointment must be booked for a future time."),
        DomainError::OutsideClinicHours { opening_hour, closing_hour } => refused(&format!(
            "Appointment time must be between {opening_hour:02}:00 and {closing_hour:02}:00."
        )),
        DomainError::InvalidSlotFormat => {
            refused("Invalid date or time format. Use YYYY-MM-DD and HH:MM.")
        }
    }
}

fn store_failure(error: RepositoryError) -> ToolError {
    ToolError::Execution(error.to_string())
}

fn appointment_json(appointment: &Appointment) -> Value {
    json!({
        "appointment_id": appointment.id.0,
        "date": appointment.slot.date_string(),
        "time": appointment.slot.time_string(),
        "doctor_id": appointment.doctor_id.0,
        "patient_id": appointment.patient_id.0,
    })
}

/// Registers all six appointment tools on `registry`.
pub fn register_appointment_tools(
    registry: &mut ToolRegistry,
    store: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
) {
    registry.register(SearchForDoctorTool { store: Arc::clone(&store) });
    registry.register(CheckDoctorAvailabilityTool { store: Arc::clone(&store) });
    registry.register(BookAppointmentTool { store: Arc::clone(&store), clock: Arc::clone(&clock) });
    registry.register(SearchForAppointmentTool { store: Arc::clone(&store) });
    registry.register(CancelAppointmentTool { store: Arc::clone(&store) });
    registry.register(RescheduleAppointmentTool { store, clock });
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchForDoctorArgs {
    /// Partial or full doctor name; omit to list every doctor.
    #[serde(default)]
    pub name: Option<String>,
}

pub struct SearchForDoctorTool {
    store: Arc<dyn AppointmentRepository>,
}

#[async_trait]
impl Tool for SearchForDoctorTool {
    fn name(&self) -> &'static str {
        "search_for_doctor"
    }

    fn description(&self) -> &'static str {
        "Search for doctors by name (or return all if name is not given)."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<SearchForDoctorArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: SearchForDoctorArgs = parse_arguments(self.name(), arguments)?;
        let name = args.name.as_deref().map(str::trim).filter(|name| !name.is_empty());
        let doctors = self.store.search_doctors(name).await.map_err(store_failure)?;

        let doctors = doctors
            .iter()
            .map(|doctor| {
                json!({
                    "doctor_id": doctor.id.0,
                    "name": doctor.name,
                    "specialization": doctor.specialization,
                })
            })
            .collect::<Vec<_>>();
        Ok(json!({ "success": true, "doctors": doctors }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckDoctorAvailabilityArgs {
    pub doctor_id: i64,
    /// Date in `YYYY-MM-DD`.
    pub date: String,
    /// Time in `HH:MM`.
    pub time: String,
}

pub struct CheckDoctorAvailabilityTool {
    store: Arc<dyn AppointmentRepository>,
}

#[async_trait]
impl Tool for CheckDoctorAvailabilityTool {
    fn name(&self) -> &'static str {
        "check_doctor_availability"
    }

    fn description(&self) -> &'static str {
        "Check if a doctor is available at a given date and time."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<CheckDoctorAvailabilityArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: CheckDoctorAvailabilityArgs = parse_arguments(self.name(), arguments)?;
        let slot = match Slot::parse(&args.date, &args.time) {
            Ok(slot) => slot,
            Err(error) => return Ok(slot_refusal(&error)),
        };

        let available = self
            .store
            .is_slot_free(DoctorId(args.doctor_id), &slot, None)
            .await
            .map_err(store_failure)?;
        let message = if available { "Doctor is available" } else { "Doctor is not available" };
        Ok(json!({ "available": available, "message": message }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BookAppointmentArgs {
    /// Patient identifier.
    pub user_id: i64,
    pub doctor_id: i64,
    /// Date in `YYYY-MM-DD`.
    pub date: String,
    /// Time in `HH:MM`.
    pub time: String,
}

pub struct BookAppointmentTool {
    store: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Tool for BookAppointmentTool {
    fn name(&self) -> &'static str {
        "book_appointment"
    }

    fn description(&self) -> &'static str {
        "Book an appointment with a doctor if available."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<BookAppointmentArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: BookAppointmentArgs = parse_arguments(self.name(), arguments)?;
        let slot = match Slot::parse(&args.date, &args.time)
            .and_then(|slot| slot.ensure_bookable(self.clock.now()).map(|()| slot))
        {
            Ok(slot) => slot,
            Err(error) => return Ok(slot_refusal(&error)),
        };

        let outcome = self
            .store
            .book(NewAppointment {
                doctor_id: DoctorId(args.doctor_id),
                patient_id: PatientId(args.user_id),
                slot,
            })
            .await
            .map_err(store_failure)?;

        Ok(match outcome {
            BookingOutcome::Booked(appointment) => json!({
                "success": true,
                "message": "Appointment booked successfully.",
                "appointment": appointment_json(&appointment),
            }),
            BookingOutcome::SlotTaken => {
                refused("Doctor is not available at this date and time.")
            }
            BookingOutcome::UnknownDoctor => refused("Doctor not found."),
            BookingOutcome::UnknownPatient => refused("Patient not found."),
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AppointmentIdArgs {
    pub appointment_id: i64,
}

pub struct SearchForAppointmentTool {
    store: Arc<dyn AppointmentRepository>,
}

#[async_trait]
impl Tool for SearchForAppointmentTool {
    fn name(&self) -> &'static str {
        "search_for_appointment"
    }

    fn description(&self) -> &'static str {
        "Search for an appointment by its ID."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<AppointmentIdArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: AppointmentIdArgs = parse_arguments(self.name(), arguments)?;
        let found = self
            .store
            .find_appointment(AppointmentId(args.appointment_id))
            .await
            .map_err(store_failure)?;

        Ok(match found {
            Some(appointment) => {
                json!({ "success": true, "appointment": appointment_json(&appointment) })
            }
            None => refused("Appointment not found."),
        })
    }
}

pub struct CancelAppointmentTool {
    store: Arc<dyn AppointmentRepository>,
}

#[async_trait]
impl Tool for CancelAppointmentTool {
    fn name(&self) -> &'static str {
        "cancel_appointment"
    }

    fn description(&self) -> &'static str {
        "Cancel an existing appointment by its ID."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<AppointmentIdArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: AppointmentIdArgs = parse_arguments(self.name(), arguments)?;
        let cancelled = self
            .store
            .cancel(AppointmentId(args.appointment_id))
            .await
            .map_err(store_failure)?;

        Ok(if cancelled {
            json!({ "success": true, "message": "Appointment cancelled successfully." })
        } else {
            refused("Appointment not found.")
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RescheduleAppointmentArgs {
    pub appointment_id: i64,
    /// New date in `YYYY-MM-DD`.
    pub date: String,
    /// New time in `HH:MM`.
    pub time: String,
}

pub struct RescheduleAppointmentTool {
    store: Arc<dyn AppointmentRepository>,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Tool for RescheduleAppointmentTool {
    fn name(&self) -> &'static str {
        "reschedule_appointment"
    }

    fn description(&self) -> &'static str {
        "Reschedule an existing appointment to a new date and time if the doctor is available."
    }

    fn argument_schema(&self) -> Value {
        schema_of::<RescheduleAppointmentArgs>()
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: RescheduleAppointmentArgs = parse_arguments(self.name(), arguments)?;
        let slot = match Slot::parse(&args.date, &args.time)
            .and_then(|slot| slot.ensure_bookable(self.clock.now()).map(|()| slot))
        {
            Ok(slot) => slot,
            Err(error) => return Ok(slot_refusal(&error)),
        };

        let outcome = self
            .store
            .reschedule(AppointmentId(args.appointment_id), slot)
            .await
            .map_err(store_failure)?;

        Ok(match outcome {
            RescheduleOutcome::Rescheduled(appointment) => json!({
                "success": true,
                "message": "Appointment rescheduled successfully.",
                "appointment": appointment_json(&appointment),
            }),
            RescheduleOutcome::NotFound => refused("Appointment not found."),
            RescheduleOutcome::SlotTaken => {
                refused("Doctor is not available at the requested time.")
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{NaiveDate, NaiveDateTime};
    use serde_json::{json, Value};
    use triage_db::{AppointmentRepository, ClinicSeedDataset, InMemoryAppointmentRepository};

    use super::{register_appointment_tools, FixedClock};
    use crate::tools::ToolRegistry;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .and_then(|date| date.and_hms_opt(9, 0, 0))
            .expect("fixture time")
    }

    async fn registry() -> ToolRegistry {
        let store = Arc::new(InMemoryAppointmentRepository::default());
        ClinicSeedDataset::load(store.as_ref()).await.expect("seed");
        let store: Arc<dyn AppointmentRepository> = store;

        let mut registry = ToolRegistry::new(Duration::from_secs(1));
        register_appointment_tools(&mut registry, store, Arc::new(FixedClock(now())));
        registry
    }

    async fn call(registry: &ToolRegistry, name: &str, arguments: Value) -> Value {
        registry.execute(name, arguments).await.expect("tool executes")
    }

    #[tokio::test]
    async fn booking_flow_checks_then_books_then_reports_taken() {
        let registry = registry().await;
        let slot = json!({ "doctor_id": 1, "date": "2026-03-11", "time": "15:00" });

        let availability = call(&registry, "check_doctor_availability", slot.clone()).await;
        assert_eq!(availability, json!({ "available": true, "message": "Doctor is available" }));

        let mut booking = slot.clone();
        booking["user_id"] = json!(1);
        let booked = call(&registry, "book_appointment", booking.clone()).await;
        assert_eq!(booked["success"], json!(true));
        assert_eq!(booked["message"], json!("Appointment booked successfully."));

        let taken = call(&registry, "check_doctor_availability", slot).await;
        assert_eq!(taken["available"], json!(false));

        let again = call(&registry, "book_appointment", booking).await;
        assert_eq!(again["message"], json!("Doctor is not available at this date and time."));
    }

    #[tokio::test]
    async fn booking_rejects_past_after_hours_and_malformed_slots() {
        let registry = registry().await;
        let attempt = |date: &str, time: &str| {
            json!({ "user_id": 1, "doctor_id": 1, "date": date, "time": time })
        };

        let past = call(&registry, "book_appointment", attempt("2026-03-09", "10:00")).await;
        assert_eq!(past["message"], json!("Appointment must be booked for a future time."));

        let late = call(&registry, "book_appointment", attempt("2026-03-11", "22:30")).await;
        assert_eq!(late["message"], json!("Appointment time must be between 08:00 and 22:00."));

        let bad = call(&registry, "book_appointment", attempt("11/03/2026", "3pm")).await;
        assert_eq!(bad["message"], json!("Invalid date or time format. Use YYYY-MM-DD and HH:MM."));
    }

    #[tokio::test]
    async fn search_cancel_and_reschedule_an_existing_appointment() {
        let registry = registry().await;
        let booked = call(
            &registry,
            "book_appointment",
            json!({ "user_id": 2, "doctor_id": 3, "date": "2026-03-12", "time": "09:30" }),
        )
        .await;
        let id = booked["appointment"]["appointment_id"].clone();

        let found = call(&registry, "search_for_appointment", json!({ "appointment_id": id })).await;
        assert_eq!(found["appointment"]["doctor_id"], json!(3));
        assert_eq!(found["appointment"]["time"], json!("09:30"));

        let moved = call(
            &registry,
            "reschedule_appointment",
            json!({ "appointment_id": id, "date": "2026-03-13", "time": "10:00" }),
        )
        .await;
        assert_eq!(moved["success"], json!(true));
        assert_eq!(moved["appointment"]["date"], json!("2026-03-13"));

        let cancelled = call(&registry, "cancel_appointment", json!({ "appointment_id": id })).await;
        assert_eq!(cancelled["message"], json!("Appointment cancelled successfully."));

        let missing = call(&registry, "cancel_appointment", json!({ "appointment_id": id })).await;
        assert_eq!(missing, json!({ "success": false, "message": "Appointment not found." }));
    }

    #[tokio::test]
    async fn doctor_search_matches_partial_names() {
        let registry = registry().await;

        let all = call(&registry, "search_for_doctor", json!({})).await;
        assert_eq!(all["doctors"].as_array().map(Vec::len), Some(5));

        let some = call(&registry, "search_for_doctor", json!({ "name": "khoury" })).await;
        assert_eq!(some["doctors"][0]["name"], json!("Dr. Maya Khoury"));
    }
}
