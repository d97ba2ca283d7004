pub mod appointment;
pub mod conversation;
