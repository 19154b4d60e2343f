pub mod agent;
pub mod clock;
pub mod error;
pub mod grid;
pub mod messaging;
pub mod oracle;
pub mod runner;
pub mod scenario;
pub mod systems;
pub mod telemetry;
pub mod transfer;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;
