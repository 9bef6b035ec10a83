pub mod channel;
pub mod config;
pub mod readiness;
pub mod registry;
pub mod runtime;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod terminal;
