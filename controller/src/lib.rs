//! Notifications controller - hot-reloading controller core.
//!
//! This library provides the pieces the `notifications-controller` binary
//! wires together:
//! - `settings`: settings snapshots and the sources that observe them
//! - `supervisor`: swaps the running controller on every settings change
//! - `controller`: controller interfaces and the notifications controller
//! - `web`: signed webhook intake
//! - `metrics`: process-lifetime Prometheus registry
//!
//! ## Architecture
//!
//! ```text
//! Settings files → ConfigSource → Supervisor → ControllerFactory → Controller
//! Webhooks → Web Server (verify) → intake queue → Controller
//! ```

pub mod channels;
pub mod config;
pub mod controller;
pub mod metrics;
pub mod settings;
pub mod supervisor;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use controller::{IntakeQueue, NotificationControllerFactory};
pub use metrics::Metrics;
pub use settings::{ChannelRegistry, ConfigSource, FileSource, Settings};
pub use supervisor::{Supervisor, SupervisorError, SupervisorOptions, DIAGNOSTIC_CHANNEL};
pub use web::{verify_request, AppState, VerificationError};
