//! haven-core: shared foundations for the Haven receive vault
//!
//! Holds the pieces every other crate needs: the workspace-wide error
//! taxonomy, the daemon configuration, the UI event bus, and the wire-level
//! types shared between the transfer protocol and the event payloads.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::HavenConfig;
pub use error::{HavenError, HavenResult};
pub use events::{Event, EventBus};
pub use types::{DeviceInfo, FileInfo};
