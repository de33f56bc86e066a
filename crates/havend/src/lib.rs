//! Library surface of the havend binary: the lifecycle controller.
//!
//! Exposed separately so integration tests (and an eventual UI shell) can
//! drive the application without going through the CLI.

pub mod app;

pub use app::App;
