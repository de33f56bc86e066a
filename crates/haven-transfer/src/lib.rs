//! haven-transfer: the receive protocol state machine
//!
//! Two services cooperate here. The registration service turns a correct
//! PIN into a live session and rate-limits guessing per nonce. The transfer
//! coordinator drives the prepare → accept/reject → upload handshake on top
//! of those sessions, hands accepted payloads to the storage engine, and
//! tears everything down once every expected file is resolved.
//!
//! The coordinator never holds a reference to the registration service;
//! it receives two function-typed capabilities (`is_valid`, `forget`) at
//! construction.

pub mod coordinator;
pub mod models;
pub mod registration;

pub use coordinator::{ForgetSession, SessionIsValid, TransferCoordinator};
pub use models::{FileTransmission, PrepareUploadRequest, PrepareUploadResponse};
pub use registration::RegistrationService;
