//! haven-server: the HTTPS receive surface
//!
//! Serves the five protocol endpoints over TLS 1.2+ with a self-signed
//! certificate minted fresh at every start. The certificate's SHA-256
//! fingerprint is published on the event bus so the UI can display it for
//! out-of-band pairing verification.

pub mod routes;
pub mod service;
pub mod tls;

pub use service::{ReceiveServer, ServerDeps, ServerStartInfo};
pub use tls::{generate_identity, TlsIdentity};
