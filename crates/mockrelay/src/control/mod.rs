//! Bidirectional control plane.
//!
//! Newline-delimited JSON over TCP. Clients drive rule CRUD, resolution, the
//! request ledger, and settings through correlated request/reply pairs; the
//! server pushes the full rule set to every connection whenever the mock
//! table changes.

pub mod client;
pub mod protocol;
pub mod router;
pub mod server;

pub use client::{ClientOptions, ConnectionState, ControlPlaneClient};
pub use protocol::{Envelope, MessageType};
pub use server::{ControlPlaneServer, ServerContext};
