//! tcpraw-cli — client-side flows for the tcpraw file relay.
//!
//! Exposed as a library so the binary stays a thin argument layer and the
//! integration suite can drive the same code paths in-process.

pub mod probe;
pub mod serverlist;
pub mod transfer;
