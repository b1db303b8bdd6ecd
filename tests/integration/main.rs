//! tcpraw integration suite.
//!
//! Every test runs a real server in-process on an ephemeral loopback port
//! and drives it through the client library — actual TCP, actual files,
//! actual HTTP where the test calls for it.

mod harness;
mod http_surface;
mod limits;
mod storage;
mod transfers;
