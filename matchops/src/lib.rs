//! matchops library
//!
//! Release pipeline and request security for the Match marketplace backend.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod security;
pub mod server;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod workers;
