//! Request security
//!
//! The per-request validation pipeline and the background monitor that
//! learns from its failures.

pub mod authn;
pub mod authz;
pub mod monitor;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod rules;
pub mod sanitize;
