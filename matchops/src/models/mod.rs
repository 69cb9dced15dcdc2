//! Data models

pub mod deployment;
pub mod security;
