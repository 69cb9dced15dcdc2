//! Deployment module

pub mod audit;
pub mod backends;
pub mod backup;
pub mod executor;
pub mod fsm;
pub mod migrations;
pub mod process;
pub mod release;
pub mod verify;
pub mod version;
