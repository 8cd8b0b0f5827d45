//! Ritadel console core.
//!
//! The validation gate, submission coordinator, progress ledger, log stream
//! client and report writer that the `ritadel` binary drives.

pub mod analysis;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod console;
pub mod models;
pub mod report;
pub mod stream;
pub mod validation;
