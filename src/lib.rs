//! WAGERCHAT: wallet-identity chat with oracle-settled price bets.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod escrow;
pub mod oracle;
pub mod messaging;
pub mod session;
pub mod engine;
pub mod shell;
pub mod storage;
pub mod dashboard;
