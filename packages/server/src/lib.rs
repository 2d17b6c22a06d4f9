// Ledgerline - financial document ingestion API
//
// Extracts transaction records from uploaded documents with a tool-calling
// model and drives each record through a human approval workflow before
// committing it. Architecture follows domain-driven design: orchestration in
// domains/ingestion, infrastructure behind kernel traits.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
