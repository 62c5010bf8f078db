//! DeFi Fund Manager
//!
//! A supervisor-routed pair of specialists behind one chat entry point:
//! - Analyst: prices, news, local research notes (read-only)
//! - Executor: wallet balance, WETH wrapping, Aave approval and deposit
//! - Transactions are returned as unsigned JSON for an external wallet
//!
//! TURN LOOP:
//! USER → SUPERVISOR → SPECIALIST → SUPERVISOR → ... → DONE → AGGREGATE

pub mod advisor;
pub mod agent;
pub mod api;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod llm;
pub mod memory;
pub mod models;
pub mod supervisor;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use advisor::Advisor;
pub use classifier::{Intent, IntentClassifier};
pub use models::*;
