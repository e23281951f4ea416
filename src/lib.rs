//! Study Runner: a web experiment with surveys, a persona chat and a shared
//! response sheet.

pub mod config;
pub mod error;
pub mod llm;
pub mod retrieval;
pub mod store;
pub mod study;
