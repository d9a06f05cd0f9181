//! Stackforge — Rust-native stack definition.
//!
//! Declares a typed resource graph for a containerized web app on one
//! instance, validates and orders it, and synthesizes a CloudFormation
//! template. BLAKE3 state locks and a JSONL provenance log track what was
//! synthesized.

pub mod cli;
pub mod core;
pub mod tripwire;
