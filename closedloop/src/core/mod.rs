//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod intent;
pub mod normalize;
pub mod path;
pub mod payload;
pub mod run;
pub mod text;
pub mod topo;
pub mod types;
