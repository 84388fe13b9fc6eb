//! Side-effecting collaborators: config, persistence, files, processes, models.

pub mod config;
pub mod context;
pub mod llm;
pub mod process;
pub mod prompt;
pub mod run_store;
pub mod workspace;
