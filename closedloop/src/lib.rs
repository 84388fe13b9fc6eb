//! Closed-loop task orchestrator.
//!
//! A run turns one user request into repeated plan/act/observe rounds: the
//! planner proposes a batch of typed actions, the executor runs them against
//! the workspace, and the observed results feed the next plan until the run
//! completes, blocks, or needs the user.
//!
//! - **[`core`]**: Pure logic (run records, action batches, normalization,
//!   dependency ordering, intent inference). No I/O.
//! - **[`io`]**: Side effects (run persistence, workspace files, processes,
//!   the model command, prompts, context snapshots).
//! - **[`agents`]**: Model-backed roles built on [`io::llm::LanguageModel`].
//! - **[`actions`]**: Executes one action and turns it into a record.
//!
//! [`orchestrator`] drives the state machine; [`looping`] repeats it until a
//! run settles.

pub mod actions;
pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
