//! Model-backed agents: the planner, the single-file editor, and the result validator.

pub mod editor;
pub mod planner;
pub mod validator;
