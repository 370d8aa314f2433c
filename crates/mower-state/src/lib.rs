//! Finite-state machine governing mower behavior.
//!
//! The state vocabulary and the transition table live in
//! [`mower_types::state`]; this crate owns the runtime: the current state,
//! the callback protocol, the append-only transition history, and the error
//! condition helper.

pub mod manager;

pub use manager::{StateManager, TransitionContext, TransitionRecord};
