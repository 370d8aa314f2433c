//! [`StateManager`] – validated transitions, callbacks, and audit history.
//!
//! The sole externally-observable mutation is
//! [`StateManager::transition_to`].  On a valid transition the callback
//! protocol runs in a fixed order, all under the state lock so transitions
//! are serialized and callbacks finish before the next transition is
//! admitted:
//!
//! 1. exit hooks of the old state
//! 2. global transition hooks
//! 3. the state swap itself
//! 4. entry hooks of the new state
//!
//! Hooks must not call back into `transition_to` (the state lock is held;
//! re-entry would deadlock).  An entry hook that needs follow-up work
//! enqueues an event instead.  A panicking hook is caught and logged and
//! never blocks peers or the transition.
//!
//! An invalid transition mutates nothing: no state change, no history
//! record, no callbacks.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use mower_types::{MowerError, MowerState};

/// Free-form key/value payload attached to a transition.
pub type TransitionContext = serde_json::Map<String, Value>;

/// One entry in the append-only transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub from: MowerState,
    pub to: MowerState,
    pub context: TransitionContext,
}

const HISTORY_CAP: usize = 100;

type EntryExitHook = Box<dyn Fn(MowerState, &TransitionContext) + Send>;
type TransitionHook = Box<dyn Fn(MowerState, MowerState, &TransitionContext) + Send>;

struct Inner {
    current: MowerState,
    previous: Option<MowerState>,
    entered_at: Instant,
    history: VecDeque<TransitionRecord>,
    error_message: Option<String>,
    entry_hooks: HashMap<MowerState, Vec<EntryExitHook>>,
    exit_hooks: HashMap<MowerState, Vec<EntryExitHook>>,
    transition_hooks: Vec<TransitionHook>,
}

pub struct StateManager {
    inner: Mutex<Inner>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(MowerState::Initializing)
    }
}

impl StateManager {
    pub fn new(initial: MowerState) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: initial,
                previous: None,
                entered_at: Instant::now(),
                history: VecDeque::with_capacity(HISTORY_CAP),
                error_message: None,
                entry_hooks: HashMap::new(),
                exit_hooks: HashMap::new(),
                transition_hooks: Vec::new(),
            }),
        }
    }

    pub fn current_state(&self) -> MowerState {
        self.lock().current
    }

    pub fn previous_state(&self) -> Option<MowerState> {
        self.lock().previous
    }

    /// How long the machine has been in the current state.
    pub fn time_in_state(&self) -> Duration {
        self.lock().entered_at.elapsed()
    }

    /// The transition history, oldest first (bounded ring).
    pub fn history(&self) -> Vec<TransitionRecord> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn error_condition(&self) -> Option<String> {
        self.lock().error_message.clone()
    }

    /// Register a hook that runs when `state` is entered.
    pub fn on_entry(
        &self,
        state: MowerState,
        hook: impl Fn(MowerState, &TransitionContext) + Send + 'static,
    ) {
        self.lock()
            .entry_hooks
            .entry(state)
            .or_default()
            .push(Box::new(hook));
    }

    /// Register a hook that runs when `state` is exited.
    pub fn on_exit(
        &self,
        state: MowerState,
        hook: impl Fn(MowerState, &TransitionContext) + Send + 'static,
    ) {
        self.lock()
            .exit_hooks
            .entry(state)
            .or_default()
            .push(Box::new(hook));
    }

    /// Register a hook that runs on every successful transition.
    pub fn on_transition(
        &self,
        hook: impl Fn(MowerState, MowerState, &TransitionContext) + Send + 'static,
    ) {
        self.lock().transition_hooks.push(Box::new(hook));
    }

    /// Transition to `target` with an empty context.
    pub fn transition_to(&self, target: MowerState) -> Result<(), MowerError> {
        self.transition_with(target, TransitionContext::new())
    }

    /// Transition to `target`, recording `context` in the history and
    /// passing it to every hook.
    pub fn transition_with(
        &self,
        target: MowerState,
        context: TransitionContext,
    ) -> Result<(), MowerError> {
        let mut inner = self.lock();
        let from = inner.current;
        if !from.can_transition_to(target) {
            return Err(MowerError::InvalidTransition { from, to: target });
        }

        if let Some(hooks) = inner.exit_hooks.get(&from) {
            for hook in hooks {
                run_hook(|| hook(from, &context));
            }
        }
        for hook in &inner.transition_hooks {
            run_hook(|| hook(from, target, &context));
        }

        inner.previous = Some(from);
        inner.current = target;
        inner.entered_at = Instant::now();
        if inner.history.len() == HISTORY_CAP {
            inner.history.pop_front();
        }
        inner.history.push_back(TransitionRecord {
            timestamp: Utc::now(),
            from,
            to: target,
            context: context.clone(),
        });
        info!(from = %from, to = %target, "state transition");

        if let Some(hooks) = inner.entry_hooks.get(&target) {
            for hook in hooks {
                run_hook(|| hook(target, &context));
            }
        }
        Ok(())
    }

    /// Record an error message and transition to [`MowerState::Error`].
    ///
    /// The message is stored even when the transition itself is rejected
    /// (e.g. during shutdown), and the rejection is returned to the caller.
    pub fn set_error_condition(&self, message: impl Into<String>) -> Result<(), MowerError> {
        let message = message.into();
        self.lock().error_message = Some(message.clone());
        let mut context = TransitionContext::new();
        context.insert("error_message".to_string(), Value::String(message));
        self.transition_with(MowerState::Error, context)
    }

    /// Drop the stored error message without transitioning.
    pub fn clear_error_condition(&self) {
        self.lock().error_message = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("state lock poisoned")
    }
}

fn run_hook(f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("state hook panicked");
    }
}
