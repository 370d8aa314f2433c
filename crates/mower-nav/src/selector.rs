//! Online coverage-pattern selector.
//!
//! A tabular policy maps a discretized yard state to a preference value per
//! pattern.  After every completed mowing session the planner reports a
//! reward in `[0, 1]` derived from coverage, traversal time, and collision
//! count; the table is updated with a constant-step incremental average and
//! the next pattern is chosen ε-greedily, with ε decaying as experience
//! accumulates.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use rand::Rng;
use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use mower_types::MowerError;

use crate::pattern::PatternType;

/// File format version tag for persisted models.
const MODEL_VERSION: u32 = 1;

const ALPHA: f64 = 0.1;
const EPSILON_START: f64 = 0.3;
const EPSILON_FLOOR: f64 = 0.05;
/// Sessions over which ε decays from start to floor.
const EPSILON_DECAY_SESSIONS: u64 = 100;

/// Reward formula weights; the defaults match the tuned production values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardWeights {
    pub coverage: f64,
    pub time: f64,
    pub collision: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            coverage: 0.6,
            time: 0.3,
            collision: 0.1,
        }
    }
}

/// Outcome of one completed mowing session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOutcome {
    /// Fraction of the planned area actually covered, `[0, 1]`.
    pub coverage_fraction: f64,
    /// Wall-clock traversal time, seconds.
    pub traversal_time_s: f64,
    /// Time allotted for the session, seconds.
    pub time_budget_s: f64,
    /// Avoidance engagements during the session.
    pub collisions: u32,
}

#[derive(Serialize, Deserialize)]
struct PersistedModel {
    version: u32,
    sessions: u64,
    entries: Vec<(u64, PatternType, f64)>,
}

pub struct PatternSelector {
    q: HashMap<(u64, PatternType), f64>,
    sessions: u64,
    weights: RewardWeights,
    rng: StdRng,
}

impl Default for PatternSelector {
    fn default() -> Self {
        Self::new(RewardWeights::default())
    }
}

impl PatternSelector {
    pub fn new(weights: RewardWeights) -> Self {
        Self {
            q: HashMap::new(),
            sessions: 0,
            weights,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic selector for tests.
    pub fn with_seed(weights: RewardWeights, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new(weights)
        }
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Current exploration rate: linear decay from 0.3 to 0.05 over the
    /// first 100 sessions.
    pub fn epsilon(&self) -> f64 {
        let progress = self.sessions.min(EPSILON_DECAY_SESSIONS) as f64
            / EPSILON_DECAY_SESSIONS as f64;
        EPSILON_START - (EPSILON_START - EPSILON_FLOOR) * progress
    }

    pub fn q_value(&self, state: u64, pattern: PatternType) -> f64 {
        self.q.get(&(state, pattern)).copied().unwrap_or(0.0)
    }

    /// ε-greedy pattern choice for `state`.
    pub fn select(&mut self, state: u64) -> PatternType {
        if self.rng.r#gen::<f64>() < self.epsilon() {
            let choice = *PatternType::ALL
                .choose(&mut self.rng)
                .expect("pattern list is non-empty");
            debug!(?choice, state, "exploratory pattern choice");
            return choice;
        }
        self.greedy(state)
    }

    /// The argmax pattern for `state` (declaration order breaks ties).
    pub fn greedy(&self, state: u64) -> PatternType {
        let mut best = PatternType::ALL[0];
        let mut best_q = self.q_value(state, best);
        for pattern in &PatternType::ALL[1..] {
            let q = self.q_value(state, *pattern);
            if q > best_q {
                best = *pattern;
                best_q = q;
            }
        }
        best
    }

    /// Reward for a session outcome, clamped into `[0, 1]`.
    pub fn reward(&self, outcome: &SessionOutcome) -> f64 {
        let time_ratio = if outcome.time_budget_s > 0.0 {
            (outcome.traversal_time_s / outcome.time_budget_s).min(1.0)
        } else {
            1.0
        };
        let raw = outcome.coverage_fraction.clamp(0.0, 1.0) * self.weights.coverage
            + (1.0 - time_ratio) * self.weights.time
            - outcome.collisions as f64 * self.weights.collision;
        raw.clamp(0.0, 1.0)
    }

    /// Incorporate a finished session:
    /// `Q[s,a] ← Q[s,a] + α (r − Q[s,a])`.
    pub fn record_session(&mut self, state: u64, pattern: PatternType, outcome: &SessionOutcome) {
        let r = self.reward(outcome);
        let q = self.q.entry((state, pattern)).or_insert(0.0);
        *q += ALPHA * (r - *q);
        self.sessions += 1;
        debug!(state, ?pattern, reward = r, q = *q, "pattern model updated");
    }

    /// Persist the model as a versioned JSON record.
    pub fn save(&self, path: &Path) -> Result<(), MowerError> {
        let model = PersistedModel {
            version: MODEL_VERSION,
            sessions: self.sessions,
            entries: self
                .q
                .iter()
                .map(|(&(state, pattern), &q)| (state, pattern, q))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&model)
            .map_err(|e| MowerError::Serialization(e.to_string()))?;
        let mut file = std::fs::File::create(path).map_err(|e| MowerError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        file.write_all(&json).map_err(|e| MowerError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Load a persisted model.  A missing file yields a fresh model; a
    /// version mismatch is refused.
    pub fn load(&mut self, path: &Path) -> Result<(), MowerError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "no persisted pattern model; starting fresh");
                return Ok(());
            }
            Err(e) => {
                return Err(MowerError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        let model: PersistedModel = serde_json::from_slice(&bytes)
            .map_err(|e| MowerError::Serialization(e.to_string()))?;
        if model.version != MODEL_VERSION {
            return Err(MowerError::Serialization(format!(
                "unsupported pattern model version {}",
                model.version
            )));
        }
        self.sessions = model.sessions;
        self.q = model
            .entries
            .into_iter()
            .map(|(state, pattern, q)| ((state, pattern), q))
            .collect();
        Ok(())
    }
}

/// Discretize yard features into a table key: bucketed area, obstacle
/// count, and spacing.
pub fn state_hash(boundary_area_m2: f64, obstacle_count: usize, spacing: f64) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ((boundary_area_m2 / 25.0) as u64).hash(&mut hasher);
    (obstacle_count.min(16) as u64).hash(&mut hasher);
    ((spacing * 10.0) as u64).hash(&mut hasher);
    hasher.finish()
}
