//! Lifetime score ledger
//!
//! Session scores are ephemeral; the ledger accumulates them across
//! sessions and process restarts. Normal gameplay can only ever add to a
//! player's lifetime total: when a session ends, only its net-positive
//! deltas are credited. A separate administrative path applies arbitrary
//! signed adjustments. Ties in the ranking are broken by a monotonically
//! increasing step counter: whoever reached their score first ranks
//! higher.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;

use crate::transport::UserId;

/// Failure loading or persisting the ledger store
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The backing file could not be read or written
    #[error("ledger store io: {0}")]
    Io(#[from] std::io::Error),
    /// The backing file held malformed data
    #[error("ledger store format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Durable backing store for lifetime totals
///
/// The store holds only the totals map; tie-break steps are session-local
/// bookkeeping and restart from zero with the process.
pub trait LedgerStore: Send + Sync {
    /// Loads the persisted totals
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store is unreadable; callers
    /// degrade to an empty ledger.
    fn load(&self) -> Result<HashMap<UserId, i64>, LedgerError>;

    /// Rewrites the persisted totals wholesale
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the store cannot be written.
    fn persist(&self, totals: &HashMap<UserId, i64>) -> Result<(), LedgerError>;
}

/// JSON file store, rewritten on every credited change
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Creates a store backed by the given file path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<HashMap<UserId, i64>, LedgerError> {
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn persist(&self, totals: &HashMap<UserId, i64>) -> Result<(), LedgerError> {
        let contents = serde_json::to_string_pretty(totals)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

/// Volatile store for embedders that do not want persistence, and for tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    totals: std::sync::Mutex<HashMap<UserId, i64>>,
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<HashMap<UserId, i64>, LedgerError> {
        Ok(self.totals.lock().map(|t| t.clone()).unwrap_or_default())
    }

    fn persist(&self, totals: &HashMap<UserId, i64>) -> Result<(), LedgerError> {
        if let Ok(mut stored) = self.totals.lock() {
            *stored = totals.clone();
        }
        Ok(())
    }
}

/// One row of a ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankEntry {
    /// The ranked player
    pub user: UserId,
    /// The player's score
    pub score: i64,
}

/// Orders a score map by score descending, then by ascending step
///
/// Players missing from the step map sort after stamped players of equal
/// score. Shared by the lifetime ledger and per-session standings.
pub fn sorted_standings(
    scores: &HashMap<UserId, i64>,
    steps: &HashMap<UserId, u64>,
) -> Vec<RankEntry> {
    scores
        .iter()
        .map(|(user, score)| (*user, *score))
        .sorted_by_key(|(user, score)| (-score, steps.get(user).copied().unwrap_or(u64::MAX)))
        .map(|(user, score)| RankEntry { user, score })
        .collect()
}

/// The lifetime score ledger
pub struct ScoreLedger {
    totals: HashMap<UserId, i64>,
    steps: HashMap<UserId, u64>,
    step_counter: u64,
    store: Box<dyn LedgerStore>,
}

impl ScoreLedger {
    /// Opens the ledger over a store, degrading to empty on load failure
    pub fn open(store: Box<dyn LedgerStore>) -> Self {
        let totals = match store.load() {
            Ok(totals) => totals,
            Err(err) => {
                tracing::warn!(%err, "ledger store unreadable, starting empty");
                HashMap::new()
            }
        };
        Self {
            totals,
            steps: HashMap::new(),
            step_counter: 0,
            store,
        }
    }

    /// Credits a finished session's scores
    ///
    /// Only entries with a positive score are applied; lifetime totals
    /// never decrease through normal gameplay. Each credited player gets a
    /// tie-break step stamped on first credit.
    pub fn credit_session(&mut self, session_scores: &HashMap<UserId, i64>) {
        let mut changed = false;
        for (user, score) in session_scores.iter().sorted_by_key(|(user, _)| **user) {
            if *score <= 0 {
                continue;
            }
            *self.totals.entry(*user).or_default() += score;
            self.step_counter += 1;
            self.steps.entry(*user).or_insert(self.step_counter);
            changed = true;
        }
        if changed {
            self.flush();
        }
    }

    /// Applies a signed administrative adjustment, returning the new total
    ///
    /// Unlike session credits, adjustments may be negative and always
    /// stamp the tie-break step.
    pub fn adjust(&mut self, user: UserId, delta: i64) -> i64 {
        let total = self.totals.entry(user).or_default();
        *total += delta;
        let total = *total;
        self.step_counter += 1;
        self.steps.insert(user, self.step_counter);
        self.flush();
        total
    }

    /// A player's lifetime total, if any
    pub fn total(&self, user: UserId) -> Option<i64> {
        self.totals.get(&user).copied()
    }

    /// Whether the ledger holds no entries
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// The top `limit` players, best first
    pub fn rankings(&self, limit: usize) -> Vec<RankEntry> {
        sorted_standings(&self.totals, &self.steps)
            .into_iter()
            .take(limit)
            .collect()
    }

    fn flush(&self) {
        if let Err(err) = self.store.persist(&self.totals) {
            tracing::warn!(%err, "persisting ledger failed, totals kept in memory");
        }
    }
}
