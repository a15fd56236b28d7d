//! Configuration constants for the quizmaster engine
//!
//! This module contains the limits, timing defaults, and balancing
//! parameters used throughout the engine to keep sessions within
//! consistent boundaries.

/// Session-wide configuration constants
pub mod session {
    /// Default number of questions when a setup request does not specify one
    pub const DEFAULT_QUESTION_COUNT: usize = 30;
    /// Maximum number of questions allowed in a single session
    pub const MAX_QUESTION_COUNT: usize = 200;
    /// Points awarded to the first correct answer of a round
    pub const POINTS_PER_ROUND: i64 = 1;
}

/// Answer-window timing constants per session mode
pub mod round {
    /// Answer window in seconds for choice (button) rounds
    pub const CHOICE_WINDOW_SECS: u64 = 10;
    /// Answer window in seconds for open (free text) rounds
    pub const OPEN_WINDOW_SECS: u64 = 15;
    /// Extra seconds the open-mode listener waits past the window before
    /// giving up on its own; the timer owns the actual timeout transition
    pub const OPEN_LISTENER_GRACE_SECS: u64 = 7;
}

/// Candidate pool balancing constants
pub mod pool {
    /// Maximum length of a question prompt in characters
    pub const MAX_PROMPT_CHARS: usize = 80;
    /// Maximum length of a single answer option in characters
    pub const MAX_OPTION_CHARS: usize = 45;
    /// Number of wrong options accompanying the correct one
    pub const DISTRACTOR_COUNT: usize = 3;
    /// Share of the question set requested from the minority source
    pub const MINORITY_SHARE: f64 = 0.4;
    /// Ceiling on any single topic family as a fraction of the set
    pub const FAMILY_CAP_RATIO: f64 = 0.2;
    /// Multiplier applied to a source's target when over-fetching
    pub const OVERFETCH_FACTOR: usize = 3;
    /// Additive floor applied to a source's target when over-fetching
    pub const OVERFETCH_FLOOR: usize = 5;
}

/// Lifetime ledger constants
pub mod ledger {
    /// Default number of entries shown in a top ranking
    pub const DEFAULT_TOP_LIMIT: usize = 10;
}
