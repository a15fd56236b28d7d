//! Candidate pool building and balancing
//!
//! A session's question set is assembled from multiple unreliable sources
//! under two constraints: a fixed minority/majority ratio between the
//! sources, and a soft ceiling on any single topic family. Sources are
//! over-fetched to create slack, then candidates are selected in three
//! phases of decreasing strictness:
//!
//! 1. ratio-respecting and cap-respecting round-robin,
//! 2. cap-respecting fill from whatever remains (ratio relaxed),
//! 3. unrestricted fill (cap relaxed) so a skewed source mix can still
//!    produce a runnable session.
//!
//! A shorter-than-requested result is a valid degraded success; only an
//! empty result is a setup failure, and that decision belongs to the
//! caller.

use std::{collections::HashMap, sync::Arc};

use serde::Serialize;

use crate::{
    constants::pool::{
        DISTRACTOR_COUNT, MAX_OPTION_CHARS, MAX_PROMPT_CHARS, MINORITY_SHARE, OVERFETCH_FACTOR,
        OVERFETCH_FLOOR,
    },
    providers::{QuestionSource, Renderer, SourceId, Translator},
    transport::MediaRef,
};

/// A raw question as returned by a source, before any preparation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// Source this candidate came from
    pub source: SourceId,
    /// Question text in the source language
    pub prompt: String,
    /// The correct answer text
    pub correct: String,
    /// Wrong answer texts; exactly [`DISTRACTOR_COUNT`] are expected
    pub distractors: Vec<String>,
    /// Topic-cluster tag used only for diversity capping
    pub family: String,
}

/// The answer payload of a prepared question
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum QuestionPayload {
    /// Button-answer question: shuffled options and the correct index
    Choice {
        /// Presented options in display order
        options: Vec<String>,
        /// Index of the correct option within `options`
        correct_index: usize,
    },
    /// Free-text question: the expected answer and an optional alternate
    Open {
        /// Localized expected answer
        answer: String,
        /// Original-language alternate, accepted as well
        alternate: Option<String>,
    },
}

/// A fully prepared, presentation-ready question
///
/// Immutable once built; owned exclusively by the session that built it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedQuestion {
    /// Localized question text
    pub prompt: String,
    /// Mode-specific answer payload
    pub payload: QuestionPayload,
    /// Optional rendered or remote media
    pub media: Option<MediaRef>,
    /// Source the underlying candidate came from
    pub source: SourceId,
    /// Topic family of the underlying candidate
    pub family: String,
}

impl PreparedQuestion {
    /// The correct answer as display text
    pub fn correct_text(&self) -> &str {
        match &self.payload {
            QuestionPayload::Choice {
                options,
                correct_index,
            } => options.get(*correct_index).map_or("", String::as_str),
            QuestionPayload::Open { answer, .. } => answer,
        }
    }
}

/// Diagnostics from one pool build
///
/// `cap_relaxed` counts phase-3 picks, making cap violations observable
/// instead of silent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolReport {
    /// Number of questions the caller asked for
    pub requested: usize,
    /// Candidates surviving the balancing phases
    pub balanced: usize,
    /// Questions surviving preparation (translation, length re-check)
    pub prepared: usize,
    /// Per-family counts of the prepared set
    pub families: HashMap<String, usize>,
    /// Per-source counts of the prepared set
    pub sources: HashMap<SourceId, usize>,
    /// Candidates admitted in phase 2 (source ratio relaxed)
    pub ratio_relaxed: usize,
    /// Candidates admitted in phase 3 (family cap relaxed)
    pub cap_relaxed: usize,
}

/// Soft per-family ceiling for a set of `total` questions
fn family_cap(total: usize) -> usize {
    (total as f64 * crate::constants::pool::FAMILY_CAP_RATIO).max(1.0) as usize
}

/// Target counts as `(majority, minority)` for a requested total
///
/// Rounding remainders are credited to the majority source so the targets
/// always sum to `total`. The majority source never drops below one
/// question as long as anything was requested.
fn split_targets(total: usize) -> (usize, usize) {
    let mut minority = ((total as f64 * MINORITY_SHARE).round() as usize).max(1);
    let mut majority = total.saturating_sub(minority);
    if majority < 1 {
        majority = 1.min(total);
        minority = total.saturating_sub(majority);
    }
    (majority, minority)
}

/// How many candidates to request from a source with target `n`
fn overfetch(n: usize) -> usize {
    (n * OVERFETCH_FACTOR).max(n + OVERFETCH_FLOOR)
}

/// Raw-text admission filter applied before balancing
///
/// Limits are twice the final budgets: translation may shrink or grow the
/// text, and the final check happens after translation.
fn acceptable(candidate: &RawCandidate) -> bool {
    if candidate.prompt.is_empty() || candidate.prompt.chars().count() > MAX_PROMPT_CHARS * 2 {
        return false;
    }
    if candidate.distractors.len() != DISTRACTOR_COUNT {
        return false;
    }
    std::iter::once(&candidate.correct)
        .chain(candidate.distractors.iter())
        .all(|option| !option.is_empty() && option.chars().count() <= MAX_OPTION_CHARS * 2)
}

/// Result of the three balancing phases
#[derive(Debug, Default)]
struct Balanced {
    selected: Vec<RawCandidate>,
    ratio_relaxed: usize,
    cap_relaxed: usize,
}

/// Runs the three selection phases over per-source candidate pools
///
/// `pools` and `targets` are index-aligned and ordered by priority
/// (majority source first). Candidates within each pool are taken in the
/// order given; callers shuffle beforehand.
fn balance(pools: &[Vec<RawCandidate>], targets: &[usize], total: usize) -> Balanced {
    let mut out = Balanced::default();
    if total == 0 || pools.iter().all(Vec::is_empty) {
        return out;
    }

    let cap = family_cap(total);
    let mut family_counts: HashMap<&str, usize> = HashMap::new();
    let mut used: Vec<Vec<bool>> = pools.iter().map(|p| vec![false; p.len()]).collect();
    let mut remaining = targets.to_vec();
    let mut cursors = vec![0usize; pools.len()];

    let capped = |counts: &HashMap<&str, usize>, family: &str| {
        counts.get(family).copied().unwrap_or(0) >= cap
    };

    // Phase 1: respect both the per-source targets and the family cap.
    'outer: loop {
        let mut progress = false;
        for (s, pool) in pools.iter().enumerate() {
            if remaining[s] == 0 {
                continue;
            }
            let cursor = &mut cursors[s];
            while *cursor < pool.len()
                && (used[s][*cursor] || capped(&family_counts, &pool[*cursor].family))
            {
                *cursor += 1;
            }
            if *cursor >= pool.len() {
                continue;
            }
            let candidate = &pool[*cursor];
            used[s][*cursor] = true;
            *family_counts.entry(candidate.family.as_str()).or_default() += 1;
            out.selected.push(candidate.clone());
            remaining[s] -= 1;
            progress = true;
            if out.selected.len() >= total {
                break 'outer;
            }
        }
        if !progress {
            break;
        }
    }

    // Phase 2: targets exhausted or unattainable; keep the cap, drop the
    // ratio, and fill from whatever any source still has.
    if out.selected.len() < total {
        let mut leftovers: Vec<(usize, usize)> = (0..pools.len())
            .flat_map(|s| (0..pools[s].len()).map(move |i| (s, i)))
            .filter(|&(s, i)| !used[s][i])
            .collect();
        fastrand::shuffle(&mut leftovers);

        for (s, i) in leftovers {
            if out.selected.len() >= total {
                break;
            }
            let candidate = &pools[s][i];
            if capped(&family_counts, &candidate.family) {
                continue;
            }
            used[s][i] = true;
            *family_counts.entry(candidate.family.as_str()).or_default() += 1;
            out.selected.push(candidate.clone());
            out.ratio_relaxed += 1;
        }
    }

    // Phase 3: last resort; take anything left so the session can run even
    // when the sources are heavily family-skewed.
    if out.selected.len() < total {
        let mut leftovers: Vec<(usize, usize)> = (0..pools.len())
            .flat_map(|s| (0..pools[s].len()).map(move |i| (s, i)))
            .filter(|&(s, i)| !used[s][i])
            .collect();
        fastrand::shuffle(&mut leftovers);

        for (s, i) in leftovers {
            if out.selected.len() >= total {
                break;
            }
            used[s][i] = true;
            out.selected.push(pools[s][i].clone());
            out.cap_relaxed += 1;
        }
    }

    out.selected.truncate(total);
    out
}

/// Builds balanced, presentation-ready question sets from two sources
pub struct PoolBuilder {
    majority: Arc<dyn QuestionSource>,
    minority: Arc<dyn QuestionSource>,
    translator: Arc<dyn Translator>,
    renderer: Arc<dyn Renderer>,
}

impl PoolBuilder {
    /// Creates a builder over a majority and a minority source
    pub fn new(
        majority: Arc<dyn QuestionSource>,
        minority: Arc<dyn QuestionSource>,
        translator: Arc<dyn Translator>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            majority,
            minority,
            translator,
            renderer,
        }
    }

    /// Builds up to `total` prepared questions
    ///
    /// Returns fewer than `total` only when fewer usable candidates exist
    /// end-to-end; callers must rebind their question count to the actual
    /// length and treat only an empty result as a failure.
    pub async fn build(&self, total: usize) -> (Vec<PreparedQuestion>, PoolReport) {
        self.build_with_progress(total, |_, _| {}).await
    }

    /// Builds up to `total` prepared questions, reporting progress
    ///
    /// `progress` is invoked with `(done, requested)` after each question
    /// finishes preparation.
    pub async fn build_with_progress(
        &self,
        total: usize,
        mut progress: impl FnMut(usize, usize) + Send,
    ) -> (Vec<PreparedQuestion>, PoolReport) {
        let mut report = PoolReport {
            requested: total,
            ..PoolReport::default()
        };
        if total == 0 {
            return (Vec::new(), report);
        }

        let (majority_target, minority_target) = split_targets(total);
        let (majority_raw, minority_raw) = tokio::join!(
            self.majority.fetch(overfetch(majority_target)),
            self.minority.fetch(overfetch(minority_target)),
        );
        tracing::debug!(
            majority = majority_raw.len(),
            minority = minority_raw.len(),
            "raw candidates fetched"
        );

        let mut pools: Vec<Vec<RawCandidate>> = [majority_raw, minority_raw]
            .into_iter()
            .map(|raw| raw.into_iter().filter(acceptable).collect())
            .collect();
        for pool in &mut pools {
            fastrand::shuffle(pool);
        }

        let balanced = balance(&pools, &[majority_target, minority_target], total);
        report.balanced = balanced.selected.len();
        report.ratio_relaxed = balanced.ratio_relaxed;
        report.cap_relaxed = balanced.cap_relaxed;
        if balanced.cap_relaxed > 0 {
            tracing::info!(
                count = balanced.cap_relaxed,
                "family cap relaxed to fill the question set"
            );
        }

        let mut prepared = Vec::new();
        for raw in balanced.selected {
            if prepared.len() >= total {
                break;
            }
            if let Some(question) = self.prepare(raw).await {
                *report.families.entry(question.family.clone()).or_default() += 1;
                *report.sources.entry(question.source.clone()).or_default() += 1;
                prepared.push(question);
                progress(prepared.len(), total);
            }
        }

        report.prepared = prepared.len();
        (prepared, report)
    }

    /// Translates, shuffles, and renders a single candidate
    ///
    /// Returns `None` when a translated option exceeds the display budget;
    /// the caller simply moves on to the next candidate.
    async fn prepare(&self, raw: RawCandidate) -> Option<PreparedQuestion> {
        let prompt = self.translator.translate(&raw.prompt).await;

        let mut options: Vec<String> = raw.distractors.clone();
        options.push(raw.correct.clone());
        fastrand::shuffle(&mut options);
        let correct_index = options.iter().position(|o| *o == raw.correct)?;

        let mut translated = Vec::with_capacity(options.len());
        for option in &options {
            let text = self.translator.translate(option).await;
            if text.chars().count() > MAX_OPTION_CHARS {
                return None;
            }
            translated.push(text);
        }

        let media = self.renderer.render(&prompt, &translated).await;

        Some(PreparedQuestion {
            prompt,
            payload: QuestionPayload::Choice {
                options: translated,
                correct_index,
            },
            media,
            source: raw.source,
            family: raw.family,
        })
    }
}
