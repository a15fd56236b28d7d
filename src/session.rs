//! Game session state machine
//!
//! One session runs one match in one channel: a fixed, preloaded question
//! sequence presented round by round. Every round opens an answer window
//! bounded by a countdown and closes on the first valid correct answer or
//! on timeout, whichever claims the round first.
//!
//! The race is decided by a single critical section ([`Session::claim`]):
//! the round counter is a fence token, and the first claimant that finds
//! the token current and the round unresolved flips `resolved` and owns
//! the transition. Everything else — stale timers, slow answers, double
//! clicks — observes the guard and silently no-ops. Spawned tasks are
//! never cancelled explicitly; they die on their next guard check.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_with::{DurationSeconds, serde_as};
use tokio::sync::broadcast;

use crate::{
    answer::AnswerKey,
    constants::{round, session as session_limits},
    ledger::{RankEntry, ScoreLedger, sorted_standings},
    pool::{PoolReport, PreparedQuestion, QuestionPayload},
    registry::SessionRegistry,
    timer::{CountdownEnd, run_countdown},
    transport::{
        ButtonRow, ButtonStyle, ChannelId, ChatTransport, MessageId, OutgoingMessage, Tone, UserId,
    },
};

/// Shared handle to the lifetime ledger
pub type SharedLedger = Arc<Mutex<ScoreLedger>>;

/// The two kinds of sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// Button-answer questions with a fixed option set
    Choice,
    /// Free-text questions matched against a stored answer
    Open,
}

/// How choice-round buttons are labeled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonLabels {
    /// Numbered buttons (`1`..`4`); options appear in the question body
    Indexed,
    /// The option text itself on each button (picture rounds)
    AnswerText,
}

/// Per-session timing and presentation tuning
#[serde_as]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionTuning {
    /// Length of each round's answer window
    #[serde_as(as = "DurationSeconds<u64>")]
    pub answer_window: Duration,
    /// How long past the window the open-mode listener lingers
    #[serde_as(as = "DurationSeconds<u64>")]
    pub listener_grace: Duration,
    /// Button labeling for choice rounds
    pub button_labels: ButtonLabels,
}

impl SessionTuning {
    /// The default tuning for a mode
    pub fn for_mode(mode: GameMode) -> Self {
        match mode {
            GameMode::Choice => Self {
                answer_window: Duration::from_secs(round::CHOICE_WINDOW_SECS),
                listener_grace: Duration::ZERO,
                button_labels: ButtonLabels::Indexed,
            },
            GameMode::Open => Self {
                answer_window: Duration::from_secs(round::OPEN_WINDOW_SECS),
                listener_grace: Duration::from_secs(round::OPEN_LISTENER_GRACE_SECS),
                button_labels: ButtonLabels::Indexed,
            },
        }
    }
}

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// Just constructed, nothing loaded
    Created,
    /// Question preparation in progress
    Preloading,
    /// Questions installed, waiting for the start command
    Ready,
    /// Round loop running
    Running,
    /// Terminal; set by normal completion or a force stop
    Finished,
}

/// Reply to a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartReply {
    /// The round loop began with this many questions
    Started(usize),
    /// The session was already started; reported, no state change
    AlreadyStarted,
    /// No question set is ready in this session
    NotReady,
}

/// Reply to a button press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoiceReply {
    /// The press won the round
    Correct,
    /// The press registered but the option was wrong
    Incorrect,
    /// The user already used their attempt for this round
    Duplicate,
    /// The round was already resolved; discarded without state effect
    Closed,
    /// The press carried a stale fence token; discarded
    Stale,
}

/// Per-round mutable state
struct CurrentRound {
    correct_index: Option<usize>,
    answer_key: Option<AnswerKey>,
    correct_text: String,
    presented: Option<(MessageId, OutgoingMessage)>,
}

/// All mutable session state, behind one mutex
struct SessionCore {
    phase: SessionPhase,
    questions: Vec<PreparedQuestion>,
    report: Option<PoolReport>,
    cursor: usize,
    round: u64,
    resolved: bool,
    answered: HashSet<UserId>,
    scores: HashMap<UserId, i64>,
    steps: HashMap<UserId, u64>,
    step_counter: u64,
    current: Option<CurrentRound>,
}

/// What the winner of a resolution race must do next
struct Resolution {
    winner: Option<UserId>,
    correct_text: String,
    standings: Vec<RankEntry>,
    disable: Option<(MessageId, OutgoingMessage)>,
}

/// One game session bound to one channel and one mode
pub struct Session {
    channel: ChannelId,
    mode: GameMode,
    tuning: SessionTuning,
    core: Mutex<SessionCore>,
    transport: Arc<dyn ChatTransport>,
    ledger: SharedLedger,
    registry: Arc<SessionRegistry>,
    text_events: broadcast::Sender<(UserId, String)>,
}

impl Session {
    /// Creates a session in the `Created` phase
    pub fn new(
        channel: ChannelId,
        mode: GameMode,
        tuning: SessionTuning,
        transport: Arc<dyn ChatTransport>,
        ledger: SharedLedger,
        registry: Arc<SessionRegistry>,
    ) -> Arc<Self> {
        let (text_events, _) = broadcast::channel(64);
        Arc::new(Self {
            channel,
            mode,
            tuning,
            core: Mutex::new(SessionCore {
                phase: SessionPhase::Created,
                questions: Vec::new(),
                report: None,
                cursor: 0,
                round: 0,
                resolved: false,
                answered: HashSet::new(),
                scores: HashMap::new(),
                steps: HashMap::new(),
                step_counter: 0,
                current: None,
            }),
            transport,
            ledger,
            registry,
            text_events,
        })
    }

    /// The channel this session is bound to
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// The session's mode
    pub fn mode(&self) -> GameMode {
        self.mode
    }

    /// The session's current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    /// Snapshot of this session's scores
    pub fn session_scores(&self) -> HashMap<UserId, i64> {
        self.lock().scores.clone()
    }

    /// Diagnostics from the pool build that fed this session, if any
    pub fn pool_report(&self) -> Option<PoolReport> {
        self.lock().report.clone()
    }

    /// Marks the session as preloading; false if it already moved on
    pub fn begin_preload(&self) -> bool {
        let mut core = self.lock();
        if core.phase == SessionPhase::Created {
            core.phase = SessionPhase::Preloading;
            true
        } else {
            false
        }
    }

    /// Installs the prepared question sequence and becomes `Ready`
    ///
    /// The sequence length is final: the session's question count is
    /// whatever survived preparation. Installing an empty sequence
    /// finishes the session immediately and returns zero; the caller
    /// reports the setup failure.
    pub fn install_questions(
        &self,
        questions: Vec<PreparedQuestion>,
        report: Option<PoolReport>,
    ) -> usize {
        let mut core = self.lock();
        if core.phase == SessionPhase::Finished {
            return 0;
        }
        let count = questions.len();
        core.report = report;
        if count == 0 {
            core.phase = SessionPhase::Finished;
            return 0;
        }
        core.questions = questions;
        core.phase = SessionPhase::Ready;
        count
    }

    /// Starts the round loop
    ///
    /// Exactly one start succeeds; repeats are reported as no-ops.
    pub async fn start(self: &Arc<Self>) -> StartReply {
        let count = {
            let mut core = self.lock();
            match core.phase {
                SessionPhase::Ready => {
                    core.phase = SessionPhase::Running;
                    core.questions.len()
                }
                SessionPhase::Running => return StartReply::AlreadyStarted,
                _ => return StartReply::NotReady,
            }
        };

        tracing::info!(channel = %self.channel, mode = ?self.mode, count, "session started");
        self.send(OutgoingMessage::text("Match started 📢", Tone::Notice))
            .await;
        self.next_round().await;
        StartReply::Started(count)
    }

    /// Handles a button press carrying the round's fence token
    pub async fn submit_choice(
        self: &Arc<Self>,
        user: UserId,
        choice: usize,
        token: u64,
    ) -> ChoiceReply {
        enum Verdict {
            Reply(ChoiceReply),
            Won(Resolution),
        }

        let verdict = {
            let mut core = self.lock();
            if core.phase != SessionPhase::Running || token != core.round {
                Verdict::Reply(ChoiceReply::Stale)
            } else if core.answered.contains(&user) {
                Verdict::Reply(ChoiceReply::Duplicate)
            } else if core.resolved {
                Verdict::Reply(ChoiceReply::Closed)
            } else {
                core.answered.insert(user);
                let correct = core
                    .current
                    .as_ref()
                    .and_then(|round| round.correct_index)
                    .is_some_and(|index| index == choice);
                if correct {
                    Verdict::Won(resolve_in_place(&mut core, Some(user)))
                } else {
                    Verdict::Reply(ChoiceReply::Incorrect)
                }
            }
        };

        match verdict {
            Verdict::Reply(reply) => {
                if reply == ChoiceReply::Stale {
                    tracing::debug!(channel = %self.channel, token, "stale button press discarded");
                }
                reply
            }
            Verdict::Won(resolution) => {
                self.conclude(resolution).await;
                ChoiceReply::Correct
            }
        }
    }

    /// Feeds a free-text chat message to the open-mode answer listener
    ///
    /// Cheap and synchronous; does nothing when no listener is waiting.
    pub fn submit_text(&self, user: UserId, text: impl Into<String>) {
        let _ = self.text_events.send((user, text.into()));
    }

    /// Applies an elevated mid-round score amendment to this session
    ///
    /// Session-local and possibly negative; the ledger credit at the end
    /// filters non-positive totals. Allowed only while a round is live.
    pub async fn amend_score(self: &Arc<Self>, target: UserId, delta: i64) -> bool {
        let applied = {
            let mut core = self.lock();
            if core.phase != SessionPhase::Running || core.resolved {
                false
            } else {
                *core.scores.entry(target).or_default() += delta;
                core.step_counter += 1;
                let step = core.step_counter;
                core.steps.insert(target, step);
                true
            }
        };
        if !applied {
            return false;
        }

        if delta >= 0 {
            self.send(OutgoingMessage::text(
                format!(
                    "✅ By referee decision, {} gained {delta} point(s) in this match.",
                    mention(target)
                ),
                Tone::Success,
            ))
            .await;
        } else {
            self.send(OutgoingMessage::text(
                format!(
                    "⚠️ By referee decision, {} lost {} point(s) in this match.",
                    mention(target),
                    -delta
                ),
                Tone::Penalty,
            ))
            .await;
            let standings = {
                let core = self.lock();
                sorted_standings(&core.scores, &core.steps)
            };
            self.send(standings_message("📊 Standings so far:", &standings, Tone::Standings))
                .await;
        }
        true
    }

    /// Forces the session into its terminal phase from any state
    ///
    /// No announcements, no ledger credit; outstanding timers and
    /// listeners terminate on their next guard check.
    pub fn force_finish(&self) {
        let mut core = self.lock();
        if core.phase != SessionPhase::Finished {
            tracing::info!(channel = %self.channel, "session force-stopped");
            core.phase = SessionPhase::Finished;
        }
    }

    // ---- round loop ----------------------------------------------------

    /// Advances to the next round, or finishes the session
    ///
    /// Returns a boxed future so the recursive round loop
    /// (`next_round` → `present_round` → spawned timer → `next_round`) has a
    /// concrete, explicitly-`Send` type, which the spawned timer task
    /// requires.
    fn next_round<'a>(
        self: &'a Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let entry = {
            let mut core = self.lock();
            if core.phase != SessionPhase::Running {
                return;
            }
            if core.cursor >= core.questions.len() {
                None
            } else {
                core.round += 1;
                core.resolved = false;
                core.answered.clear();
                let question = core.questions[core.cursor].clone();
                core.cursor += 1;
                let number = core.cursor;
                let total = core.questions.len();
                core.current = Some(CurrentRound {
                    correct_index: match &question.payload {
                        QuestionPayload::Choice { correct_index, .. } => Some(*correct_index),
                        QuestionPayload::Open { .. } => None,
                    },
                    answer_key: match &question.payload {
                        QuestionPayload::Open { answer, alternate } => {
                            Some(AnswerKey::new(answer, alternate.as_deref()))
                        }
                        QuestionPayload::Choice { .. } => None,
                    },
                    correct_text: question.correct_text().to_owned(),
                    presented: None,
                });
                Some((question, core.round, number, total))
            }
        };

        match entry {
            None => self.finish().await,
            Some((question, token, number, total)) => {
                self.present_round(&question, token, number, total).await;
            }
        }
        })
    }

    /// Presents one round and spawns its timer (and listener, open mode)
    async fn present_round(
        self: &Arc<Self>,
        question: &PreparedQuestion,
        token: u64,
        number: usize,
        total: usize,
    ) {
        // Subscribe before the question is visible so an instant answer
        // cannot slip past the listener.
        let receiver = match self.mode {
            GameMode::Open => Some(self.text_events.subscribe()),
            GameMode::Choice => None,
        };

        let message = self.question_message(question, token, number, total);
        let presented = self.send(message.clone()).await;
        {
            let mut core = self.lock();
            if let Some(round) = core.current.as_mut() {
                round.presented = presented.map(|id| (id, message));
            }
        }

        let window = self.tuning.answer_window.as_secs();
        let timer_message = self
            .send(countdown_message(window))
            .await;

        let session = self.clone();
        tokio::spawn(async move {
            let transport = session.transport.clone();
            let channel = session.channel;
            let end = run_countdown(
                window,
                || session.round_superseded(token),
                |left| {
                    let transport = transport.clone();
                    async move {
                        if let Some(id) = timer_message {
                            // Countdown edits are cosmetic; failures never
                            // abort the timer.
                            let _ = transport.edit(channel, id, countdown_message(left)).await;
                        }
                    }
                },
            )
            .await;
            if end == CountdownEnd::Elapsed {
                session.handle_timeout(token).await;
            }
        });

        if let Some(receiver) = receiver {
            let session = self.clone();
            let key = {
                let core = self.lock();
                core.current.as_ref().and_then(|r| r.answer_key.clone())
            };
            let deadline = self.tuning.answer_window + self.tuning.listener_grace;
            if let Some(key) = key {
                tokio::spawn(async move {
                    session.collect_answers(receiver, key, token, deadline).await;
                });
            }
        }
    }

    /// Open-mode listener: waits for the first matching message
    ///
    /// Wrong or unrelated messages cause no reaction. If nothing matches
    /// before the safety deadline the listener just exits; announcing the
    /// timeout is the timer's job.
    async fn collect_answers(
        self: Arc<Self>,
        mut receiver: broadcast::Receiver<(UserId, String)>,
        key: AnswerKey,
        token: u64,
        deadline: Duration,
    ) {
        let until = tokio::time::Instant::now() + deadline;
        loop {
            let Ok(event) = tokio::time::timeout_at(until, receiver.recv()).await else {
                return;
            };
            match event {
                Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Ok((user, text)) => {
                    if self.round_superseded(token) {
                        return;
                    }
                    if !key.matches(&text) {
                        continue;
                    }
                    if let Some(resolution) = self.claim(token, Some(user)) {
                        self.conclude(resolution).await;
                    }
                    return;
                }
            }
        }
    }

    /// Timeout signal from the round timer
    async fn handle_timeout(self: &Arc<Self>, token: u64) {
        if let Some(resolution) = self.claim(token, None) {
            self.conclude(resolution).await;
        }
    }

    /// The single check-and-set deciding a round's resolution race
    ///
    /// Returns `Some` only for the one claimant that finds the fence
    /// token current and the round unresolved; that claimant owns the
    /// whole transition. Everyone else gets `None` and must do nothing.
    fn claim(&self, token: u64, winner: Option<UserId>) -> Option<Resolution> {
        let mut core = self.lock();
        if core.phase != SessionPhase::Running || core.resolved || core.round != token {
            return None;
        }
        Some(resolve_in_place(&mut core, winner))
    }

    /// Announces a resolution and advances the loop; winner-only path
    async fn conclude(self: &Arc<Self>, resolution: Resolution) {
        if let Some((id, disabled)) = resolution.disable {
            let _ = self.transport.edit(self.channel, id, disabled).await;
        }

        let outcome = match resolution.winner {
            Some(user) => OutgoingMessage::text(
                format!(
                    "✅ Correct: {}\n{} +1 point",
                    resolution.correct_text,
                    mention(user)
                ),
                Tone::Success,
            ),
            None => OutgoingMessage::text(
                format!(
                    "⏱️ Time's up!\n\nThe correct answer was:\n**{}**",
                    resolution.correct_text
                ),
                Tone::Timeout,
            ),
        };
        self.send(outcome).await;
        self.send(standings_message(
            "📊 Standings so far:",
            &resolution.standings,
            Tone::Standings,
        ))
        .await;

        self.next_round().await;
    }

    /// Publishes final standings, credits the ledger, and unregisters
    async fn finish(self: &Arc<Self>) {
        let (scores, standings) = {
            let mut core = self.lock();
            if core.phase == SessionPhase::Finished {
                return;
            }
            core.phase = SessionPhase::Finished;
            (
                core.scores.clone(),
                sorted_standings(&core.scores, &core.steps),
            )
        };

        tracing::info!(channel = %self.channel, players = scores.len(), "session finished");
        self.send(OutgoingMessage::text("# Match over ⏰", Tone::Final))
            .await;
        self.send(standings_message("🏆 Final results:", &standings, Tone::Final))
            .await;

        if let Ok(mut ledger) = self.ledger.lock() {
            ledger.credit_session(&scores);
        }
        self.registry.unregister_exact(self);
    }

    // ---- helpers -------------------------------------------------------

    /// True once the given round can no longer be acted on
    fn round_superseded(&self, token: u64) -> bool {
        let core = self.lock();
        core.phase != SessionPhase::Running || core.resolved || core.round != token
    }

    /// Builds the presentation message for a question
    fn question_message(
        &self,
        question: &PreparedQuestion,
        token: u64,
        number: usize,
        total: usize,
    ) -> OutgoingMessage {
        let header = format!("Question {number} of {total}:");
        match &question.payload {
            QuestionPayload::Choice { options, .. } => {
                let buttons = ButtonRow {
                    token,
                    labels: match self.tuning.button_labels {
                        ButtonLabels::Indexed => {
                            (1..=options.len()).map(|i| i.to_string()).collect()
                        }
                        ButtonLabels::AnswerText => options.clone(),
                    },
                    style: match self.tuning.button_labels {
                        ButtonLabels::Indexed => ButtonStyle::Primary,
                        ButtonLabels::AnswerText => ButtonStyle::Success,
                    },
                    enabled: true,
                };
                let message = if let Some(media) = &question.media {
                    // The rendered card already shows prompt and options.
                    OutgoingMessage::text(header, Tone::Question).with_media(media.clone())
                } else {
                    let mut lines = vec![header, String::new(), question.prompt.clone(), String::new()];
                    for (i, option) in options.iter().enumerate() {
                        lines.push(format!("{}. {option}", i + 1));
                    }
                    OutgoingMessage::text(lines.join("\n"), Tone::Question)
                };
                message.with_buttons(buttons)
            }
            QuestionPayload::Open { .. } => {
                let message = OutgoingMessage::text(
                    format!("{header}\n\n{}", question.prompt),
                    Tone::Question,
                );
                match &question.media {
                    Some(media) => message.with_media(media.clone()),
                    None => message,
                }
            }
        }
    }

    /// Sends to this session's channel, logging but surviving failures
    async fn send(&self, message: OutgoingMessage) -> Option<MessageId> {
        match self.transport.send(self.channel, message).await {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(channel = %self.channel, %err, "message delivery failed");
                None
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Performs the resolution bookkeeping inside an already-held lock
fn resolve_in_place(core: &mut SessionCore, winner: Option<UserId>) -> Resolution {
    core.resolved = true;
    if let Some(user) = winner {
        *core.scores.entry(user).or_default() += session_limits::POINTS_PER_ROUND;
        core.step_counter += 1;
        let step = core.step_counter;
        core.steps.entry(user).or_insert(step);
    }

    let current = core.current.as_ref();
    Resolution {
        winner,
        correct_text: current.map(|r| r.correct_text.clone()).unwrap_or_default(),
        standings: sorted_standings(&core.scores, &core.steps),
        disable: current.and_then(|r| r.presented.clone()).map(|(id, mut message)| {
            if let Some(buttons) = message.buttons.as_mut() {
                buttons.enabled = false;
            }
            (id, message)
        }),
    }
}

/// Countdown display message
fn countdown_message(seconds_left: u64) -> OutgoingMessage {
    OutgoingMessage::text(format!("⏱ {seconds_left} s"), Tone::Question)
}

/// Platform mention for a user
pub(crate) fn mention(user: UserId) -> String {
    format!("<@{user}>")
}

/// Formats a ranking into a standings message
pub(crate) fn standings_message(prefix: &str, standings: &[RankEntry], tone: Tone) -> OutgoingMessage {
    if standings.is_empty() {
        return OutgoingMessage::text(format!("{prefix}\n\nNo points scored yet."), tone);
    }
    let mut lines = vec![prefix.to_owned()];
    for (position, entry) in standings.iter().enumerate() {
        let badge = match position {
            0 => "🥇".to_owned(),
            1 => "🥈".to_owned(),
            2 => "🥉".to_owned(),
            n => format!("{} -", n + 1),
        };
        lines.push(format!("{badge} {}\nscore: {}", mention(entry.user), entry.score));
    }
    OutgoingMessage::text(lines.join("\n\n"), tone)
}
