//! Administrative surface and command dispatch
//!
//! The [`Coordinator`] owns the long-lived pieces (registry, ledger,
//! external providers, transport) and exposes the command set a chat
//! front-end needs: prepare a match, start it, show the lifetime ranking,
//! reset everything, and adjust a player's lifetime score. Open-answer
//! setup, lifetime adjustments, pool diagnostics, and mid-round amendments
//! are restricted to elevated issuers; everything else is open to any
//! participant.

use std::sync::{Arc, Mutex};

use garde::Validate;
use itertools::Itertools;

use crate::{
    bank::QuestionBank,
    constants::{ledger as ledger_limits, pool as pool_limits, session as session_limits},
    ledger::{LedgerStore, ScoreLedger},
    pool::{PoolBuilder, PoolReport, PreparedQuestion, QuestionPayload},
    providers::{QuestionSource, Renderer, SourceId, Translator},
    registry::SessionRegistry,
    session::{
        ChoiceReply, GameMode, Session, SessionTuning, SharedLedger, StartReply, mention,
        standings_message,
    },
    transport::{ChannelId, ChatEvent, ChatTransport, OutgoingMessage, Tone, UserId},
};

/// Permission level of a command issuer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Any participant
    Member,
    /// Elevated participant (moderator/administrator)
    Admin,
}

/// A command issued in a channel
#[derive(Debug, Clone)]
pub enum Command {
    /// Prepare a match of `count` questions in the given mode
    Setup {
        /// Which session kind to prepare
        mode: GameMode,
        /// Requested question count; `None` uses the default
        count: Option<usize>,
    },
    /// Start the prepared match in this channel
    Start,
    /// Show the lifetime ranking
    Top {
        /// Maximum entries to show; `None` uses the default
        limit: Option<usize>,
    },
    /// Force-stop and clear every session in every channel
    ResetAll,
    /// Apply a signed delta to a player's lifetime score
    Adjust {
        /// Player whose lifetime score changes
        user: UserId,
        /// Signed score change
        delta: i64,
    },
    /// Show source/family distribution diagnostics of the current match
    PoolStats,
}

/// Successful command result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A match was prepared with this many questions
    SetupReady {
        /// Final question count after preparation shrinkage
        count: usize,
    },
    /// The round loop began
    Started {
        /// Number of rounds that will run
        rounds: usize,
    },
    /// The match was already started; reported as a no-op
    AlreadyStarted,
    /// The lifetime ranking was published to the channel
    TopShown,
    /// Every session was force-stopped
    ResetDone {
        /// Number of sessions that were cleared
        cleared: usize,
    },
    /// A lifetime score was adjusted
    Adjusted {
        /// The player's new lifetime total
        new_total: i64,
    },
    /// Pool diagnostics were published to the channel
    PoolStatsShown,
}

/// Command failure surfaced to the issuer
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A session already holds this channel
    #[error("a match is already running or being prepared in this channel")]
    DuplicateSetup,
    /// Zero usable questions could be prepared
    #[error("no usable questions could be prepared, try again later")]
    SetupFailed,
    /// No prepared session exists for the channel
    #[error("no match has been prepared in this channel")]
    NothingPrepared,
    /// No active session exists for the channel
    #[error("no match is active in this channel")]
    NoActiveSession,
    /// The request failed validation
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The issuer lacks the required permission
    #[error("this command requires elevated permission")]
    PermissionDenied,
}

/// Validated setup parameters
#[derive(Debug, Clone, Copy, Validate)]
pub struct SetupRequest {
    /// Requested question count
    #[garde(range(min = 1, max = session_limits::MAX_QUESTION_COUNT))]
    pub count: usize,
    /// Session kind
    #[garde(skip)]
    pub mode: GameMode,
}

/// The engine front door: owns all long-lived state and services
pub struct Coordinator {
    registry: Arc<SessionRegistry>,
    ledger: SharedLedger,
    transport: Arc<dyn ChatTransport>,
    pool: PoolBuilder,
    renderer: Arc<dyn Renderer>,
    bank: QuestionBank,
}

impl Coordinator {
    /// Wires up a coordinator from its external collaborators
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Box<dyn LedgerStore>,
        majority: Arc<dyn QuestionSource>,
        minority: Arc<dyn QuestionSource>,
        translator: Arc<dyn Translator>,
        renderer: Arc<dyn Renderer>,
        bank: QuestionBank,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(),
            ledger: Arc::new(Mutex::new(ScoreLedger::open(store))),
            transport: transport.clone(),
            pool: PoolBuilder::new(majority, minority, translator, renderer.clone()),
            renderer,
            bank,
        }
    }

    /// The session registry, for embedders that need direct access
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Shared handle to the lifetime ledger
    pub fn ledger(&self) -> SharedLedger {
        self.ledger.clone()
    }

    /// Dispatches one command
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] describing why the command was refused;
    /// the engine state is unchanged on error except where documented.
    pub async fn handle_command(
        &self,
        channel: ChannelId,
        role: Role,
        command: Command,
    ) -> Result<CommandOutcome, CommandError> {
        match command {
            Command::Setup { mode, count } => self.setup(channel, role, mode, count).await,
            Command::Start => self.start(channel).await,
            Command::Top { limit } => self.top(channel, limit).await,
            Command::ResetAll => self.reset_all(channel).await,
            Command::Adjust { user, delta } => self.adjust(channel, role, user, delta).await,
            Command::PoolStats => self.pool_stats(channel, role).await,
        }
    }

    /// Routes an incoming chat event to the owning session
    ///
    /// Button presses return the session's reply so the host can give the
    /// presser private feedback; everything else returns `None`.
    pub async fn handle_event(&self, event: ChatEvent) -> Option<ChoiceReply> {
        match event {
            ChatEvent::ButtonPress {
                channel,
                user,
                choice,
                token,
            } => {
                let session = self.registry.get(channel)?;
                Some(session.submit_choice(user, choice, token).await)
            }
            ChatEvent::Message {
                channel,
                user,
                text,
            } => {
                if let Some(session) = self.registry.get(channel) {
                    session.submit_text(user, text);
                }
                None
            }
        }
    }

    /// Applies an elevated mid-round session-score amendment
    ///
    /// Mirrors the referee reactions of open-answer matches: the change is
    /// session-local, may be negative, and only lands while a round is
    /// live in an open session.
    ///
    /// # Errors
    ///
    /// Fails for non-admins and when no open session is active.
    pub async fn amend_session_score(
        &self,
        channel: ChannelId,
        role: Role,
        target: UserId,
        delta: i64,
    ) -> Result<bool, CommandError> {
        if role != Role::Admin {
            return Err(CommandError::PermissionDenied);
        }
        let session = self
            .registry
            .get(channel)
            .filter(|s| s.mode() == GameMode::Open)
            .ok_or(CommandError::NoActiveSession)?;
        Ok(session.amend_score(target, delta).await)
    }

    // ---- command implementations ---------------------------------------

    async fn setup(
        &self,
        channel: ChannelId,
        role: Role,
        mode: GameMode,
        count: Option<usize>,
    ) -> Result<CommandOutcome, CommandError> {
        if mode == GameMode::Open && role != Role::Admin {
            return Err(CommandError::PermissionDenied);
        }

        let request = SetupRequest {
            count: count.unwrap_or(session_limits::DEFAULT_QUESTION_COUNT),
            mode,
        };
        request
            .validate()
            .map_err(|report| CommandError::Invalid(report.to_string()))?;

        let session = Session::new(
            channel,
            mode,
            SessionTuning::for_mode(mode),
            self.transport.clone(),
            self.ledger.clone(),
            self.registry.clone(),
        );
        // Reserving the channel before the (slow) preload serializes
        // concurrent setup attempts in the same channel.
        if !self.registry.register(session.clone()) {
            return Err(CommandError::DuplicateSetup);
        }
        session.begin_preload();

        let loading = self
            .transport
            .send(
                channel,
                OutgoingMessage::text(
                    format!(
                        "Preparing {} questions... please wait.",
                        request.count
                    ),
                    Tone::Notice,
                ),
            )
            .await
            .ok();

        let (questions, report) = match mode {
            GameMode::Choice => {
                let (questions, report) = self.preload_choice(channel, loading, request.count).await;
                (questions, Some(report))
            }
            GameMode::Open => (self.preload_open(request.count).await, None),
        };

        if questions.is_empty() {
            session.install_questions(Vec::new(), report);
            self.registry.unregister_exact(&session);
            if let Some(id) = loading {
                let _ = self
                    .transport
                    .edit(
                        channel,
                        id,
                        OutgoingMessage::text(
                            "❌ Could not prepare any questions. Please try again later.",
                            Tone::Timeout,
                        ),
                    )
                    .await;
            }
            return Err(CommandError::SetupFailed);
        }

        let installed = session.install_questions(questions, report);
        if let Some(id) = loading {
            let _ = self
                .transport
                .edit(
                    channel,
                    id,
                    OutgoingMessage::text(
                        format!(
                            "✅ All set.\n{installed} questions prepared.\n\nUse the start command to begin."
                        ),
                        Tone::Success,
                    ),
                )
                .await;
        }
        Ok(CommandOutcome::SetupReady { count: installed })
    }

    /// Builds a choice-mode question set, streaming progress into the
    /// loading message
    async fn preload_choice(
        &self,
        channel: ChannelId,
        loading: Option<crate::transport::MessageId>,
        count: usize,
    ) -> (Vec<PreparedQuestion>, PoolReport) {
        let (progress_tx, mut progress_rx) =
            tokio::sync::mpsc::unbounded_channel::<(usize, usize)>();
        let editor = loading.map(|id| {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                while let Some((done, total)) = progress_rx.recv().await {
                    let _ = transport
                        .edit(
                            channel,
                            id,
                            OutgoingMessage::text(
                                format!("{done}/{total} questions prepared..."),
                                Tone::Notice,
                            ),
                        )
                        .await;
                }
            })
        });

        let built = self
            .pool
            .build_with_progress(count, move |done, total| {
                let _ = progress_tx.send((done, total));
            })
            .await;

        if let Some(editor) = editor {
            let _ = editor.await;
        }
        built
    }

    /// Samples and prepares an open-mode question set from the bank
    async fn preload_open(&self, count: usize) -> Vec<PreparedQuestion> {
        if self.bank.is_empty() {
            tracing::warn!("open-answer setup requested with an empty question bank");
            return Vec::new();
        }
        let mut questions = Vec::new();
        for entry in self.bank.sample(count) {
            if entry.prompt.chars().count() > pool_limits::MAX_PROMPT_CHARS {
                continue;
            }
            let media = self.renderer.render(&entry.prompt, &[]).await;
            questions.push(PreparedQuestion {
                prompt: entry.prompt,
                payload: QuestionPayload::Open {
                    answer: entry.answer,
                    alternate: None,
                },
                media,
                source: SourceId::from("bank"),
                family: entry.category,
            });
        }
        questions
    }

    async fn start(&self, channel: ChannelId) -> Result<CommandOutcome, CommandError> {
        let session = self
            .registry
            .get(channel)
            .ok_or(CommandError::NothingPrepared)?;
        match session.start().await {
            StartReply::Started(rounds) => Ok(CommandOutcome::Started { rounds }),
            StartReply::AlreadyStarted => Ok(CommandOutcome::AlreadyStarted),
            StartReply::NotReady => Err(CommandError::NothingPrepared),
        }
    }

    async fn top(
        &self,
        channel: ChannelId,
        limit: Option<usize>,
    ) -> Result<CommandOutcome, CommandError> {
        let rankings = {
            let Ok(ledger) = self.ledger.lock() else {
                return Ok(CommandOutcome::TopShown);
            };
            ledger.rankings(limit.unwrap_or(ledger_limits::DEFAULT_TOP_LIMIT))
        };
        let message = if rankings.is_empty() {
            OutgoingMessage::text("No lifetime scores recorded yet.", Tone::Notice)
        } else {
            standings_message("🏆 All-time best players:", &rankings, Tone::Standings)
        };
        let _ = self.transport.send(channel, message).await;
        Ok(CommandOutcome::TopShown)
    }

    async fn reset_all(&self, channel: ChannelId) -> Result<CommandOutcome, CommandError> {
        let cleared = self.registry.len();
        self.registry.reset_all();
        let _ = self
            .transport
            .send(
                channel,
                OutgoingMessage::text(
                    "♻ All matches were reset. New matches can be prepared now.",
                    Tone::Notice,
                ),
            )
            .await;
        Ok(CommandOutcome::ResetDone { cleared })
    }

    async fn adjust(
        &self,
        channel: ChannelId,
        role: Role,
        user: UserId,
        delta: i64,
    ) -> Result<CommandOutcome, CommandError> {
        if role != Role::Admin {
            return Err(CommandError::PermissionDenied);
        }
        let new_total = self
            .ledger
            .lock()
            .map(|mut ledger| ledger.adjust(user, delta))
            .unwrap_or_default();
        let _ = self
            .transport
            .send(
                channel,
                OutgoingMessage::text(
                    format!(
                        "Lifetime score of {} changed by {delta:+}.\nNew score: **{new_total}**",
                        mention(user)
                    ),
                    Tone::Notice,
                ),
            )
            .await;
        Ok(CommandOutcome::Adjusted { new_total })
    }

    async fn pool_stats(
        &self,
        channel: ChannelId,
        role: Role,
    ) -> Result<CommandOutcome, CommandError> {
        if role != Role::Admin {
            return Err(CommandError::PermissionDenied);
        }
        let report = self
            .registry
            .get(channel)
            .and_then(|session| session.pool_report())
            .ok_or(CommandError::NoActiveSession)?;
        let _ = self
            .transport
            .send(
                channel,
                OutgoingMessage::text(pool_stats_body(&report), Tone::Notice),
            )
            .await;
        Ok(CommandOutcome::PoolStatsShown)
    }
}

/// Formats a pool report into a diagnostics body
fn pool_stats_body(report: &PoolReport) -> String {
    let total = report.prepared.max(1);
    let bar = |pct: f64| "█".repeat(((pct / 5.0) as usize).max(1));

    let sources = report
        .sources
        .iter()
        .sorted_by_key(|(_, count)| std::cmp::Reverse(**count))
        .map(|(source, count)| {
            let pct = (*count as f64 / total as f64) * 100.0;
            format!("- **{source}** : {count} questions (~{pct:.1}%) {}", bar(pct))
        })
        .join("\n");

    let mut over_cap = Vec::new();
    let families = report
        .families
        .iter()
        .sorted_by_key(|(_, count)| std::cmp::Reverse(**count))
        .map(|(family, count)| {
            let pct = (*count as f64 / total as f64) * 100.0;
            if pct > pool_limits::FAMILY_CAP_RATIO * 100.0 {
                over_cap.push(format!("- `{family}` → {count} questions ({pct:.1}%)"));
            }
            format!("- **{family}** : {count} questions (~{pct:.1}%) {}", bar(pct))
        })
        .join("\n");

    let cap_line = if report.cap_relaxed > 0 {
        format!(
            "⚠️ Family cap was relaxed for {} question(s) to fill the set:\n{}",
            report.cap_relaxed,
            over_cap.join("\n")
        )
    } else {
        "✅ No family exceeds the diversity cap.".to_owned()
    };

    format!(
        "🔍 **Question set diagnostics**\nTotal questions: **{}** (requested {})\n\n\
         📦 Source distribution:\n{sources}\n\n\
         🧩 Family distribution:\n{families}\n\n\
         ⚖ Diversity cap status:\n{cap_line}",
        report.prepared, report.requested
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::MemoryStore,
        pool::RawCandidate,
        providers::{IdentityTranslator, NullRenderer},
        session::SessionPhase,
        transport::{MessageId, TransportError},
    };
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct MockTransport {
        counter: AtomicU64,
        sent: Mutex<Vec<OutgoingMessage>>,
        edits: Mutex<Vec<OutgoingMessage>>,
    }

    #[async_trait::async_trait]
    impl ChatTransport for MockTransport {
        async fn send(
            &self,
            _channel: ChannelId,
            message: OutgoingMessage,
        ) -> Result<MessageId, TransportError> {
            self.sent.lock().unwrap().push(message);
            Ok(MessageId(self.counter.fetch_add(1, Ordering::Relaxed)))
        }

        async fn edit(
            &self,
            _channel: ChannelId,
            _message: MessageId,
            update: OutgoingMessage,
        ) -> Result<(), TransportError> {
            self.edits.lock().unwrap().push(update);
            Ok(())
        }
    }

    struct StubSource {
        id: SourceId,
        items: Vec<RawCandidate>,
    }

    #[async_trait::async_trait]
    impl QuestionSource for StubSource {
        fn id(&self) -> SourceId {
            self.id.clone()
        }

        async fn fetch(&self, count: usize) -> Vec<RawCandidate> {
            self.items.iter().take(count).cloned().collect()
        }
    }

    fn candidate(source: &str, family: &str, tag: usize) -> RawCandidate {
        RawCandidate {
            source: SourceId::from(source),
            prompt: format!("{family} question {tag}?"),
            correct: format!("right-{tag}"),
            distractors: vec![
                format!("wrong-a-{tag}"),
                format!("wrong-b-{tag}"),
                format!("wrong-c-{tag}"),
            ],
            family: family.to_owned(),
        }
    }

    struct Fixture {
        coordinator: Coordinator,
        transport: Arc<MockTransport>,
    }

    fn fixture(majority: Vec<RawCandidate>, minority: Vec<RawCandidate>, bank: &str) -> Fixture {
        let transport = Arc::new(MockTransport::default());
        let coordinator = Coordinator::new(
            transport.clone(),
            Box::new(MemoryStore::default()),
            Arc::new(StubSource {
                id: SourceId::from("maj"),
                items: majority,
            }),
            Arc::new(StubSource {
                id: SourceId::from("min"),
                items: minority,
            }),
            Arc::new(IdentityTranslator),
            Arc::new(NullRenderer),
            QuestionBank::parse(bank),
        );
        Fixture {
            coordinator,
            transport,
        }
    }

    fn stocked() -> Fixture {
        let majority: Vec<_> = (0..20)
            .map(|i| candidate("maj", &format!("fam{}", i % 7), i))
            .collect();
        let minority: Vec<_> = (0..20)
            .map(|i| candidate("min", &format!("gam{}", i % 7), i))
            .collect();
        fixture(majority, minority, "Capital of France?|Paris|geo|easy")
    }

    #[tokio::test]
    async fn setup_prepares_and_registers() {
        let f = stocked();
        let outcome = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::SetupReady { count: 5 });

        let session = f.coordinator.registry().get(ChannelId(1)).unwrap();
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert!(session.pool_report().is_some());
    }

    #[tokio::test]
    async fn second_setup_in_same_channel_is_rejected() {
        let f = stocked();
        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(3),
                },
            )
            .await
            .unwrap();

        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Setup {
                    mode: GameMode::Open,
                    count: Some(3),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::DuplicateSetup));

        // Other channels are unaffected.
        f.coordinator
            .handle_command(
                ChannelId(2),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(3),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_setup_is_admin_only() {
        let f = stocked();
        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Open,
                    count: Some(1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));

        let outcome = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Setup {
                    mode: GameMode::Open,
                    count: Some(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::SetupReady { count: 1 });
    }

    #[tokio::test]
    async fn empty_bank_fails_setup_and_releases_the_channel() {
        let f = fixture(Vec::new(), Vec::new(), "");
        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Setup {
                    mode: GameMode::Open,
                    count: Some(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::SetupFailed));
        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn dead_sources_fail_choice_setup() {
        let f = fixture(Vec::new(), Vec::new(), "");
        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::SetupFailed));
        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn zero_count_is_invalid() {
        let f = stocked();
        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(0),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Invalid(_)));
        assert!(f.coordinator.registry().is_empty());
    }

    #[tokio::test]
    async fn start_requires_a_prepared_session() {
        let f = stocked();
        let err = f
            .coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Start)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NothingPrepared));
    }

    #[tokio::test]
    async fn start_runs_once_then_reports_noop() {
        let f = stocked();
        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(3),
                },
            )
            .await
            .unwrap();

        let outcome = f
            .coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Start)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Started { rounds: 3 });

        let outcome = f
            .coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Start)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::AlreadyStarted);
    }

    #[tokio::test]
    async fn button_events_route_to_the_session() {
        let f = stocked();
        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(2),
                },
            )
            .await
            .unwrap();
        f.coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Start)
            .await
            .unwrap();

        let reply = f
            .coordinator
            .handle_event(ChatEvent::ButtonPress {
                channel: ChannelId(1),
                user: UserId(5),
                choice: 0,
                token: 1,
            })
            .await;
        assert!(reply.is_some());

        // Events for channels without a session vanish quietly.
        let reply = f
            .coordinator
            .handle_event(ChatEvent::ButtonPress {
                channel: ChannelId(9),
                user: UserId(5),
                choice: 0,
                token: 1,
            })
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn adjust_is_admin_only_and_signed() {
        let f = stocked();
        let err = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Adjust {
                    user: UserId(8),
                    delta: 5,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));

        let outcome = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Adjust {
                    user: UserId(8),
                    delta: 5,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Adjusted { new_total: 5 });

        let outcome = f
            .coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Adjust {
                    user: UserId(8),
                    delta: -7,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Adjusted { new_total: -2 });
    }

    #[tokio::test]
    async fn top_publishes_the_ranking() {
        let f = stocked();
        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Adjust {
                    user: UserId(8),
                    delta: 5,
                },
            )
            .await
            .unwrap();

        f.coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Top { limit: None })
            .await
            .unwrap();

        let sent = f.transport.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.body.contains("All-time best players")));
    }

    #[tokio::test]
    async fn reset_clears_every_channel() {
        let f = stocked();
        for channel in [ChannelId(1), ChannelId(2)] {
            f.coordinator
                .handle_command(
                    channel,
                    Role::Member,
                    Command::Setup {
                        mode: GameMode::Choice,
                        count: Some(2),
                    },
                )
                .await
                .unwrap();
        }

        let outcome = f
            .coordinator
            .handle_command(ChannelId(1), Role::Member, Command::ResetAll)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::ResetDone { cleared: 2 });
        assert!(f.coordinator.registry().is_empty());

        // The channel is immediately reusable.
        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(2),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn pool_stats_require_admin_and_an_active_session() {
        let f = stocked();
        let err = f
            .coordinator
            .handle_command(ChannelId(1), Role::Admin, Command::PoolStats)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoActiveSession));

        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Member,
                Command::Setup {
                    mode: GameMode::Choice,
                    count: Some(5),
                },
            )
            .await
            .unwrap();

        let err = f
            .coordinator
            .handle_command(ChannelId(1), Role::Member, Command::PoolStats)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));

        let outcome = f
            .coordinator
            .handle_command(ChannelId(1), Role::Admin, Command::PoolStats)
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::PoolStatsShown);

        let sent = f.transport.sent.lock().unwrap();
        assert!(sent.iter().any(|m| m.body.contains("Source distribution")));
    }

    #[tokio::test]
    async fn amend_requires_admin_and_a_live_open_session() {
        let f = stocked();
        let err = f
            .coordinator
            .amend_session_score(ChannelId(1), Role::Member, UserId(2), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::PermissionDenied));

        let err = f
            .coordinator
            .amend_session_score(ChannelId(1), Role::Admin, UserId(2), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NoActiveSession));

        f.coordinator
            .handle_command(
                ChannelId(1),
                Role::Admin,
                Command::Setup {
                    mode: GameMode::Open,
                    count: Some(1),
                },
            )
            .await
            .unwrap();
        f.coordinator
            .handle_command(ChannelId(1), Role::Member, Command::Start)
            .await
            .unwrap();

        let applied = f
            .coordinator
            .amend_session_score(ChannelId(1), Role::Admin, UserId(2), 1)
            .await
            .unwrap();
        assert!(applied);
    }
}
