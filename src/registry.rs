//! Session registry
//!
//! Process-wide map from channel to its one active (or prepared) session.
//! At most one session of any mode may hold a channel at a time; setup
//! reserves the slot before preloading so two simultaneous setup attempts
//! in the same channel serialize, while channels never contend with each
//! other.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{session::Session, transport::ChannelId};

/// Registry of live sessions keyed by channel
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<ChannelId, Arc<Session>>,
}

impl SessionRegistry {
    /// Creates an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a session for its channel
    ///
    /// Fails when any session, of any mode, already holds the channel.
    pub fn register(&self, session: Arc<Session>) -> bool {
        match self.sessions.entry(session.channel()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Looks up the session holding a channel
    pub fn get(&self, channel: ChannelId) -> Option<Arc<Session>> {
        self.sessions.get(&channel).map(|entry| entry.value().clone())
    }

    /// Removes whatever session holds the channel; idempotent
    pub fn unregister(&self, channel: ChannelId) {
        self.sessions.remove(&channel);
    }

    /// Removes the channel's session only if it is this exact session
    ///
    /// A finished session removes itself with this so a stale finish can
    /// never evict a successor that re-registered the channel.
    pub fn unregister_exact(&self, session: &Arc<Session>) {
        self.sessions
            .remove_if(&session.channel(), |_, held| Arc::ptr_eq(held, session));
    }

    /// Force-stops and removes every session, across all channels
    pub fn reset_all(&self) {
        for entry in &self.sessions {
            entry.value().force_finish();
        }
        self.sessions.clear();
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
