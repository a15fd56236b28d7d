//! Chat platform contract
//!
//! This module defines the narrow interface the engine needs from a chat
//! platform: identities for channels, users, and messages, an outgoing
//! message shape with semantic tones and answer buttons, and the
//! [`ChatTransport`] trait for delivering and editing messages. Incoming
//! traffic arrives as [`ChatEvent`] values fed to the coordinator by the
//! embedding host.

use serde::{Deserialize, Serialize};

/// Identity of a chat channel, as assigned by the platform
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct ChannelId(pub u64);

/// Identity of a chat participant, as assigned by the platform
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct UserId(pub u64);

/// Identity of a delivered message, used for later edits
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
)]
pub struct MessageId(pub u64);

/// Semantic tone of an outgoing message
///
/// Transports map tones to whatever presentation the platform offers
/// (embed colors, prefixes); the engine never deals in raw colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tone {
    /// A question being presented
    Question,
    /// A correct answer was given
    Success,
    /// The answer window elapsed with no winner
    Timeout,
    /// Intermediate per-session standings
    Standings,
    /// Final results of a session
    Final,
    /// Neutral informational notice
    Notice,
    /// A score was reduced
    Penalty,
}

/// Reference to media accompanying a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaRef {
    /// An opaque attachment key produced by a renderer
    Attachment(String),
    /// A remote image location
    Url(String),
}

/// Visual style of an answer button row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonStyle {
    /// Neutral style, used by trivia-style sessions with numbered buttons
    Primary,
    /// Affirmative style, used by picture rounds with labeled buttons
    Success,
}

/// A row of answer buttons attached to a question message
///
/// The `token` is the round's fence token; the platform glue must echo it
/// back on every press so stale presses can be discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonRow {
    /// Fence token of the round the buttons belong to
    pub token: u64,
    /// Button labels, one per answer option in presentation order
    pub labels: Vec<String>,
    /// Visual style applied to every button in the row
    pub style: ButtonStyle,
    /// Whether the buttons still accept presses
    pub enabled: bool,
}

/// An outgoing chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Message body text
    pub body: String,
    /// Semantic tone for presentation
    pub tone: Tone,
    /// Optional accompanying media
    pub media: Option<MediaRef>,
    /// Optional answer buttons
    pub buttons: Option<ButtonRow>,
}

impl OutgoingMessage {
    /// Creates a plain text message with the given tone
    pub fn text(body: impl Into<String>, tone: Tone) -> Self {
        Self {
            body: body.into(),
            tone,
            media: None,
            buttons: None,
        }
    }

    /// Attaches media to the message
    #[must_use]
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Attaches an answer button row to the message
    #[must_use]
    pub fn with_buttons(mut self, buttons: ButtonRow) -> Self {
        self.buttons = Some(buttons);
        self
    }
}

/// Incoming chat traffic relevant to the engine
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A button press on an answer row
    ButtonPress {
        /// Channel the press happened in
        channel: ChannelId,
        /// User who pressed the button
        user: UserId,
        /// Zero-based index of the pressed option
        choice: usize,
        /// Fence token echoed from the button row
        token: u64,
    },
    /// A free-text message
    Message {
        /// Channel the message was sent to
        channel: ChannelId,
        /// Author of the message
        user: UserId,
        /// Raw message text
        text: String,
    },
}

/// Failure delivering or editing a message
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The platform rejected or dropped the delivery
    #[error("message delivery failed: {0}")]
    Delivery(String),
    /// The referenced message no longer exists
    #[error("message no longer exists")]
    MissingMessage,
}

/// Trait for sending messages to a chat channel
///
/// This abstracts the chat platform. Implementations might talk to a
/// gateway websocket, an HTTP API, or a test buffer. All engine output
/// flows through these two methods.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a new message to a channel
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the platform rejects the delivery.
    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<MessageId, TransportError>;

    /// Replaces the content of a previously sent message
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the message cannot be edited.
    async fn edit(
        &self,
        channel: ChannelId,
        message: MessageId,
        update: OutgoingMessage,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_builder_attaches_parts() {
        let msg = OutgoingMessage::text("question", Tone::Question)
            .with_media(MediaRef::Url("https://example.com/x.png".to_owned()))
            .with_buttons(ButtonRow {
                token: 3,
                labels: vec!["1".to_owned(), "2".to_owned()],
                style: ButtonStyle::Primary,
                enabled: true,
            });

        assert_eq!(msg.tone, Tone::Question);
        assert!(matches!(msg.media, Some(MediaRef::Url(_))));
        assert_eq!(msg.buttons.as_ref().map(|b| b.token), Some(3));
    }

    #[test]
    fn ids_display_as_plain_numbers() {
        assert_eq!(ChannelId(7).to_string(), "7");
        assert_eq!(UserId(42).to_string(), "42");
    }
}
