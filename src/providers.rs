//! External service contracts
//!
//! Question sources, translation, and rendering are pluggable services
//! behind narrow traits. All three are best-effort: a failing source
//! contributes zero candidates, a failing translator returns its input
//! unchanged, and a failing renderer yields no media (the question falls
//! back to text presentation). Nothing in this module may surface an error
//! to a session.

use serde::{Deserialize, Serialize};

use crate::{pool::RawCandidate, transport::MediaRef};

/// Identity of a question source
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display,
)]
pub struct SourceId(pub String);

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A remote (or local) provider of raw trivia questions
///
/// Implementations must swallow their own failures: a provider that is
/// down, rate limited, or returns garbage reports an empty list. The pool
/// builder treats "source unavailable" as "source contributed zero" and
/// compensates from the other sources.
#[async_trait::async_trait]
pub trait QuestionSource: Send + Sync {
    /// Stable identity of this source, used for ratio bookkeeping
    fn id(&self) -> SourceId;

    /// Fetches up to `count` raw candidates, best-effort
    async fn fetch(&self, count: usize) -> Vec<RawCandidate>;
}

/// A text translation service
///
/// `translate` never fails; when the underlying service is unavailable the
/// input is returned unchanged, and callers cannot tell the difference.
#[async_trait::async_trait]
pub trait Translator: Send + Sync {
    /// Translates `text`, or returns it unchanged on any failure
    async fn translate(&self, text: &str) -> String;
}

/// A question-to-image rendering service
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    /// Renders a question card, or `None` when rendering is unavailable
    ///
    /// `None` is an expected outcome (missing background asset, oversized
    /// text); callers present the question as formatted text instead.
    async fn render(&self, prompt: &str, options: &[String]) -> Option<MediaRef>;
}

/// Translator that returns every input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

#[async_trait::async_trait]
impl Translator for IdentityTranslator {
    async fn translate(&self, text: &str) -> String {
        text.to_owned()
    }
}

/// Renderer that never produces media
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

#[async_trait::async_trait]
impl Renderer for NullRenderer {
    async fn render(&self, _prompt: &str, _options: &[String]) -> Option<MediaRef> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_translator_echoes_input() {
        let t = IdentityTranslator;
        assert_eq!(t.translate("hello").await, "hello");
    }

    #[tokio::test]
    async fn null_renderer_yields_no_media() {
        let r = NullRenderer;
        assert!(r.render("prompt", &["a".to_owned()]).await.is_none());
    }
}
