//! Open-answer question bank
//!
//! Open sessions draw from a curated local bank instead of remote sources.
//! The bank is a plain text file, one question per line:
//!
//! ```text
//! question|answer|category|difficulty
//! ```
//!
//! Category and difficulty are optional. Blank lines and lines starting
//! with `#` are skipped, as are lines with fewer than two fields.

use std::{fs, path::Path};

/// One curated open-answer question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankQuestion {
    /// The question text
    pub prompt: String,
    /// The expected answer
    pub answer: String,
    /// Optional topic label
    pub category: String,
    /// Optional difficulty label
    pub difficulty: String,
}

/// The loaded open-answer question bank
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: Vec<BankQuestion>,
}

impl QuestionBank {
    /// Parses bank contents from text
    pub fn parse(contents: &str) -> Self {
        let questions = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut parts = line.split('|').map(str::trim);
                let prompt = parts.next()?.to_owned();
                let answer = parts.next()?.to_owned();
                if prompt.is_empty() || answer.is_empty() {
                    return None;
                }
                Some(BankQuestion {
                    prompt,
                    answer,
                    category: parts.next().unwrap_or_default().to_owned(),
                    difficulty: parts.next().unwrap_or_default().to_owned(),
                })
            })
            .collect();
        Self { questions }
    }

    /// Loads the bank from a file, degrading to an empty bank on failure
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let bank = Self::parse(&contents);
                tracing::info!(count = bank.len(), path = %path.display(), "question bank loaded");
                bank
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "question bank unavailable, starting empty");
                Self::default()
            }
        }
    }

    /// Number of questions in the bank
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    /// Whether the bank holds no questions
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Draws up to `count` distinct questions in random order
    pub fn sample(&self, count: usize) -> Vec<BankQuestion> {
        let mut indices: Vec<usize> = (0..self.questions.len()).collect();
        fastrand::shuffle(&mut indices);
        indices
            .into_iter()
            .take(count)
            .map(|i| self.questions[i].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# capital cities
Capital of France?|Paris|geography|easy
Capital of Japan?|Tokyo|geography

malformed line without separator
Largest planet?|Jupiter
|missing prompt
Missing answer?|
";

    #[test]
    fn parses_well_formed_lines_only() {
        let bank = QuestionBank::parse(SAMPLE);
        assert_eq!(bank.len(), 3);
        let sample = bank.sample(10);
        assert!(sample.iter().any(|q| q.answer == "Paris"));
        assert!(sample.iter().any(|q| q.answer == "Tokyo"));
        assert!(sample.iter().any(|q| q.answer == "Jupiter"));
    }

    #[test]
    fn optional_fields_default_to_empty() {
        let bank = QuestionBank::parse("Q?|A");
        let q = &bank.sample(1)[0];
        assert_eq!(q.category, "");
        assert_eq!(q.difficulty, "");
    }

    #[test]
    fn sample_is_distinct_and_bounded() {
        let bank = QuestionBank::parse("a?|1\nb?|2\nc?|3");
        let sample = bank.sample(2);
        assert_eq!(sample.len(), 2);
        assert_ne!(sample[0], sample[1]);
        assert_eq!(bank.sample(99).len(), 3);
    }

    #[test]
    fn missing_file_degrades_to_empty() {
        let bank = QuestionBank::load(Path::new("/nonexistent/questions.txt"));
        assert!(bank.is_empty());
    }
}
