//! Blind model comparison.
//!
//! A user starts a session, then every prompt is answered by all candidate
//! models at once. Responses are shown under shuffled letters, the user rates
//! each letter 1-5, and ending the session reveals per-model averages.
//!
//! Per user: `Idle -> Active -> (AwaitingRatings <-> Active) -> Idle`.
//! `Idle` is the absence of a session entry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::{LazyLock, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::{info, warn};

use crate::chatbot::completion::{
    with_timeout, CompletionProvider, CompletionRequest, GenerationSettings,
};
use crate::chatbot::history::ConversationTurn;

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 5;

static RATING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([a-z])\s*[:=]\s*(\d+)\b").expect("valid rating pattern"));

/// Letter shown for the candidate at `index`.
pub fn label_for(index: usize) -> char {
    (b'A' + index as u8) as char
}

/// A round waiting for ratings.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRound {
    pub prompt: String,
    /// label -> model
    pub mapping: BTreeMap<char, String>,
}

/// A fully rated round.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResult {
    pub prompt: String,
    pub mapping: BTreeMap<char, String>,
    pub ratings: BTreeMap<char, u8>,
}

/// One response as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledResponse {
    pub label: char,
    pub text: String,
}

#[derive(Debug, Default)]
struct TestSession {
    pending: Option<PendingRound>,
    results: Vec<RoundResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonError {
    NotActive,
    NoPendingRound,
    /// A new round was requested while the previous one is unrated.
    RoundPending,
    MissingRatings(Vec<char>),
    UnknownLabel(char),
    ScoreOutOfRange { label: char, score: u32 },
    NoResponses,
}

impl fmt::Display for ComparisonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotActive => write!(f, "no comparison test is active"),
            Self::NoPendingRound => write!(f, "no responses are waiting for ratings"),
            Self::RoundPending => write!(f, "the previous round has not been rated yet"),
            Self::MissingRatings(labels) => {
                let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
                write!(f, "missing ratings for {}", labels.join(", "))
            }
            Self::UnknownLabel(label) => write!(f, "there is no response {label}"),
            Self::ScoreOutOfRange { label, score } => {
                write!(f, "rating {score} for {label} is outside {MIN_SCORE}-{MAX_SCORE}")
            }
            Self::NoResponses => write!(f, "no candidate responses to compare"),
        }
    }
}

impl std::error::Error for ComparisonError {}

/// Parse `A:4 B:5 C:3` (also `a=4`, commas) into raw label/score pairs.
///
/// Only syntax is checked here; completeness and ranges are checked by
/// [`ComparisonTests::submit_ratings`].
pub fn parse_ratings(args: &str) -> BTreeMap<char, u32> {
    let mut ratings = BTreeMap::new();
    for caps in RATING_PATTERN.captures_iter(args) {
        let label = caps[1].chars().next().map(|c| c.to_ascii_uppercase());
        let score = caps[2].parse::<u32>().ok();
        if let (Some(label), Some(score)) = (label, score) {
            ratings.insert(label, score);
        }
    }
    ratings
}

/// Per-user comparison sessions.
pub struct ComparisonTests {
    sessions: Mutex<HashMap<i64, TestSession>>,
}

impl Default for ComparisonTests {
    fn default() -> Self {
        Self::new()
    }
}

impl ComparisonTests {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<i64, TestSession>) -> T) -> T {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut sessions)
    }

    /// `Idle -> Active`. Returns false if a session was already running.
    pub fn start(&self, user_id: i64) -> bool {
        self.with_sessions(|sessions| {
            if sessions.contains_key(&user_id) {
                return false;
            }
            sessions.insert(user_id, TestSession::default());
            true
        })
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        self.with_sessions(|sessions| sessions.contains_key(&user_id))
    }

    pub fn has_pending(&self, user_id: i64) -> bool {
        self.with_sessions(|sessions| {
            sessions
                .get(&user_id)
                .is_some_and(|s| s.pending.is_some())
        })
    }

    #[cfg(test)]
    pub fn pending_labels(&self, user_id: i64) -> Vec<char> {
        self.with_sessions(|sessions| {
            sessions
                .get(&user_id)
                .and_then(|s| s.pending.as_ref())
                .map(|p| p.mapping.keys().copied().collect())
                .unwrap_or_default()
        })
    }

    #[cfg(test)]
    pub fn pending_round(&self, user_id: i64) -> Option<PendingRound> {
        self.with_sessions(|sessions| sessions.get(&user_id).and_then(|s| s.pending.clone()))
    }

    #[cfg(test)]
    pub fn completed_rounds(&self, user_id: i64) -> usize {
        self.with_sessions(|sessions| sessions.get(&user_id).map_or(0, |s| s.results.len()))
    }

    /// `Active -> AwaitingRatings`.
    ///
    /// `responses` is `(model, text)` in candidate order. Labels are bound to
    /// models through a fresh uniform shuffle, and the returned list is in
    /// label order with model names hidden.
    pub fn begin_round<R: Rng + ?Sized>(
        &self,
        user_id: i64,
        prompt: &str,
        mut responses: Vec<(String, String)>,
        rng: &mut R,
    ) -> Result<Vec<LabeledResponse>, ComparisonError> {
        if responses.is_empty() {
            return Err(ComparisonError::NoResponses);
        }

        self.with_sessions(|sessions| {
            let session = sessions.get_mut(&user_id).ok_or(ComparisonError::NotActive)?;
            if session.pending.is_some() {
                return Err(ComparisonError::RoundPending);
            }

            responses.shuffle(rng);

            let mut mapping = BTreeMap::new();
            let mut labeled = Vec::with_capacity(responses.len());
            for (index, (model, text)) in responses.into_iter().enumerate() {
                let label = label_for(index);
                mapping.insert(label, model);
                labeled.push(LabeledResponse { label, text });
            }

            session.pending = Some(PendingRound {
                prompt: prompt.to_string(),
                mapping,
            });
            Ok(labeled)
        })
    }

    /// `AwaitingRatings -> Active`. Every label must be rated in range;
    /// on any error the pending round is left untouched so the user can retry.
    ///
    /// Returns the number of completed rounds.
    pub fn submit_ratings(
        &self,
        user_id: i64,
        ratings: &BTreeMap<char, u32>,
    ) -> Result<usize, ComparisonError> {
        self.with_sessions(|sessions| {
            let session = sessions.get_mut(&user_id).ok_or(ComparisonError::NotActive)?;
            let pending = session.pending.as_ref().ok_or(ComparisonError::NoPendingRound)?;

            if let Some(&label) = ratings.keys().find(|l| !pending.mapping.contains_key(l)) {
                return Err(ComparisonError::UnknownLabel(label));
            }
            let missing: Vec<char> = pending
                .mapping
                .keys()
                .filter(|l| !ratings.contains_key(l))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(ComparisonError::MissingRatings(missing));
            }
            if let Some((&label, &score)) = ratings
                .iter()
                .find(|(_, s)| !(MIN_SCORE as u32..=MAX_SCORE as u32).contains(s))
            {
                return Err(ComparisonError::ScoreOutOfRange { label, score });
            }

            let Some(pending) = session.pending.take() else {
                return Err(ComparisonError::NoPendingRound);
            };
            session.results.push(RoundResult {
                prompt: pending.prompt,
                mapping: pending.mapping,
                ratings: ratings.iter().map(|(&l, &s)| (l, s as u8)).collect(),
            });
            Ok(session.results.len())
        })
    }

    /// Discard the unrated round without recording anything.
    pub fn skip_round(&self, user_id: i64) -> Result<(), ComparisonError> {
        self.with_sessions(|sessions| {
            let session = sessions.get_mut(&user_id).ok_or(ComparisonError::NotActive)?;
            session
                .pending
                .take()
                .map(|_| ())
                .ok_or(ComparisonError::NoPendingRound)
        })
    }

    /// `-> Idle`, aggregating every rated round.
    pub fn end(&self, user_id: i64) -> Result<TestReport, ComparisonError> {
        let session = self
            .with_sessions(|sessions| sessions.remove(&user_id))
            .ok_or(ComparisonError::NotActive)?;
        Ok(TestReport::from_results(session.results))
    }

    /// Drop a session without reporting. Returns true if one existed.
    pub fn cancel(&self, user_id: i64) -> bool {
        self.with_sessions(|sessions| sessions.remove(&user_id).is_some())
    }
}

/// Scores one model collected across all rounds, whatever label it wore.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelScore {
    pub model: String,
    pub scores: Vec<u8>,
}

impl ModelScore {
    pub fn mean(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().map(|&s| s as f64).sum::<f64>() / self.scores.len() as f64
    }
}

/// Final outcome of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TestReport {
    pub rounds: Vec<RoundResult>,
    /// Highest mean first.
    pub rankings: Vec<ModelScore>,
}

impl TestReport {
    pub fn from_results(rounds: Vec<RoundResult>) -> Self {
        let mut by_model: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for round in &rounds {
            for (label, &score) in &round.ratings {
                if let Some(model) = round.mapping.get(label) {
                    by_model.entry(model.clone()).or_default().push(score);
                }
            }
        }

        let mut rankings: Vec<ModelScore> = by_model
            .into_iter()
            .map(|(model, scores)| ModelScore { model, scores })
            .collect();
        // BTreeMap order makes ties fall back to model name.
        rankings.sort_by(|a, b| b.mean().total_cmp(&a.mean()));

        Self { rounds, rankings }
    }

    pub fn recommended(&self) -> Option<&str> {
        self.rankings.first().map(|s| s.model.as_str())
    }

    /// Chat-sized summary revealing the models.
    pub fn summary(&self) -> String {
        if self.rounds.is_empty() {
            return "🏁 Test ended. No rounds were rated, so there is nothing to report.\n\nUse /test to start a new test."
                .to_string();
        }

        let medals = ["🥇", "🥈", "🥉"];
        let mut text = String::from("🏆 BLIND TEST RESULTS\n\n");
        let _ = writeln!(text, "Total tests: {}\n", self.rounds.len());
        text.push_str("Rankings:\n");
        for (i, score) in self.rankings.iter().enumerate() {
            let medal = medals.get(i).copied().unwrap_or("  ");
            let _ = writeln!(text, "{} {}", medal, score.model);
            let _ = writeln!(
                text,
                "   Avg: {:.2}/5 ({} ratings)\n",
                score.mean(),
                score.scores.len()
            );
        }
        if let Some(winner) = self.recommended() {
            let _ = writeln!(text, "🎯 Recommended model: {winner}\n");
        }
        text.push_str("Test ended. Use /test to start a new test.");
        text
    }

    /// Full markdown write-up including every prompt and the hidden mapping.
    pub fn to_markdown(&self, generated_at: &str) -> String {
        let mut md = String::from("# Blind Model Comparison\n\n");
        let _ = writeln!(md, "Generated: {generated_at}\n");
        let _ = writeln!(md, "Rounds rated: {}\n", self.rounds.len());

        md.push_str("## Rankings\n\n| Rank | Model | Average | Ratings |\n|---|---|---|---|\n");
        for (i, score) in self.rankings.iter().enumerate() {
            let _ = writeln!(
                md,
                "| {} | {} | {:.2} | {} |",
                i + 1,
                score.model,
                score.mean(),
                score.scores.len()
            );
        }
        if let Some(winner) = self.recommended() {
            let _ = writeln!(md, "\n**Recommended:** `{winner}`");
        }

        md.push_str("\n## Rounds\n");
        for (i, round) in self.rounds.iter().enumerate() {
            let _ = writeln!(md, "\n### Round {}\n", i + 1);
            let _ = writeln!(md, "> {}\n", round.prompt.replace('\n', "\n> "));
            for (label, model) in &round.mapping {
                let score = round.ratings.get(label).copied().unwrap_or(0);
                let _ = writeln!(md, "- **{label}** = {model}: {score}/5");
            }
        }
        md
    }
}

/// Placeholder shown in place of a failed candidate response.
pub fn failure_placeholder(model: &str) -> String {
    format!("[Error: Could not get response from {model}]")
}

/// Ask every model the same question concurrently.
///
/// Each call gets its own deadline; a failure or timeout yields a
/// placeholder for that model and never affects the others. Output is
/// `(model, text)` in the order of `models`.
pub async fn fan_out(
    provider: &dyn CompletionProvider,
    models: &[String],
    messages: &[ConversationTurn],
    settings: &GenerationSettings,
    timeout: Duration,
) -> Vec<(String, String)> {
    let calls = models.iter().map(|model| async move {
        let request = CompletionRequest::new(model.clone(), messages.to_vec(), settings);
        let text = match with_timeout(timeout, provider.complete(&request)).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Comparison call to {} failed: {}", model, e);
                failure_placeholder(model)
            }
        };
        (model.clone(), text)
    });

    let responses = futures::future::join_all(calls).await;
    info!("Fan-out finished for {} model(s)", responses.len());
    responses
}
