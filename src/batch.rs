//! Batch self-test over fixed queries
//!
//! Each case names a query and what the assistant should do with it: reject
//! it as off-topic, or answer it (optionally with an expected keyword in the
//! reply).

use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Outcome, QueryPipeline, Response, StatsSnapshot};
use crate::{Error, Result};

const EMBEDDED_CASES: &str = include_str!("../data/batch_queries.json");

/// One self-test query
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchCase {
    pub query: String,

    /// Whether the gate should accept the query
    pub in_domain: bool,

    /// Word the reply must contain (case-insensitive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_keyword: Option<String>,
}

impl BatchCase {
    /// Parse a JSON list of cases
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the list is empty
    pub fn parse_list(json: &str) -> Result<Vec<Self>> {
        let cases: Vec<Self> = serde_json::from_str(json)?;
        if cases.is_empty() {
            return Err(Error::Config("batch query list is empty".to_string()));
        }
        Ok(cases)
    }

    /// Cases compiled into the binary
    ///
    /// # Errors
    ///
    /// Returns error if the embedded JSON is malformed
    pub fn embedded() -> Result<Vec<Self>> {
        Self::parse_list(EMBEDDED_CASES)
    }

    /// Cases from `path`, or the embedded list when `None`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: Option<&Path>) -> Result<Vec<Self>> {
        match path {
            Some(path) => Self::parse_list(&std::fs::read_to_string(path)?),
            None => Self::embedded(),
        }
    }

    /// Why `outcome`/`response` does not satisfy this case, if it doesn't
    fn check(&self, response: &Response, outcome: &Outcome) -> Option<String> {
        let rejected = matches!(outcome, Outcome::TopicRejected { .. });

        if !self.in_domain {
            return (!rejected).then(|| format!("expected rejection, got {}", response.source));
        }
        if rejected {
            return Some("rejected as off-topic".to_string());
        }

        let keyword = self.expected_keyword.as_deref()?;
        let found = response.text.to_lowercase().contains(&keyword.to_lowercase());
        (!found).then(|| format!("reply does not mention {keyword:?}"))
    }
}

/// Result of running one case
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub case: BatchCase,
    pub response: Response,
    pub outcome: Outcome,

    /// `None` when the case passed
    pub failure: Option<String>,
}

impl CaseResult {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Results of a batch run
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub results: Vec<CaseResult>,
    pub stats: StatsSnapshot,
}

impl BatchReport {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// Per-case lines followed by the totals and pipeline counters
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        for result in &self.results {
            let mark = if result.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(out, "[{mark}] {}", result.case.query);
            let _ = writeln!(out, "       {}: {}", result.response.source, result.response.text);
            if let Some(failure) = &result.failure {
                let _ = writeln!(out, "       {failure}");
            }
        }

        let _ = writeln!(out, "---");
        let _ = writeln!(out, "{}/{} passed", self.passed(), self.results.len());
        let _ = writeln!(out, "{}", self.stats);
        out
    }
}

/// Resolve every case in order and grade the results
pub async fn run(pipeline: &QueryPipeline, cases: Vec<BatchCase>) -> BatchReport {
    let mut results = Vec::with_capacity(cases.len());

    for case in cases {
        let resolution = pipeline.resolve(&case.query).await;
        let failure = case.check(&resolution.response, &resolution.outcome);

        if let Some(reason) = &failure {
            tracing::warn!(query = %case.query, reason, "batch case failed");
        } else {
            tracing::debug!(query = %case.query, source = %resolution.response.source, "batch case passed");
        }

        results.push(CaseResult {
            case,
            response: resolution.response,
            outcome: resolution.outcome,
            failure,
        });
    }

    BatchReport {
        results,
        stats: pipeline.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{AnswerRejection, ResponseSource};

    fn case(in_domain: bool, keyword: Option<&str>) -> BatchCase {
        BatchCase {
            query: "q".to_string(),
            in_domain,
            expected_keyword: keyword.map(ToString::to_string),
        }
    }

    fn reply(text: &str, source: ResponseSource) -> Response {
        Response {
            text: text.to_string(),
            source,
        }
    }

    #[test]
    fn test_embedded_cases() {
        let cases = BatchCase::embedded().unwrap();
        assert!(cases.iter().any(|c| c.in_domain));
        assert!(cases.iter().any(|c| !c.in_domain));
        assert!(BatchCase::parse_list("[]").is_err());
    }

    #[test]
    fn test_check_rejection_cases() {
        let refused = reply("Sorry", ResponseSource::Refused);
        let rejected = Outcome::TopicRejected { score: Some(0.1) };
        let hit = Outcome::FaqHit { index: 0, score: 0.9 };

        assert!(case(false, None).check(&refused, &rejected).is_none());
        assert!(case(false, None).check(&reply("Use fine grounds", ResponseSource::Faq), &hit).is_some());
        assert!(case(true, None).check(&refused, &rejected).is_some());
    }

    #[test]
    fn test_check_expected_keyword() {
        let hit = Outcome::FaqHit { index: 3, score: 0.95 };
        let answer = reply("Espresso is brewed under pressure.", ResponseSource::Faq);

        assert!(case(true, Some("espresso")).check(&answer, &hit).is_none());
        assert!(case(true, Some("latte")).check(&answer, &hit).is_some());

        // An apology never mentions the expected drink
        let apology = reply("Sorry, I don't have a good answer.", ResponseSource::Refused);
        let rejected = Outcome::GenerationRejected {
            best_score: Some(0.4),
            reason: AnswerRejection::Empty,
        };
        assert!(case(true, Some("espresso")).check(&apology, &rejected).is_some());
        assert!(case(true, None).check(&apology, &rejected).is_none());
    }
}
