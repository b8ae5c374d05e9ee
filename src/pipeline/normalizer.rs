//! Domain-vocabulary correction for transcribed utterances
//!
//! Speech engines routinely mangle coffee vocabulary ("expresso",
//! "capuccino"). The normalizer lowercases the utterance and snaps tokens
//! onto a fixed lexicon of domain terms, either through a known
//! mis-transcription alias or through a bounded edit distance.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::{Error, Result};

/// Word tokens; everything between matches is kept verbatim
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)*").expect("token regex is valid"));

/// One captured, transcribed unit of user speech
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utterance {
    /// Transcribed text
    pub text: String,

    /// Engine confidence, when the engine reports one
    pub confidence: Option<f32>,

    /// When the utterance was produced
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    /// Create an utterance stamped with the current time
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach an engine confidence score
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A single token replacement made by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Substitution {
    /// Token as transcribed (lowercased)
    pub original: String,

    /// Lexicon term it was replaced with
    pub corrected: String,
}

/// Utterance text after domain-vocabulary correction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedQuery {
    /// Corrected, lowercased text with original separators preserved
    pub text: String,

    /// Word tokens of `text`, in order
    pub tokens: Vec<String>,

    /// Replacements applied, for diagnostics
    pub substitutions: Vec<Substitution>,
}

impl NormalizedQuery {
    /// Tokens joined by single spaces (punctuation dropped)
    #[must_use]
    pub fn token_text(&self) -> String {
        self.tokens.join(" ")
    }

    /// Whether any correction was applied
    #[must_use]
    pub fn was_corrected(&self) -> bool {
        !self.substitutions.is_empty()
    }
}

/// Fixed set of domain terms with known mis-transcriptions
///
/// Serialized as a JSON object mapping each term to its aliases:
/// `{"espresso": ["expresso"], "latte": ["lattay"]}`
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    terms: Vec<String>,
    aliases: BTreeMap<String, String>,
}

impl Lexicon {
    /// Build a lexicon from `(term, aliases)` pairs
    ///
    /// # Errors
    ///
    /// Returns error if a term is not a single word, or an alias collides
    /// with a term or with another term's alias
    pub fn new<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut terms: Vec<String> = Vec::new();
        let mut raw_aliases: Vec<(String, String)> = Vec::new();

        for (term, aliases) in entries {
            let term = term.as_ref().trim().to_lowercase();
            if term.is_empty() || !term.chars().all(char::is_alphabetic) {
                return Err(Error::Lexicon(format!(
                    "lexicon term must be a single word: {term:?}"
                )));
            }
            for alias in aliases {
                raw_aliases.push((alias.as_ref().trim().to_lowercase(), term.clone()));
            }
            terms.push(term);
        }

        terms.sort();
        terms.dedup();

        let mut aliases = BTreeMap::new();
        for (alias, term) in raw_aliases {
            if alias.is_empty() || alias == term {
                continue;
            }
            if terms.binary_search(&alias).is_ok() {
                return Err(Error::Lexicon(format!(
                    "alias {alias:?} for {term:?} is itself a lexicon term"
                )));
            }
            if let Some(existing) = aliases.insert(alias.clone(), term.clone()) {
                if existing != term {
                    return Err(Error::Lexicon(format!(
                        "alias {alias:?} maps to both {existing:?} and {term:?}"
                    )));
                }
            }
        }

        Ok(Self { terms, aliases })
    }

    /// Parse the JSON pronunciation dictionary format
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or fails validation
    pub fn from_json(json: &str) -> Result<Self> {
        let map: BTreeMap<String, Vec<String>> = serde_json::from_str(json)?;
        Self::new(map)
    }

    /// All terms, sorted
    #[must_use]
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Number of terms
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the lexicon has no terms
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn alias_for(&self, token: &str) -> Option<&str> {
        self.aliases.get(token).map(String::as_str)
    }
}

/// Edit budget as a function of token length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionPolicy {
    /// Tokens at least this long may be corrected with one edit
    pub one_edit_min_len: usize,

    /// Tokens at least this long may be corrected with two edits
    pub two_edit_min_len: usize,
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            one_edit_min_len: 5,
            two_edit_min_len: 9,
        }
    }
}

impl CorrectionPolicy {
    /// Maximum edit distance allowed for a token of `len` characters
    #[must_use]
    pub const fn max_distance(&self, len: usize) -> usize {
        if len >= self.two_edit_min_len {
            2
        } else if len >= self.one_edit_min_len {
            1
        } else {
            0
        }
    }
}

/// Corrects domain-vocabulary mis-transcriptions
#[derive(Debug, Clone)]
pub struct Normalizer {
    lexicon: Lexicon,
    policy: CorrectionPolicy,
}

impl Normalizer {
    /// Create a normalizer over a lexicon
    #[must_use]
    pub const fn new(lexicon: Lexicon, policy: CorrectionPolicy) -> Self {
        Self { lexicon, policy }
    }

    /// The lexicon in use
    #[must_use]
    pub const fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Normalize raw utterance text
    ///
    /// Pure and idempotent: normalizing the output again yields the same text.
    #[must_use]
    pub fn normalize(&self, text: &str) -> NormalizedQuery {
        let lower = text.trim().to_lowercase();
        let mut out = String::with_capacity(lower.len());
        let mut tokens = Vec::new();
        let mut substitutions = Vec::new();
        let mut last = 0;

        for m in TOKEN_RE.find_iter(&lower) {
            out.push_str(&lower[last..m.start()]);
            last = m.end();

            let token = m.as_str();
            let replacement = self.correct(token);
            match replacement {
                Some(term) => {
                    tracing::trace!(original = token, corrected = term, "token corrected");
                    substitutions.push(Substitution {
                        original: token.to_string(),
                        corrected: term.to_string(),
                    });
                    out.push_str(term);
                    tokens.push(term.to_string());
                }
                None => {
                    out.push_str(token);
                    tokens.push(token.to_string());
                }
            }
        }
        out.push_str(&lower[last..]);

        if !substitutions.is_empty() {
            tracing::debug!(
                original = %lower,
                normalized = %out,
                corrections = substitutions.len(),
                "query normalized"
            );
        }

        NormalizedQuery {
            text: out,
            tokens,
            substitutions,
        }
    }

    /// Lexicon term a token should become, if any
    fn correct(&self, token: &str) -> Option<&str> {
        if !token.chars().all(char::is_alphabetic) {
            return None;
        }

        if let Some(term) = self.lexicon.alias_for(token) {
            return Some(term);
        }

        let max = self.policy.max_distance(token.chars().count());
        let mut best: Option<(&str, usize)> = None;
        let mut ambiguous = false;

        for term in &self.lexicon.terms {
            let distance = levenshtein(token, term);
            if distance > max {
                continue;
            }
            match best {
                Some((_, d)) if distance > d => {}
                Some((_, d)) if distance == d => ambiguous = true,
                _ => {
                    best = Some((term, distance));
                    ambiguous = false;
                }
            }
        }

        match best {
            // Exact hit: already a term
            Some((_, 0)) => None,
            Some((term, _)) if !ambiguous => Some(term),
            _ => None,
        }
    }
}

/// Lowercased word tokens of `text`
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Levenshtein distance over characters
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> Lexicon {
        Lexicon::new(vec![
            ("espresso", vec!["expresso"]),
            ("latte", vec!["lattay", "lahtay"]),
            ("cappuccino", vec![]),
            ("macchiato", vec![]),
            ("americano", vec![]),
            ("mocha", vec![]),
        ])
        .unwrap()
    }

    fn normalizer() -> Normalizer {
        Normalizer::new(lexicon(), CorrectionPolicy::default())
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("expresso", "espresso"), 1);
        assert_eq!(levenshtein("capuccino", "cappuccino"), 1);
    }

    #[test]
    fn test_alias_correction() {
        let q = normalizer().normalize("one lattay please");
        assert_eq!(q.text, "one latte please");
        assert_eq!(
            q.substitutions,
            vec![Substitution {
                original: "lattay".to_string(),
                corrected: "latte".to_string()
            }]
        );
    }

    #[test]
    fn test_edit_distance_correction() {
        let n = normalizer();
        assert_eq!(n.normalize("machiato").text, "macchiato");
        assert_eq!(n.normalize("capuccino recipe").text, "cappuccino recipe");
        assert_eq!(n.normalize("how do i make a expresso").text, "how do i make a espresso");
    }

    #[test]
    fn test_short_tokens_untouched() {
        // "moca" is one edit from "mocha" but too short to correct
        let q = normalizer().normalize("moca");
        assert_eq!(q.text, "moca");
        assert!(!q.was_corrected());
    }

    #[test]
    fn test_preserves_punctuation_and_lowercases() {
        let q = normalizer().normalize("How do I make an Expresso?");
        assert_eq!(q.text, "how do i make an espresso?");
        assert_eq!(q.tokens, vec!["how", "do", "i", "make", "an", "espresso"]);
        assert_eq!(q.token_text(), "how do i make an espresso");
    }

    #[test]
    fn test_ambiguous_candidates_left_alone() {
        let lexicon = Lexicon::new(vec![("brewer", vec![]), ("brewed", vec![])]).unwrap();
        let n = Normalizer::new(lexicon, CorrectionPolicy::default());
        // "brewex" is one edit from both terms
        assert_eq!(n.normalize("brewex").text, "brewex");
    }

    #[test]
    fn test_non_alphabetic_tokens_untouched() {
        let q = normalizer().normalize("latte2 at 93c");
        assert_eq!(q.text, "latte2 at 93c");
    }

    #[test]
    fn test_idempotent() {
        let n = normalizer();
        for input in [
            "how do i make a expresso",
            "Capuccino or MACHIATO?",
            "lattay, lahtay and americano",
            "what is the capital of france",
            "",
            "   ",
            "it's a mocah",
        ] {
            let once = n.normalize(input);
            let twice = n.normalize(&once.text);
            assert_eq!(once.text, twice.text, "not idempotent for {input:?}");
            assert!(!twice.was_corrected());
        }
    }

    #[test]
    fn test_lexicon_rejects_alias_colliding_with_term() {
        let result = Lexicon::new(vec![("latte", vec!["mocha"]), ("mocha", vec![])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lexicon_rejects_conflicting_alias() {
        let result = Lexicon::new(vec![("latte", vec!["lat"]), ("flat", vec!["lat"])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lexicon_rejects_multi_word_term() {
        let result = Lexicon::new(vec![("cold brew", Vec::<&str>::new())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lexicon_from_json() {
        let lexicon = Lexicon::from_json(r#"{"Espresso": ["expresso"], "latte": []}"#).unwrap();
        assert_eq!(lexicon.terms(), &["espresso".to_string(), "latte".to_string()]);
        assert_eq!(lexicon.len(), 2);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("What's the best Grind, for 2 cups?"),
            vec!["what's", "the", "best", "grind", "for", "2", "cups"]
        );
    }

    #[test]
    fn test_utterance_confidence() {
        let u = Utterance::new("latte").with_confidence(0.9);
        assert_eq!(u.confidence, Some(0.9));
        assert_eq!(u.text, "latte");
    }
}
