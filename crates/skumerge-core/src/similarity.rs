//! Title similarity scoring.
//!
//! Scores are on a 0–100 scale. Every metric is symmetric, which keeps the
//! match decision independent of which record of a pair is seen first.

use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::normalize::clean_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Token-set ratio: tolerant of reordering and of one title containing
    /// the other.
    #[default]
    TokenSet,
    /// Ratio of the alphabetically sorted tokens.
    TokenSort,
    /// Plain normalized Levenshtein ratio of the cleaned titles.
    Levenshtein,
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "token_set" | "token-set" => Ok(Self::TokenSet),
            "token_sort" | "token-sort" => Ok(Self::TokenSort),
            "levenshtein" => Ok(Self::Levenshtein),
            other => Err(format!("unknown similarity metric: {other}")),
        }
    }
}

/// A title cleaned and tokenized once, compared many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedTitle {
    cleaned: String,
    /// Sorted, with duplicates.
    sorted_tokens: Vec<String>,
    /// Sorted, unique.
    token_set: Vec<String>,
}

impl PreparedTitle {
    pub fn new(raw: &str) -> Self {
        let cleaned = clean_text(raw);
        let mut sorted_tokens: Vec<String> =
            cleaned.split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect();
        sorted_tokens.sort();
        let mut token_set = sorted_tokens.clone();
        token_set.dedup();
        Self {
            cleaned,
            sorted_tokens,
            token_set,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty()
    }
}

/// Threshold decision over a chosen metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScorer {
    pub metric: SimilarityMetric,
    pub threshold: f64,
}

impl SimilarityScorer {
    pub fn new(metric: SimilarityMetric, threshold: f64) -> Self {
        Self {
            metric,
            threshold: threshold.clamp(0.0, 100.0),
        }
    }

    pub fn score(&self, a: &PreparedTitle, b: &PreparedTitle) -> f64 {
        score_prepared(a, b, self.metric)
    }

    pub fn is_match(&self, a: &PreparedTitle, b: &PreparedTitle) -> bool {
        // Empty titles never match, even at threshold 0.
        !a.is_empty() && !b.is_empty() && self.score(a, b) >= self.threshold
    }
}

/// Similarity of two raw titles in [0, 100].
pub fn similarity_score(a: &str, b: &str, metric: SimilarityMetric) -> f64 {
    score_prepared(&PreparedTitle::new(a), &PreparedTitle::new(b), metric)
}

/// `true` iff the token-set score of the two titles reaches `threshold`.
pub fn are_similar(a: &str, b: &str, threshold: f64) -> bool {
    SimilarityScorer::new(SimilarityMetric::TokenSet, threshold)
        .is_match(&PreparedTitle::new(a), &PreparedTitle::new(b))
}

fn score_prepared(a: &PreparedTitle, b: &PreparedTitle, metric: SimilarityMetric) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.cleaned == b.cleaned {
        return 100.0;
    }
    match metric {
        SimilarityMetric::TokenSet => token_set_ratio(&a.token_set, &b.token_set),
        SimilarityMetric::TokenSort => ratio(&a.sorted_tokens.join(" "), &b.sorted_tokens.join(" ")),
        SimilarityMetric::Levenshtein => ratio(&a.cleaned, &b.cleaned),
    }
}

fn ratio(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b) * 100.0
}

/// Both inputs must be sorted and unique.
fn token_set_ratio(a: &[String], b: &[String]) -> f64 {
    let (sect, diff_ab, diff_ba) = split_sorted(a, b);

    if !sect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let sect = sect.join(" ");
    let combined_ab = join_nonempty(&sect, &diff_ab.join(" "));
    let combined_ba = join_nonempty(&sect, &diff_ba.join(" "));

    let mut best = ratio(&combined_ab, &combined_ba);
    if !sect.is_empty() {
        best = best
            .max(ratio(&sect, &combined_ab))
            .max(ratio(&sect, &combined_ba));
    }
    best
}

fn split_sorted<'a>(a: &'a [String], b: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>, Vec<&'a str>) {
    let mut sect = Vec::new();
    let mut only_a = Vec::new();
    let mut only_b = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Equal => {
                sect.push(a[i].as_str());
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                only_a.push(a[i].as_str());
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                only_b.push(b[j].as_str());
                j += 1;
            }
        }
    }
    only_a.extend(a[i..].iter().map(String::as_str));
    only_b.extend(b[j..].iter().map(String::as_str));
    (sect, only_a, only_b)
}

fn join_nonempty(head: &str, tail: &str) -> String {
    match (head.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => head.to_string(),
        _ => format!("{head} {tail}"),
    }
}
