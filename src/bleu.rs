//! Caption Scoring
//!
//! Validation quality is measured by a [`CaptionScorer`]. The default,
//! [`Bleu1`], is unigram BLEU against a single reference:
//!
//! ```text
//! precision = Σ_w min(count_cand(w), count_ref(w)) / |cand|
//! BP        = 1                 if c > r
//!             exp(1 - r / c)    otherwise
//! score     = precision × BP
//! ```
//!
//! Words are compared lowercased after splitting on whitespace.
//!
//! ```rust
//! use vidcap::bleu::{Bleu1, CaptionScorer};
//!
//! let score = Bleu1.score("a man is cooking", "a man is cooking");
//! assert!((score - 1.0).abs() < 1e-6);
//! assert_eq!(Bleu1.score("", "a man is cooking"), 0.0);
//! ```

use std::collections::HashMap;

/// Scores a candidate caption against a reference caption
pub trait CaptionScorer {
    fn score(&self, candidate: &str, reference: &str) -> f32;
}

impl<F> CaptionScorer for F
where
    F: Fn(&str, &str) -> f32,
{
    fn score(&self, candidate: &str, reference: &str) -> f32 {
        self(candidate, reference)
    }
}

/// Unigram BLEU with brevity penalty
#[derive(Clone, Copy, Debug, Default)]
pub struct Bleu1;

impl CaptionScorer for Bleu1 {
    fn score(&self, candidate: &str, reference: &str) -> f32 {
        let cand: Vec<String> = candidate.split_whitespace().map(str::to_lowercase).collect();
        let refs: Vec<String> = reference.split_whitespace().map(str::to_lowercase).collect();
        if cand.is_empty() {
            return 0.0;
        }

        let mut ref_counts: HashMap<&str, usize> = HashMap::new();
        for w in &refs {
            *ref_counts.entry(w.as_str()).or_insert(0) += 1;
        }
        let mut cand_counts: HashMap<&str, usize> = HashMap::new();
        for w in &cand {
            *cand_counts.entry(w.as_str()).or_insert(0) += 1;
        }

        let clipped: usize = cand_counts
            .iter()
            .map(|(w, &n)| n.min(ref_counts.get(w).copied().unwrap_or(0)))
            .sum();
        let precision = clipped as f32 / cand.len() as f32;

        precision * brevity_penalty(cand.len(), refs.len())
    }
}

/// Penalty for candidates no longer than the reference
pub fn brevity_penalty(candidate_len: usize, reference_len: usize) -> f32 {
    if candidate_len > reference_len {
        1.0
    } else {
        (1.0 - reference_len as f32 / candidate_len as f32).exp()
    }
}

/// Mean score over `(candidate, reference)` pairs; 0 when there are none
pub fn corpus_score<S: CaptionScorer + ?Sized>(scorer: &S, pairs: &[(String, String)]) -> f32 {
    if pairs.is_empty() {
        return 0.0;
    }
    let total: f32 = pairs.iter().map(|(c, r)| scorer.score(c, r)).sum();
    total / pairs.len() as f32
}
