//! Word-Level Caption Vocabulary
//!
//! Maps lower-cased, whitespace-separated words to integer ids and back. The
//! first four ids are reserved:
//!
//! | id | token   | meaning                        |
//! |----|---------|--------------------------------|
//! | 0  | `<PAD>` | right padding inside a batch   |
//! | 1  | `<SOS>` | start of sentence, decoder seed |
//! | 2  | `<EOS>` | end of sentence                |
//! | 3  | `<UNK>` | any word outside the vocabulary |
//!
//! Words that occur at least `min_word_count` times in the training captions
//! get the following ids in order of first occurrence. The vocabulary never
//! changes after it is built.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::Vocabulary;
//!
//! let vocab = Vocabulary::build(["a dog runs", "a cat sleeps"], 1);
//! assert_eq!(vocab.len(), 9);
//! assert_eq!(vocab.encode_sentence("A dog flies"), vec![4, 5, 3]);
//! assert_eq!(vocab.decode_sentence(&[4, 5, 99]), vec!["a", "dog", "<UNK>"]);
//! ```

use crate::error::{CaptionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

pub const PAD: usize = 0;
pub const SOS: usize = 1;
pub const EOS: usize = 2;
pub const UNK: usize = 3;

pub const PAD_TOKEN: &str = "<PAD>";
pub const SOS_TOKEN: &str = "<SOS>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";

const RESERVED: [&str; 4] = [PAD_TOKEN, SOS_TOKEN, EOS_TOKEN, UNK_TOKEN];

/// Closed word vocabulary with reserved special tokens
#[derive(Clone, Debug)]
pub struct Vocabulary {
    words: Vec<String>,
    index: HashMap<String, usize>,
    min_word_count: usize,
}

/// On-disk form: the id-ordered word list is enough to rebuild the index
#[derive(Serialize, Deserialize)]
struct VocabFile {
    min_word_count: usize,
    words: Vec<String>,
}

impl Vocabulary {
    /// Build from training captions
    ///
    /// Counting is done over the whole corpus first, so a word's id reflects
    /// where it first appeared, not when it crossed the threshold.
    pub fn build<I, S>(captions: I, min_word_count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for caption in captions {
            for word in tokenize(caption.as_ref()) {
                let count = counts.entry(word.clone()).or_insert(0);
                if *count == 0 {
                    order.push(word);
                }
                *count += 1;
            }
        }

        let mut words: Vec<String> = RESERVED.iter().map(|s| s.to_string()).collect();
        words.extend(
            order
                .into_iter()
                .filter(|w| counts[w] >= min_word_count && !RESERVED.contains(&w.as_str())),
        );

        tracing::debug!(
            distinct = counts.len(),
            kept = words.len() - RESERVED.len(),
            min_word_count,
            "Built vocabulary"
        );
        Self::from_words(words, min_word_count)
    }

    fn from_words(words: Vec<String>, min_word_count: usize) -> Self {
        let index = words
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i))
            .collect();
        Self {
            words,
            index,
            min_word_count,
        }
    }

    /// Number of ids, reserved tokens included
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Always false: the reserved tokens are present in every vocabulary
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn min_word_count(&self) -> usize {
        self.min_word_count
    }

    pub fn id_of(&self, word: &str) -> Option<usize> {
        self.index.get(word).copied()
    }

    pub fn word_of(&self, id: usize) -> Option<&str> {
        self.words.get(id).map(String::as_str)
    }

    /// Lower-case, split on whitespace, map unknown words to `<UNK>`
    pub fn encode_sentence(&self, text: &str) -> Vec<usize> {
        tokenize(text)
            .map(|w| self.id_of(&w).unwrap_or(UNK))
            .collect()
    }

    /// Map ids back to words; unknown ids become `<UNK>`
    ///
    /// Special tokens are kept. Use [`strip_special`] for display.
    pub fn decode_sentence(&self, ids: &[usize]) -> Vec<String> {
        ids.iter()
            .map(|&id| self.word_of(id).unwrap_or(UNK_TOKEN).to_string())
            .collect()
    }

    /// Decode and join with single spaces, dropping special tokens
    pub fn caption_text(&self, ids: &[usize]) -> String {
        strip_special(&self.decode_sentence(ids)).join(" ")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = VocabFile {
            min_word_count: self.min_word_count,
            words: self.words.clone(),
        };
        let json = serde_json::to_string_pretty(&file).map_err(|e| CaptionError::json(path, e))?;
        fs::write(path, json).map_err(|e| CaptionError::io(path, e))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| CaptionError::io(path, e))?;
        let file: VocabFile = serde_json::from_str(&json).map_err(|e| CaptionError::json(path, e))?;

        let reserved_ok = file.words.len() >= RESERVED.len()
            && file.words.iter().zip(RESERVED).all(|(w, r)| w == r);
        if !reserved_ok {
            return Err(CaptionError::checkpoint(
                path,
                "vocabulary does not start with <PAD> <SOS> <EOS> <UNK>",
            ));
        }
        let mut seen = HashSet::with_capacity(file.words.len());
        if let Some(dup) = file.words.iter().find(|w| !seen.insert(w.as_str())) {
            return Err(CaptionError::checkpoint(
                path,
                format!("word {:?} appears more than once", dup),
            ));
        }
        Ok(Self::from_words(file.words, file.min_word_count))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(str::to_lowercase)
}

/// Drop `<PAD>`, `<SOS>`, `<EOS>` and `<UNK>` from a decoded sentence
pub fn strip_special<S: AsRef<str>>(words: &[S]) -> Vec<&str> {
    words
        .iter()
        .map(|w| w.as_ref())
        .filter(|w| !RESERVED.contains(w))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_caption_corpus() {
        let vocab = Vocabulary::build(["a dog runs", "a cat sleeps"], 1);
        assert_eq!(vocab.len(), 9);
        assert_eq!(vocab.encode_sentence("a dog runs"), vec![4, 5, 6]);
        assert_eq!(vocab.encode_sentence("a cat sleeps"), vec![4, 7, 8]);
    }

    #[test]
    fn test_reserved_ids() {
        let vocab = Vocabulary::build(Vec::<String>::new(), 3);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id_of("<PAD>"), Some(PAD));
        assert_eq!(vocab.id_of("<SOS>"), Some(SOS));
        assert_eq!(vocab.id_of("<EOS>"), Some(EOS));
        assert_eq!(vocab.id_of("<UNK>"), Some(UNK));
    }

    #[test]
    fn test_threshold_keeps_first_occurrence_order() {
        // "cat" reaches the threshold after "dog" but appears first.
        let captions = ["cat dog", "dog dog", "cat cat bird", "dog"];
        let vocab = Vocabulary::build(captions, 3);
        assert_eq!(vocab.len(), 6);
        assert_eq!(vocab.id_of("cat"), Some(4));
        assert_eq!(vocab.id_of("dog"), Some(5));
        assert_eq!(vocab.id_of("bird"), None);
        assert_eq!(vocab.encode_sentence("bird"), vec![UNK]);
    }

    #[test]
    fn test_counting_is_case_insensitive() {
        let vocab = Vocabulary::build(["Dog", "DOG", "dog"], 3);
        assert_eq!(vocab.encode_sentence("dOg"), vec![4]);
    }

    #[test]
    fn test_empty_and_whitespace_input() {
        let vocab = Vocabulary::build(["a b"], 1);
        assert!(vocab.encode_sentence("").is_empty());
        assert!(vocab.encode_sentence("   \t ").is_empty());
        assert_eq!(vocab.encode_sentence("  a\tb  "), vec![4, 5]);
    }

    #[test]
    fn test_decode_keeps_special_tokens() {
        let vocab = Vocabulary::build(["a dog"], 1);
        let words = vocab.decode_sentence(&[SOS, 4, 5, EOS, PAD]);
        assert_eq!(words, vec!["<SOS>", "a", "dog", "<EOS>", "<PAD>"]);
        assert_eq!(strip_special(&words), vec!["a", "dog"]);
        assert_eq!(vocab.caption_text(&[SOS, 4, 77, 5, EOS]), "a dog");
    }

    #[test]
    fn test_roundtrip_of_known_words() {
        let vocab = Vocabulary::build(["the man is playing a guitar"], 1);
        let ids = vocab.encode_sentence("a man is playing");
        assert_eq!(vocab.decode_sentence(&ids).join(" "), "a man is playing");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        let vocab = Vocabulary::build(["a dog runs", "a cat"], 1);
        vocab.save(&path).unwrap();

        let loaded = Vocabulary::load(&path).unwrap();
        assert_eq!(loaded.len(), vocab.len());
        assert_eq!(loaded.encode_sentence("a cat runs"), vocab.encode_sentence("a cat runs"));
        assert_eq!(loaded.min_word_count(), 1);
    }

    #[test]
    fn test_load_rejects_missing_reserved_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        fs::write(&path, r#"{"min_word_count":1,"words":["a","b"]}"#).unwrap();
        assert!(matches!(
            Vocabulary::load(&path),
            Err(CaptionError::InvalidCheckpoint { .. })
        ));
    }

    #[test]
    fn test_load_rejects_duplicate_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        fs::write(
            &path,
            r#"{"min_word_count":1,"words":["<PAD>","<SOS>","<EOS>","<UNK>","dog","cat","dog"]}"#,
        )
        .unwrap();
        let err = Vocabulary::load(&path).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidCheckpoint { ref message, .. } if message.contains("\"dog\"")));
    }
}
