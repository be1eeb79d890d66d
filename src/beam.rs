//! Beam Search Decoding
//!
//! Keeps the `beam_width` best partial captions and extends them one token at
//! a time.
//!
//! ## Algorithm
//!
//! ```text
//! beam = [(0.0, [SOS], initial_state)]
//! repeat max_len times (or until every hypothesis ended with EOS):
//!     for each hypothesis, in order:
//!         ended with EOS  → carried over unchanged
//!         otherwise       → decode one step, take the top beam_width tokens
//!                           of log_softmax(logits), one child per token
//!     stable sort all candidates by score (descending), keep beam_width
//! return tokens of beam[0]
//! ```
//!
//! The score is the cumulative log-probability divided by
//! `max(1, generated)^length_penalty`, where `generated` excludes `<SOS>`.
//! With the default penalty of 0 it is the raw log-probability, which favours
//! short captions.
//!
//! All live hypotheses are decoded in a single batched call against the same
//! source video; each row depends only on its own token and state, so the
//! result is the same as decoding them one at a time.
//!
//! ## Example
//!
//! ```rust
//! use vidcap::beam::{beam_search, BeamConfig, StepDecoder};
//! use vidcap::vocab::{EOS, SOS};
//! use vidcap::Tensor;
//!
//! /// Always prefers `<EOS>`.
//! struct Stop;
//!
//! impl StepDecoder for Stop {
//!     type State = ();
//!     fn vocab_size(&self) -> usize { 5 }
//!     fn step(&mut self, tokens: &[usize], _: &[&()]) -> (Tensor, Vec<()>) {
//!         let mut logits = Tensor::zeros(vec![tokens.len(), 5]);
//!         for row in 0..tokens.len() {
//!             logits.data[row * 5 + EOS] = 10.0;
//!         }
//!         (logits, vec![(); tokens.len()])
//!     }
//! }
//!
//! let tokens = beam_search(&mut Stop, (), &BeamConfig::default());
//! assert_eq!(tokens, vec![SOS, EOS]);
//! ```

use crate::context::ExecutionContext;
use crate::decoder::TrainableDecoder;
use crate::encoder::EncoderOutput;
use crate::layers::lstm::LstmState;
use crate::tensor::Tensor;
use crate::vocab::{EOS, SOS};

/// A step function the search can drive
///
/// Every row of `tokens` / `states` is one hypothesis over the same source.
/// Returns logits `[rows, vocab]` and one new state per row.
pub trait StepDecoder {
    type State: Clone;

    fn vocab_size(&self) -> usize;

    fn step(&mut self, tokens: &[usize], states: &[&Self::State]) -> (Tensor, Vec<Self::State>);
}

/// Search settings
#[derive(Clone, Debug, PartialEq)]
pub struct BeamConfig {
    pub beam_width: usize,
    pub max_len: usize,
    pub length_penalty: f32,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 3,
            max_len: 28,
            length_penalty: 0.0,
        }
    }
}

/// One partial caption
#[derive(Clone, Debug)]
pub struct Hypothesis<S> {
    pub log_prob: f32,
    pub tokens: Vec<usize>,
    pub state: S,
}

impl<S> Hypothesis<S> {
    pub fn is_finished(&self) -> bool {
        self.tokens.last() == Some(&EOS)
    }

    /// Ranking score under a length penalty exponent
    pub fn score(&self, length_penalty: f32) -> f32 {
        if length_penalty == 0.0 {
            return self.log_prob;
        }
        let generated = self.tokens.len().saturating_sub(1).max(1) as f32;
        self.log_prob / generated.powf(length_penalty)
    }
}

/// Indices of the `k` largest values, largest first, lower index first on ties
fn top_k(row: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).collect();
    idx.sort_by(|&a, &b| row[b].total_cmp(&row[a]).then(a.cmp(&b)));
    idx.truncate(k);
    idx
}

/// Run beam search from `initial` and return the best token sequence
///
/// The sequence starts with `<SOS>` and holds at most `max_len + 1` tokens.
pub fn beam_search<D: StepDecoder>(decoder: &mut D, initial: D::State, config: &BeamConfig) -> Vec<usize> {
    let width = config.beam_width.clamp(1, decoder.vocab_size().max(1));
    let mut beam = vec![Hypothesis {
        log_prob: 0.0,
        tokens: vec![SOS],
        state: initial,
    }];

    for _ in 0..config.max_len {
        if beam.iter().all(Hypothesis::is_finished) {
            break;
        }

        let live: Vec<&Hypothesis<D::State>> = beam.iter().filter(|h| !h.is_finished()).collect();
        let tokens: Vec<usize> = live.iter().map(|h| h.tokens[h.tokens.len() - 1]).collect();
        let states: Vec<&D::State> = live.iter().map(|h| &h.state).collect();
        let (logits, new_states) = decoder.step(&tokens, &states);
        let log_probs = logits.log_softmax_rows();
        let vocab = log_probs.cols();

        let mut candidates = Vec::with_capacity(beam.len() * width);
        let mut row = 0;
        for hyp in beam {
            if hyp.is_finished() {
                candidates.push(hyp);
                continue;
            }
            let lp = &log_probs.data[row * vocab..(row + 1) * vocab];
            for token in top_k(lp, width) {
                let mut tokens = hyp.tokens.clone();
                tokens.push(token);
                candidates.push(Hypothesis {
                    log_prob: hyp.log_prob + lp[token],
                    tokens,
                    state: new_states[row].clone(),
                });
            }
            row += 1;
        }

        // Vec::sort_by is stable: equal scores keep production order.
        candidates.sort_by(|a, b| {
            b.score(config.length_penalty)
                .total_cmp(&a.score(config.length_penalty))
        });
        candidates.truncate(width);
        beam = candidates;
    }

    beam.swap_remove(0).tokens
}

/// Pick the most likely token at every step until `<EOS>` or `max_len` steps
pub fn greedy_decode<D: StepDecoder>(decoder: &mut D, initial: D::State, max_len: usize) -> Vec<usize> {
    let mut tokens = vec![SOS];
    let mut state = initial;
    for _ in 0..max_len {
        if tokens.last() == Some(&EOS) {
            break;
        }
        let (logits, mut next) = decoder.step(&tokens[tokens.len() - 1..], &[&state]);
        tokens.push(logits.log_softmax_rows().argmax_rows()[0]);
        state = next.swap_remove(0);
    }
    tokens
}

/// A trained decoder bound to one encoded video
pub struct DecoderSession<'a> {
    decoder: &'a TrainableDecoder,
    source: EncoderOutput,
    ctx: &'a mut ExecutionContext,
}

impl<'a> DecoderSession<'a> {
    /// # Panics
    ///
    /// Panics unless `source` holds exactly one video (see [`EncoderOutput::source`]).
    pub fn new(decoder: &'a TrainableDecoder, source: EncoderOutput, ctx: &'a mut ExecutionContext) -> Self {
        assert_eq!(
            source.batch_size(),
            1,
            "a decoding session needs a single source, got a batch of {}",
            source.batch_size()
        );
        Self { decoder, source, ctx }
    }

    /// The encoder's final state, which seeds the search
    pub fn initial_state(&self) -> LstmState {
        self.source.state.clone()
    }
}

impl StepDecoder for DecoderSession<'_> {
    type State = LstmState;

    fn vocab_size(&self) -> usize {
        self.decoder.vocab_size()
    }

    fn step(&mut self, tokens: &[usize], states: &[&LstmState]) -> (Tensor, Vec<LstmState>) {
        let batched = LstmState::stack(states);
        let (logits, next, _) = self
            .decoder
            .step(tokens, &batched, &self.source.outputs, self.ctx);
        (logits, next.split())
    }
}

/// Beam search over one encoded video
pub fn caption_source(
    decoder: &TrainableDecoder,
    source: EncoderOutput,
    config: &BeamConfig,
    ctx: &mut ExecutionContext,
) -> Vec<usize> {
    let mut session = DecoderSession::new(decoder, source, ctx);
    let initial = session.initial_state();
    beam_search(&mut session, initial, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::TrainableEncoder;
    use crate::layers::linear::random_init;

    /// Emits fixed log-probability tables chosen by the previous token.
    struct Scripted {
        vocab: usize,
        table: fn(usize) -> Vec<f32>,
        calls: usize,
    }

    impl StepDecoder for Scripted {
        type State = usize;

        fn vocab_size(&self) -> usize {
            self.vocab
        }

        fn step(&mut self, tokens: &[usize], states: &[&usize]) -> (Tensor, Vec<usize>) {
            self.calls += 1;
            let mut data = Vec::new();
            for &t in tokens {
                data.extend((self.table)(t).iter().map(|p| p.ln()));
            }
            let next = states.iter().map(|&&s| s + 1).collect();
            (Tensor::new(data, vec![tokens.len(), self.vocab]), next)
        }
    }

    fn session_fixture() -> (TrainableEncoder, TrainableDecoder, Tensor) {
        let encoder = TrainableEncoder::new(4, 6, 1, 0.0, 3);
        let decoder = TrainableDecoder::new(9, 5, 6, 1, 0.0, 4);
        let features = Tensor::new(random_init(2 * 3 * 4, 5, 1.0), vec![2, 3, 4]);
        (encoder, decoder, features)
    }

    #[test]
    fn test_immediate_eos_gives_sos_eos() {
        // After SOS, EOS has probability 0.9.
        let mut dec = Scripted {
            vocab: 5,
            table: |_| vec![0.01, 0.01, 0.9, 0.04, 0.04],
            calls: 0,
        };
        let tokens = beam_search(&mut dec, 0, &BeamConfig::default());
        assert_eq!(tokens, vec![SOS, EOS]);
    }

    #[test]
    fn test_width_one_immediate_eos() {
        let mut dec = Scripted {
            vocab: 5,
            table: |_| vec![0.01, 0.01, 0.9, 0.04, 0.04],
            calls: 0,
        };
        let config = BeamConfig { beam_width: 1, max_len: 28, length_penalty: 0.0 };
        assert_eq!(beam_search(&mut dec, 0, &config), vec![SOS, EOS]);
        assert_eq!(dec.calls, 1);
    }

    #[test]
    fn test_eos_biased_decoder_stops_at_once() {
        let (encoder, mut decoder, features) = session_fixture();
        if let Some(bias) = decoder.fc_out.bias.as_mut() {
            bias.data[EOS] = 100.0;
        }
        let mut ctx = ExecutionContext::new(0);
        let (encoded, _) = encoder.forward(&features, &mut ctx);

        for beam_width in [1, 3] {
            let config = BeamConfig { beam_width, max_len: 28, length_penalty: 0.0 };
            let tokens = caption_source(&decoder, encoded.source(0), &config, &mut ctx);
            assert_eq!(tokens, vec![SOS, EOS], "beam width {}", beam_width);
        }
    }

    #[test]
    fn test_stops_early_once_all_finished() {
        let mut dec = Scripted {
            vocab: 3,
            table: |_| vec![0.05, 0.05, 0.9],
            calls: 0,
        };
        let tokens = beam_search(&mut dec, 0, &BeamConfig { beam_width: 3, max_len: 28, length_penalty: 0.0 });
        assert_eq!(tokens, vec![SOS, EOS]);
        // Step 1 expands SOS; step 2 decodes the two live children; then all end.
        assert!(dec.calls <= 3, "made {} calls", dec.calls);
    }

    #[test]
    fn test_beam_finds_better_two_step_path() {
        // Greedy takes token 3 (0.5) and then faces a flat distribution;
        // token 4 (0.4) leads to a near-certain EOS.
        fn table(prev: usize) -> Vec<f32> {
            match prev {
                SOS => vec![0.02, 0.02, 0.06, 0.5, 0.4],
                3 => vec![0.2, 0.2, 0.2, 0.2, 0.2],
                4 => vec![0.01, 0.01, 0.96, 0.01, 0.01],
                _ => vec![0.01, 0.01, 0.96, 0.01, 0.01],
            }
        }
        let config = BeamConfig { beam_width: 2, max_len: 2, length_penalty: 0.0 };
        let beam = beam_search(&mut Scripted { vocab: 5, table, calls: 0 }, 0, &config);
        assert_eq!(beam, vec![SOS, 4, EOS]);

        let greedy = greedy_decode(&mut Scripted { vocab: 5, table, calls: 0 }, 0, 2);
        assert_eq!(greedy[1], 3);
    }

    #[test]
    fn test_length_bounded_by_max_len() {
        // EOS is never likely.
        let mut dec = Scripted {
            vocab: 6,
            table: |_| vec![0.1, 0.1, 0.001, 0.3, 0.25, 0.249],
            calls: 0,
        };
        for max_len in [0, 1, 5] {
            let config = BeamConfig { beam_width: 3, max_len, length_penalty: 0.0 };
            let tokens = beam_search(&mut dec, 0, &config);
            assert_eq!(tokens.len(), max_len + 1);
            assert_eq!(tokens[0], SOS);
        }
    }

    #[test]
    fn test_length_penalty_prefers_longer_caption() {
        // SOS -> EOS (0.3) or 3 (0.7); after 3, EOS with 0.4.
        // Raw: ln 0.3 = -1.20 beats ln 0.7 + ln 0.4 = -1.27.
        // Penalty 1: -1.20 / 1 loses to -1.27 / 2.
        fn table(prev: usize) -> Vec<f32> {
            match prev {
                SOS => vec![0.0, 0.0, 0.3, 0.7, 0.0],
                _ => vec![0.0, 0.0, 0.4, 0.3, 0.3],
            }
        }
        let raw = BeamConfig { beam_width: 2, max_len: 2, length_penalty: 0.0 };
        let normed = BeamConfig { length_penalty: 1.0, ..raw.clone() };
        assert_eq!(beam_search(&mut Scripted { vocab: 5, table, calls: 0 }, 0, &raw), vec![SOS, EOS]);
        assert_eq!(
            beam_search(&mut Scripted { vocab: 5, table, calls: 0 }, 0, &normed),
            vec![SOS, 3, EOS]
        );
    }

    #[test]
    fn test_width_is_clamped_to_vocabulary() {
        let mut dec = Scripted {
            vocab: 4,
            table: |_| vec![0.1, 0.2, 0.01, 0.69],
            calls: 0,
        };
        let config = BeamConfig { beam_width: 50, max_len: 3, length_penalty: 0.0 };
        assert_eq!(beam_search(&mut dec, 0, &config).len(), 4);
        let config = BeamConfig { beam_width: 0, ..config };
        assert_eq!(beam_search(&mut dec, 0, &config), greedy_decode(&mut dec, 0, 3));
    }

    #[test]
    fn test_top_k_tie_break() {
        assert_eq!(top_k(&[0.5, 0.9, 0.9, 0.1], 2), vec![1, 2]);
        assert_eq!(top_k(&[0.0, 0.0, 0.0], 3), vec![0, 1, 2]);
    }

    #[test]
    fn test_width_one_equals_greedy_on_trained_decoder() {
        let (encoder, decoder, features) = session_fixture();
        let mut ctx = ExecutionContext::new(0);
        let (encoded, _) = encoder.forward(&features, &mut ctx);

        for i in 0..2 {
            let config = BeamConfig { beam_width: 1, max_len: 6, length_penalty: 0.0 };
            let beam = caption_source(&decoder, encoded.source(i), &config, &mut ctx);

            let mut session = DecoderSession::new(&decoder, encoded.source(i), &mut ctx);
            let initial = session.initial_state();
            let greedy = greedy_decode(&mut session, initial, 6);
            assert_eq!(beam, greedy);
        }
    }

    #[test]
    fn test_deterministic_in_eval_mode() {
        let (encoder, decoder, features) = session_fixture();
        let mut ctx = ExecutionContext::new(0);
        let (encoded, _) = encoder.forward(&features, &mut ctx);
        let config = BeamConfig { beam_width: 3, max_len: 8, length_penalty: 0.0 };
        let first = caption_source(&decoder, encoded.source(0), &config, &mut ctx);
        let second = caption_source(&decoder, encoded.source(0), &config, &mut ctx);
        assert_eq!(first, second);
        assert!(first.len() <= 9);
    }

    #[test]
    fn test_batched_step_matches_single_rows() {
        let (encoder, decoder, features) = session_fixture();
        let mut ctx = ExecutionContext::new(0);
        let (encoded, _) = encoder.forward(&features, &mut ctx);
        let source = encoded.source(1);

        let mut session = DecoderSession::new(&decoder, source, &mut ctx);
        let s0 = session.initial_state();
        let (_, mut children) = session.step(&[SOS], &[&s0]);
        let s1 = children.remove(0);

        let (batched, batched_states) = session.step(&[4, 7], &[&s0, &s1]);
        let (only_a, a_states) = session.step(&[4], &[&s0]);
        let (only_b, b_states) = session.step(&[7], &[&s1]);

        for (x, y) in batched.row(0).data.iter().zip(&only_a.data) {
            assert!((x - y).abs() < 1e-5);
        }
        for (x, y) in batched.row(1).data.iter().zip(&only_b.data) {
            assert!((x - y).abs() < 1e-5);
        }
        for (x, y) in batched_states[1].c[0].data.iter().zip(&b_states[0].c[0].data) {
            assert!((x - y).abs() < 1e-5);
        }
        assert_eq!(a_states.len(), 1);
    }
}
