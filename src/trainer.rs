//! Training Loop
//!
//! ## One Batch
//!
//! ```text
//! encoder(features) ──► outputs, (h, c)
//! input = <SOS> for every row
//! for t in 1..L:
//!     logits, (h, c) = decoder(input, (h, c), outputs)
//!     loss += cross_entropy(logits, captions[:, t])
//!     input = captions[:, t]   with probability teacher_forcing_ratio
//!             argmax(logits)   otherwise
//! backward through every step in reverse, then through the encoder
//! Adam update
//! ```
//!
//! The teacher forcing draw happens once per timestep and applies to the
//! whole batch.
//!
//! ## One Epoch
//!
//! Shuffle, train every batch, then switch to evaluation mode and score beam
//! search captions against the references. The model is saved only when the
//! score strictly beats the best so far, which starts at 0.

use crate::beam::BeamConfig;
use crate::bleu::{corpus_score, Bleu1, CaptionScorer};
use crate::checkpoint::{save_best, CheckpointMetadata};
use crate::collate::{collate, Batch, Example};
use crate::config::TrainConfig;
use crate::context::ExecutionContext;
use crate::dataset::CaptionDataset;
use crate::decoder::{DecoderGradients, DecoderStepCache};
use crate::error::{CaptionError, Result};
use crate::gradients::{clip_gradients, compute_grad_norm};
use crate::layers::lstm::LstmState;
use crate::loss::cross_entropy;
use crate::model::{Seq2Seq, Seq2SeqGradients};
use crate::optimizer::Adam;
use crate::tensor::Tensor;
use crate::training_logger::TrainingLogger;
use crate::vocab::{Vocabulary, SOS};
use std::fs;
use std::path::Path;

/// Validation result for one epoch
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// Mean scorer value over the split
    pub score: f32,
    /// Caption produced for the first example
    pub sample: Option<String>,
}

/// Outcome of [`Trainer::fit`]
#[derive(Clone, Debug)]
pub struct TrainSummary {
    pub epochs: usize,
    pub final_loss: f32,
    pub best_score: f32,
    /// Epoch of the last saved checkpoint, if any
    pub best_epoch: Option<usize>,
}

/// Owns the model, its vocabulary and the optimizer state
pub struct Trainer {
    pub model: Seq2Seq,
    pub vocab: Vocabulary,
    config: TrainConfig,
    optimizer: Adam,
    scorer: Box<dyn CaptionScorer>,
    best_score: f32,
    best_epoch: Option<usize>,
}

impl Trainer {
    /// Trainer scoring with [`Bleu1`]
    pub fn new(model: Seq2Seq, vocab: Vocabulary, config: TrainConfig) -> Self {
        let optimizer = Adam::new(&model.parameters());
        Self {
            model,
            vocab,
            config,
            optimizer,
            scorer: Box::new(Bleu1),
            best_score: 0.0,
            best_epoch: None,
        }
    }

    /// Replace the validation scorer
    pub fn with_scorer<S: CaptionScorer + 'static>(mut self, scorer: S) -> Self {
        self.scorer = Box::new(scorer);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn best_score(&self) -> f32 {
        self.best_score
    }

    /// Train for the configured number of epochs, validating after each
    pub fn fit(
        &mut self,
        train: &CaptionDataset,
        validation: &CaptionDataset,
        ctx: &mut ExecutionContext,
    ) -> Result<TrainSummary> {
        self.config.validate()?;
        if train.is_empty() {
            return Err(CaptionError::InvalidConfig("training set is empty".into()));
        }
        let mut logger = match &self.config.log_file {
            Some(path) => Some(TrainingLogger::new(path)?),
            None => None,
        };

        tracing::info!(
            "Training {} parameters on {} videos for {} epochs (batch {}, lr {})",
            self.model.num_parameters(),
            train.len(),
            self.config.epochs,
            self.config.batch_size,
            self.config.learning_rate
        );

        let mut final_loss = 0.0;
        for epoch in 1..=self.config.epochs {
            final_loss = self.train_epoch(train, ctx)?;
            let eval = self.evaluate(validation, ctx)?;

            if eval.score > self.best_score {
                self.best_score = eval.score;
                self.best_epoch = Some(epoch);
                tracing::info!("New best score {:.4} at epoch {}", eval.score, epoch);
                save_best(
                    &self.config.checkpoint_dir,
                    &self.model,
                    &self.vocab,
                    &CheckpointMetadata {
                        epoch,
                        score: eval.score,
                    },
                )?;
            }

            match logger.as_mut() {
                Some(logger) => logger.log(
                    epoch,
                    final_loss,
                    eval.score,
                    self.best_score,
                    eval.sample.as_deref(),
                )?,
                None => tracing::info!(
                    "Epoch {} | Loss: {:.4} | Score: {:.4} | Best: {:.4}",
                    epoch,
                    final_loss,
                    eval.score,
                    self.best_score
                ),
            }
        }

        Ok(TrainSummary {
            epochs: self.config.epochs,
            final_loss,
            best_score: self.best_score,
            best_epoch: self.best_epoch,
        })
    }

    /// One shuffled pass over `train`; returns the mean batch loss
    pub fn train_epoch(&mut self, train: &CaptionDataset, ctx: &mut ExecutionContext) -> Result<f32> {
        ctx.train();
        let batches = train.batch_indices(self.config.batch_size, Some(&mut ctx.rng));
        let mut total = 0.0;
        for indices in &batches {
            let examples = indices
                .iter()
                .map(|&i| train.example(i, &self.vocab, self.config.add_boundary_tokens))
                .collect::<Result<Vec<Example>>>()?;
            let refs: Vec<&Example> = examples.iter().collect();
            let batch = collate(&refs)?;
            total += self.train_batch(&batch, ctx);
        }
        Ok(total / batches.len().max(1) as f32)
    }

    /// Forward, backward and one optimizer step; returns the summed loss
    pub fn train_batch(&mut self, batch: &Batch, ctx: &mut ExecutionContext) -> f32 {
        let (loss, mut grads, steps) = forward_backward(
            &self.model,
            batch,
            self.config.teacher_forcing_ratio,
            self.config.mask_padding,
            ctx,
        );
        if steps == 0 {
            return loss;
        }

        let norm = match self.config.grad_clip {
            Some(max_norm) => clip_gradients(grads.tensors_mut(), max_norm),
            None => compute_grad_norm(&grads.tensors()),
        };
        tracing::debug!(
            "batch of {} | steps {} | loss {:.4} | grad norm {:.4}",
            batch.size(),
            steps,
            loss,
            norm
        );

        self.optimizer.step(
            self.model.parameters_mut(),
            &grads.tensors(),
            self.config.learning_rate,
            self.config.weight_decay,
        );
        loss
    }

    /// Beam search every example of `dataset` and average the scores
    ///
    /// Special tokens are removed from both sides. The reference goes through
    /// the vocabulary, so rare words disappear from it as `<UNK>`.
    pub fn evaluate(&self, dataset: &CaptionDataset, ctx: &mut ExecutionContext) -> Result<Evaluation> {
        ctx.eval();
        let beam = self.config.beam();
        let mut pairs = Vec::with_capacity(dataset.len());
        for (i, record) in dataset.records().iter().enumerate() {
            let video = as_single_video(dataset.load_features(i)?);
            let tokens = self.model.caption(&video, &beam, ctx);
            let candidate = self.vocab.caption_text(&tokens);
            let reference = self
                .vocab
                .caption_text(&self.vocab.encode_sentence(record.reference()));
            pairs.push((candidate, reference));
        }

        Ok(Evaluation {
            score: corpus_score(self.scorer.as_ref(), &pairs),
            sample: pairs.into_iter().next().map(|(candidate, _)| candidate),
        })
    }
}

/// `[T, D]` features as a batch of one
fn as_single_video(features: Tensor) -> Tensor {
    let (time, width) = (features.rows(), features.cols());
    features.reshape(&[1, time, width])
}

/// Teacher-forced forward pass and full backward pass for one batch
///
/// Returns the loss summed over decoder steps, gradients for every parameter
/// and the number of decoder steps taken (`L - 1`, or 0 for captions shorter
/// than two tokens).
pub fn forward_backward(
    model: &Seq2Seq,
    batch: &Batch,
    teacher_forcing_ratio: f32,
    mask_padding: bool,
    ctx: &mut ExecutionContext,
) -> (f32, Seq2SeqGradients, usize) {
    let n = batch.size();
    let (encoded, encoder_cache) = model.encoder.forward(&batch.features, ctx);

    let mut state = encoded.state.clone();
    let mut input = vec![SOS; n];
    let mut steps: Vec<(Tensor, DecoderStepCache)> = Vec::new();
    let mut loss = 0.0;
    for t in 1..batch.caption_len() {
        let (logits, next, cache) = model.decoder.step(&input, &state, &encoded.outputs, ctx);
        let targets = batch.tokens_at(t);
        let (step_loss, d_logits) = cross_entropy(&logits, &targets, mask_padding);
        loss += step_loss;

        input = if ctx.coin(teacher_forcing_ratio) {
            targets
        } else {
            logits.argmax_rows()
        };
        steps.push((d_logits, cache));
        state = next;
    }

    let mut decoder_grads = DecoderGradients::zeros_like(&model.decoder);
    let mut d_state = LstmState::zeros(model.config.num_layers, n, model.config.hidden_size);
    let mut d_outputs = Tensor::zeros(encoded.outputs.shape.clone());
    for (d_logits, cache) in steps.iter().rev() {
        let (d_prev, d_enc) = model
            .decoder
            .backward_step(d_logits, &d_state, cache, &mut decoder_grads);
        d_outputs.add_assign(&d_enc);
        d_state = d_prev;
    }
    let encoder_grads = model.encoder.backward(&d_outputs, &d_state, &encoder_cache);

    let grads = Seq2SeqGradients {
        encoder: encoder_grads,
        decoder: decoder_grads,
    };
    (loss, grads, steps.len())
}

/// Beam search a caption for every example and write `id,caption` lines
///
/// Lines follow dataset order. Nothing is written unless every example
/// decodes. Returns the number of lines written.
pub fn write_captions<P: AsRef<Path>>(
    model: &Seq2Seq,
    vocab: &Vocabulary,
    dataset: &CaptionDataset,
    beam: &BeamConfig,
    output: P,
    ctx: &mut ExecutionContext,
) -> Result<usize> {
    ctx.eval();
    let mut text = String::new();
    for i in 0..dataset.len() {
        let video = as_single_video(dataset.load_features(i)?);
        let tokens = model.caption(&video, beam, ctx);
        text.push_str(dataset.video_id(i));
        text.push(',');
        text.push_str(&vocab.caption_text(&tokens));
        text.push('\n');
    }

    let output = output.as_ref();
    fs::write(output, text).map_err(|e| CaptionError::io(output, e))?;
    tracing::info!("Wrote {} captions to {}", dataset.len(), output.display());
    Ok(dataset.len())
}
