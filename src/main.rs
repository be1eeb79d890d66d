//! Train a video captioning model and caption the test videos
//!
//! ## Usage
//!
//! ```bash
//! # Train on the training split, then caption the testing split
//! cargo run --release -- --data-dir MLDS_hw2_1_data --output captions.txt
//!
//! # Smaller, faster run with a CSV log
//! cargo run --release -- --data-dir MLDS_hw2_1_data --output captions.txt \
//!     --epochs 20 --hidden-size 256 --log-file training_log.csv
//!
//! # Skip training and caption with the saved best model
//! cargo run --release -- --data-dir MLDS_hw2_1_data --output captions.txt --eval-only
//! ```
//!
//! The data directory must contain `training_label.json`, `training_data/feat/`,
//! `testing_label.json` and `testing_data/feat/`. Set `RUST_LOG=debug` for
//! per-batch detail.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vidcap::checkpoint::load_best;
use vidcap::config::ValidationSplit;
use vidcap::dataset::CaptionDataset;
use vidcap::trainer::{write_captions, Trainer};
use vidcap::{ExecutionContext, ModelConfig, Seq2Seq, TrainConfig, Vocabulary};

#[derive(Parser)]
#[command(
    name = "vidcap",
    about = "Sequence-to-sequence video captioning with attention and beam search"
)]
struct Args {
    // Data
    /// Directory holding the training and testing splits
    #[arg(long)]
    data_dir: PathBuf,

    /// Where to write `video_id,caption` lines for the testing split
    #[arg(long)]
    output: PathBuf,

    // Model architecture
    /// Width of each per-frame feature vector
    #[arg(long, default_value = "4096")]
    input_size: usize,

    /// LSTM hidden width (encoder and decoder)
    #[arg(long, default_value = "512")]
    hidden_size: usize,

    /// Word embedding width
    #[arg(long, default_value = "300")]
    embedding_dim: usize,

    /// Stacked LSTM layers
    #[arg(long, default_value = "1")]
    num_layers: usize,

    /// Dropout between stacked layers
    #[arg(long, default_value = "0.3")]
    dropout: f32,

    // Training
    /// Passes over the training set
    #[arg(long, default_value = "200")]
    epochs: usize,

    #[arg(long, default_value = "32")]
    batch_size: usize,

    #[arg(long, default_value = "0.001")]
    learning_rate: f32,

    /// Probability of feeding the ground-truth word at each step
    #[arg(long, default_value = "0.5")]
    teacher_forcing_ratio: f32,

    /// Words seen fewer times become <UNK>
    #[arg(long, default_value = "3")]
    min_word_count: usize,

    /// Exclude <PAD> targets from the loss
    #[arg(long)]
    mask_padding: bool,

    /// Wrap training captions in <SOS> ... <EOS>
    #[arg(long)]
    add_boundary_tokens: bool,

    /// Clip the global gradient norm
    #[arg(long)]
    grad_clip: Option<f32>,

    /// Decoupled weight decay on weight matrices
    #[arg(long, default_value = "0.0")]
    weight_decay: f32,

    // Decoding
    #[arg(long, default_value = "3")]
    beam_width: usize,

    /// Maximum generated words
    #[arg(long, default_value = "28")]
    max_len: usize,

    /// Length normalization exponent for beam ranking
    #[arg(long, default_value = "0.0")]
    length_penalty: f32,

    // Bookkeeping
    /// Split scored after every epoch
    #[arg(long, value_enum, default_value = "train")]
    validation: ValidationSplit,

    /// Directory for the best encoder, decoder and vocabulary
    #[arg(long, default_value = "best_model")]
    checkpoint_dir: PathBuf,

    /// Per-epoch CSV metrics
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Worker threads for tensor kernels (0 = all cores)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Load the best checkpoint instead of training
    #[arg(long)]
    eval_only: bool,
}

impl Args {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            teacher_forcing_ratio: self.teacher_forcing_ratio,
            beam_width: self.beam_width,
            max_len: self.max_len,
            min_word_count: self.min_word_count,
            length_penalty: self.length_penalty,
            mask_padding: self.mask_padding,
            add_boundary_tokens: self.add_boundary_tokens,
            grad_clip: self.grad_clip,
            weight_decay: self.weight_decay,
            validation: self.validation,
            checkpoint_dir: self.checkpoint_dir.clone(),
            log_file: self.log_file.clone(),
        }
    }

    fn model_config(&self, vocab_size: usize) -> ModelConfig {
        ModelConfig {
            vocab_size,
            input_size: self.input_size,
            hidden_size: self.hidden_size,
            embedding_dim: self.embedding_dim,
            num_layers: self.num_layers,
            dropout: self.dropout,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.train_config();
    config.validate()?;

    let mut ctx = ExecutionContext::new(args.seed).with_threads(args.threads);
    tracing::info!("Using {} worker threads", ctx.threads());

    let (model, vocab) = if args.eval_only {
        load_best(&config.checkpoint_dir)?
    } else {
        let train = CaptionDataset::open_split(&args.data_dir, "training", args.input_size)?;
        let vocab = Vocabulary::build(train.reference_captions(), config.min_word_count);
        tracing::info!("Vocabulary: {} words", vocab.len());

        let model_config = args.model_config(vocab.len());
        model_config.validate()?;
        let model = Seq2Seq::new(&model_config, ctx.next_seed());

        let validation = match config.validation {
            ValidationSplit::Train => train.clone(),
            ValidationSplit::Test => CaptionDataset::open_split(&args.data_dir, "testing", args.input_size)?,
        };

        let mut trainer = Trainer::new(model, vocab, config.clone());
        let summary = trainer.fit(&train, &validation, &mut ctx)?;
        match summary.best_epoch {
            Some(epoch) => tracing::info!(
                "Best score {:.4} at epoch {}, saved to {}",
                summary.best_score,
                epoch,
                config.checkpoint_dir.display()
            ),
            None => tracing::warn!("Score never rose above 0; no checkpoint was saved"),
        }
        (trainer.model, trainer.vocab)
    };

    let test = CaptionDataset::open_split(&args.data_dir, "testing", model.config.input_size)?;
    let written = write_captions(
        &model,
        &vocab,
        &test,
        &config.beam(),
        &args.output,
        &mut ctx,
    )?;

    println!("Results saved to {} ({} captions)", args.output.display(), written);
    Ok(())
}
