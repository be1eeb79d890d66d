//! Training Logger
//!
//! Writes one CSV row per epoch and mirrors it to the `tracing` log.
//!
//! ## Example
//!
//! ```rust,no_run
//! use vidcap::TrainingLogger;
//!
//! let mut logger = TrainingLogger::new("training_log.csv")?;
//! logger.log(1, 4.21, 0.52, 0.52, Some("a man is playing a guitar"))?;
//! # Ok::<(), vidcap::CaptionError>(())
//! ```
//!
//! ## CSV Format
//!
//! - `epoch`: Epoch number, starting at 1
//! - `elapsed_seconds`: Time since the logger was created
//! - `train_loss`: Mean summed-over-timesteps loss per batch
//! - `val_score`: Mean caption score on the validation split
//! - `best_score`: Best validation score so far
//! - `sample`: A decoded caption from the validation split

use crate::error::{CaptionError, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Per-epoch metrics logger
pub struct TrainingLogger {
    log_file: File,
    path: PathBuf,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write its header
    pub fn new<P: AsRef<Path>>(log_path: P) -> Result<Self> {
        let path = log_path.as_ref().to_path_buf();
        let mut log_file = File::create(&path).map_err(|e| CaptionError::io(&path, e))?;
        writeln!(log_file, "epoch,elapsed_seconds,train_loss,val_score,best_score,sample")
            .map_err(|e| CaptionError::io(&path, e))?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            path,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Record one epoch
    pub fn log(
        &mut self,
        epoch: usize,
        train_loss: f32,
        val_score: f32,
        best_score: f32,
        sample: Option<&str>,
    ) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sample_escaped = sample.map(|s| s.replace('"', "\"\"")).unwrap_or_default();

        writeln!(
            self.log_file,
            "{},{:.2},{:.4},{:.4},{:.4},\"{}\"",
            epoch, elapsed, train_loss, val_score, best_score, sample_escaped
        )
        .and_then(|_| self.log_file.flush())
        .map_err(|e| CaptionError::io(&self.path, e))?;

        let epoch_time = self.last_log_time.elapsed().as_secs_f32();
        tracing::info!(
            "Epoch {:4} | Time: {:7.1}s (+{:.1}s) | Loss: {:.4} | Score: {:.4} | Best: {:.4}",
            epoch,
            elapsed,
            epoch_time,
            train_loss,
            val_score,
            best_score
        );
        if let Some(text) = sample {
            tracing::info!("  Sample: \"{}\"", text);
        }

        self.last_log_time = Instant::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        let mut logger = TrainingLogger::new(&path).unwrap();
        logger.log(1, 3.5, 0.25, 0.25, Some("a \"quoted\" cat")).unwrap();
        logger.log(2, 3.1, 0.2, 0.25, None).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("epoch,"));
        assert!(lines[1].starts_with("1,"));
        assert!(lines[1].ends_with("\"a \"\"quoted\"\" cat\""));
        assert!(lines[2].contains(",3.1000,0.2000,0.2500,"));
    }
}
