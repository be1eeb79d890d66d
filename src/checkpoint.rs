//! Model Checkpoints
//!
//! The best model is kept as four files in one directory:
//!
//! ```text
//! best_model/
//!     best_encoder.bin    encoder tensors
//!     best_decoder.bin    decoder tensors
//!     vocab.json          vocabulary the decoder was trained against
//!     metadata.json       {"epoch": 12, "score": 0.61}
//! ```
//!
//! ## Binary Format
//!
//! Both `.bin` files share one layout, all integers little-endian `u32`:
//!
//! ```text
//! "VIDCAP_CKPT" | version u8 | config_len | ModelConfig JSON
//! tensor_count
//! per tensor: rank | dims... | data_len | f32 values...
//! ```
//!
//! Tensors appear in [`Seq2Seq::parameters`] order for their half of the
//! model. Loading rebuilds the model from the embedded config and checks every
//! tensor's shape against it.

use crate::config::ModelConfig;
use crate::error::{CaptionError, Result};
use crate::model::Seq2Seq;
use crate::tensor::Tensor;
use crate::vocab::Vocabulary;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 11] = b"VIDCAP_CKPT";
const VERSION: u8 = 1;

pub const ENCODER_FILE: &str = "best_encoder.bin";
pub const DECODER_FILE: &str = "best_decoder.bin";
pub const VOCAB_FILE: &str = "vocab.json";
pub const METADATA_FILE: &str = "metadata.json";

/// When the saved model was produced and how well it scored
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub epoch: usize,
    pub score: f32,
}

/// Write the model, vocabulary and metadata into `dir`, replacing older files
pub fn save_best<P: AsRef<Path>>(
    dir: P,
    model: &Seq2Seq,
    vocab: &Vocabulary,
    metadata: &CheckpointMetadata,
) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| CaptionError::io(dir, e))?;

    write_params(&dir.join(ENCODER_FILE), &model.config, &model.encoder.parameters())?;
    write_params(&dir.join(DECODER_FILE), &model.config, &model.decoder.parameters())?;
    vocab.save(dir.join(VOCAB_FILE))?;

    let path = dir.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata).map_err(|e| CaptionError::json(&path, e))?;
    fs::write(&path, json).map_err(|e| CaptionError::io(&path, e))?;

    tracing::info!(
        "Saved checkpoint to {} (epoch {}, score {:.4})",
        dir.display(),
        metadata.epoch,
        metadata.score
    );
    Ok(())
}

/// Load the model and vocabulary written by [`save_best`]
///
/// # Errors
///
/// [`CaptionError::InvalidCheckpoint`] when a file is truncated, has the wrong
/// header, disagrees with the other half's config or holds a tensor of the
/// wrong shape. The vocabulary size must match the decoder's.
pub fn load_best<P: AsRef<Path>>(dir: P) -> Result<(Seq2Seq, Vocabulary)> {
    let dir = dir.as_ref();
    let encoder_path = dir.join(ENCODER_FILE);
    let decoder_path = dir.join(DECODER_FILE);

    let (config, encoder_tensors) = read_params(&encoder_path)?;
    let (decoder_config, decoder_tensors) = read_params(&decoder_path)?;
    if decoder_config != config {
        return Err(CaptionError::checkpoint(
            &decoder_path,
            "decoder config differs from encoder config",
        ));
    }
    config
        .validate()
        .map_err(|e| CaptionError::checkpoint(&encoder_path, e.to_string()))?;

    let mut model = Seq2Seq::new(&config, 0);
    assign(&encoder_path, model.encoder.parameters_mut(), encoder_tensors)?;
    assign(&decoder_path, model.decoder.parameters_mut(), decoder_tensors)?;

    let vocab = Vocabulary::load(dir.join(VOCAB_FILE))?;
    if vocab.len() != config.vocab_size {
        return Err(CaptionError::checkpoint(
            dir.join(VOCAB_FILE),
            format!(
                "vocabulary has {} words, model expects {}",
                vocab.len(),
                config.vocab_size
            ),
        ));
    }

    tracing::info!(
        "Loaded checkpoint from {} ({} parameters, vocabulary {})",
        dir.display(),
        model.num_parameters(),
        vocab.len()
    );
    Ok((model, vocab))
}

/// Read `metadata.json` from a checkpoint directory
pub fn load_metadata<P: AsRef<Path>>(dir: P) -> Result<CheckpointMetadata> {
    let path = dir.as_ref().join(METADATA_FILE);
    let json = fs::read_to_string(&path).map_err(|e| CaptionError::io(&path, e))?;
    serde_json::from_str(&json).map_err(|e| CaptionError::json(&path, e))
}

fn assign(path: &Path, params: Vec<&mut Tensor>, loaded: Vec<Tensor>) -> Result<()> {
    if params.len() != loaded.len() {
        return Err(CaptionError::checkpoint(
            path,
            format!("expected {} tensors, found {}", params.len(), loaded.len()),
        ));
    }
    for (i, (param, tensor)) in params.into_iter().zip(loaded).enumerate() {
        if param.shape != tensor.shape {
            return Err(CaptionError::checkpoint(
                path,
                format!(
                    "tensor {} has shape {:?}, model expects {:?}",
                    i, tensor.shape, param.shape
                ),
            ));
        }
        *param = tensor;
    }
    Ok(())
}

fn write_params(path: &Path, config: &ModelConfig, tensors: &[&Tensor]) -> Result<()> {
    let file = File::create(path).map_err(|e| CaptionError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let config_json = serde_json::to_string(config).map_err(|e| CaptionError::json(path, e))?;

    let write_all = |writer: &mut BufWriter<File>| -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        write_u32(writer, config_json.len())?;
        writer.write_all(config_json.as_bytes())?;

        write_u32(writer, tensors.len())?;
        for tensor in tensors {
            write_tensor(writer, tensor)?;
        }
        writer.flush()
    };
    write_all(&mut writer).map_err(|e| CaptionError::io(path, e))
}

fn write_u32<W: Write>(writer: &mut W, value: usize) -> std::io::Result<()> {
    writer.write_all(&(value as u32).to_le_bytes())
}

fn write_tensor<W: Write>(writer: &mut W, tensor: &Tensor) -> std::io::Result<()> {
    write_u32(writer, tensor.shape.len())?;
    for &dim in &tensor.shape {
        write_u32(writer, dim)?;
    }
    write_u32(writer, tensor.data.len())?;
    for &val in &tensor.data {
        writer.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

fn read_params(path: &Path) -> Result<(ModelConfig, Vec<Tensor>)> {
    let file = File::open(path).map_err(|e| CaptionError::io(path, e))?;
    let mut reader = CheckpointReader {
        inner: BufReader::new(file),
        path: path.to_path_buf(),
    };

    let mut magic = [0u8; 11];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(CaptionError::checkpoint(path, "bad header, expected VIDCAP_CKPT"));
    }
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != VERSION {
        return Err(CaptionError::checkpoint(
            path,
            format!("unsupported version {}", version[0]),
        ));
    }

    let config_len = reader.read_u32()?;
    let config_bytes = reader.read_bytes(config_len)?;
    let config: ModelConfig = serde_json::from_slice(&config_bytes)
        .map_err(|e| CaptionError::checkpoint(path, format!("config: {}", e)))?;

    let count = reader.read_u32()?;
    let mut tensors = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        tensors.push(reader.read_tensor()?);
    }
    Ok((config, tensors))
}

/// Reads checkpoint fields, turning short reads into checkpoint errors
struct CheckpointReader {
    inner: BufReader<File>,
    path: PathBuf,
}

impl CheckpointReader {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|e| CaptionError::checkpoint(&self.path, format!("truncated file: {}", e)))
    }

    /// Read `len` bytes, growing the buffer only as data actually arrives
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        (&mut self.inner)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| CaptionError::io(&self.path, e))?;
        if buf.len() != len {
            return Err(CaptionError::checkpoint(
                &self.path,
                format!("truncated file: expected {} bytes, found {}", len, buf.len()),
            ));
        }
        Ok(buf)
    }

    fn read_u32(&mut self) -> Result<usize> {
        let mut bytes = [0u8; 4];
        self.read_exact(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes) as usize)
    }

    fn read_tensor(&mut self) -> Result<Tensor> {
        let rank = self.read_u32()?;
        let mut shape = Vec::with_capacity(rank.min(8));
        for _ in 0..rank {
            shape.push(self.read_u32()?);
        }

        let data_len = self.read_u32()?;
        let elements = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| CaptionError::checkpoint(&self.path, format!("tensor shape {:?} overflows", shape)))?;
        if elements != data_len {
            return Err(CaptionError::checkpoint(
                &self.path,
                format!("tensor of shape {:?} stores {} values", shape, data_len),
            ));
        }
        let byte_len = data_len
            .checked_mul(4)
            .ok_or_else(|| CaptionError::checkpoint(&self.path, format!("{} values overflow", data_len)))?;

        let bytes = self.read_bytes(byte_len)?;
        let data = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Tensor::new(data, shape))
    }
}
