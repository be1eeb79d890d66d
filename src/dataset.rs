//! Caption Dataset
//!
//! Reads a caption file and resolves one `.npy` feature file per video.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/
//!     training_label.json        [{"id": "...", "caption": ["...", ...]}, ...]
//!     training_data/feat/<id>.npy
//!     testing_label.json
//!     testing_data/feat/<id>.npy
//! ```
//!
//! Feature files hold a 2D `(T, input_size)` array of `f32` or `f64`; `f64`
//! values are narrowed. Only the first caption of each record is used.
//! Features are read from disk when an example is requested, not up front.

use crate::collate::Example;
use crate::error::{CaptionError, Result};
use crate::tensor::Tensor;
use crate::vocab::{Vocabulary, EOS, SOS};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One entry of a caption file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptionRecord {
    pub id: String,
    pub caption: Vec<String>,
}

impl CaptionRecord {
    /// The reference caption: the first one listed
    pub fn reference(&self) -> &str {
        &self.caption[0]
    }
}

/// Caption records plus the directory their features live in
#[derive(Clone, Debug)]
pub struct CaptionDataset {
    records: Vec<CaptionRecord>,
    feature_dir: PathBuf,
    input_size: usize,
}

/// Paths of the training or testing split under a data directory
pub fn split_paths(data_dir: &Path, split: &str) -> (PathBuf, PathBuf) {
    (
        data_dir.join(format!("{}_data", split)).join("feat"),
        data_dir.join(format!("{}_label.json", split)),
    )
}

impl CaptionDataset {
    /// Load the caption file and check that every video has features
    ///
    /// # Errors
    ///
    /// I/O and JSON errors on the caption file, [`CaptionError::EmptyRecord`]
    /// for a record without captions and [`CaptionError::MissingFeatures`] for
    /// a video whose `.npy` file does not exist.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        feature_dir: P,
        caption_file: Q,
        input_size: usize,
    ) -> Result<Self> {
        let caption_file = caption_file.as_ref();
        let json = fs::read_to_string(caption_file).map_err(|e| CaptionError::io(caption_file, e))?;
        let records: Vec<CaptionRecord> =
            serde_json::from_str(&json).map_err(|e| CaptionError::json(caption_file, e))?;

        let dataset = Self {
            records,
            feature_dir: feature_dir.as_ref().to_path_buf(),
            input_size,
        };

        for record in &dataset.records {
            if record.caption.is_empty() {
                return Err(CaptionError::EmptyRecord(record.id.clone()));
            }
            let path = dataset.feature_path(&record.id);
            if !path.is_file() {
                return Err(CaptionError::MissingFeatures {
                    video_id: record.id.clone(),
                    path,
                });
            }
        }

        tracing::info!(
            "Loaded {} captioned videos from {}",
            dataset.len(),
            caption_file.display()
        );
        Ok(dataset)
    }

    /// Open the `training` or `testing` split of a data directory
    pub fn open_split(data_dir: &Path, split: &str, input_size: usize) -> Result<Self> {
        let (feature_dir, caption_file) = split_paths(data_dir, split);
        Self::open(feature_dir, caption_file, input_size)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CaptionRecord] {
        &self.records
    }

    pub fn video_id(&self, index: usize) -> &str {
        &self.records[index].id
    }

    /// Reference captions in file order, for building a vocabulary
    pub fn reference_captions(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(CaptionRecord::reference)
    }

    fn feature_path(&self, video_id: &str) -> PathBuf {
        self.feature_dir.join(format!("{}.npy", video_id))
    }

    /// Read the `[T, input_size]` features of example `index`
    pub fn load_features(&self, index: usize) -> Result<Tensor> {
        let video_id = &self.records[index].id;
        let path = self.feature_path(video_id);
        let tensor = read_feature_file(&path)?;
        if tensor.shape[0] == 0 {
            return Err(CaptionError::EmptyFeatures {
                video_id: video_id.clone(),
                path,
            });
        }
        if tensor.shape[1] != self.input_size {
            return Err(CaptionError::FeatureDimension {
                video_id: video_id.clone(),
                expected: self.input_size,
                actual: tensor.shape[1],
            });
        }
        Ok(tensor)
    }

    /// Features plus encoded reference caption of example `index`
    pub fn example(&self, index: usize, vocab: &Vocabulary, add_boundary_tokens: bool) -> Result<Example> {
        let record = &self.records[index];
        let mut caption = vocab.encode_sentence(record.reference());
        if add_boundary_tokens {
            caption.insert(0, SOS);
            caption.push(EOS);
        }
        Ok(Example {
            video_id: record.id.clone(),
            features: self.load_features(index)?,
            caption,
        })
    }

    /// Example indices grouped into batches; shuffled when an RNG is given
    pub fn batch_indices<R: Rng>(&self, batch_size: usize, rng: Option<&mut R>) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = rng {
            order.shuffle(rng);
        }
        order.chunks(batch_size.max(1)).map(<[usize]>::to_vec).collect()
    }
}

/// Read a 2D `.npy` array of `f32` or `f64`
pub fn read_feature_file(path: &Path) -> Result<Tensor> {
    let array: Array2<f32> = match ndarray_npy::read_npy::<_, Array2<f32>>(path) {
        Ok(a) => a,
        Err(f32_err) => match ndarray_npy::read_npy::<_, Array2<f64>>(path) {
            Ok(a) => a.mapv(|v| v as f32),
            Err(_) => {
                return Err(CaptionError::Npy {
                    path: path.to_path_buf(),
                    message: f32_err.to_string(),
                })
            }
        },
    };

    let (rows, cols) = array.dim();
    let data = array.iter().copied().collect();
    Ok(Tensor::new(data, vec![rows, cols]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn write_fixture(dir: &Path, ids: &[&str], frames: usize, width: usize) -> PathBuf {
        let feat = dir.join("feat");
        fs::create_dir_all(&feat).unwrap();
        for (n, id) in ids.iter().enumerate() {
            let arr = Array2::from_shape_fn((frames, width), |(t, d)| (n * 100 + t * 10 + d) as f32);
            ndarray_npy::write_npy(feat.join(format!("{}.npy", id)), &arr).unwrap();
        }
        let records: Vec<CaptionRecord> = ids
            .iter()
            .map(|id| CaptionRecord {
                id: id.to_string(),
                caption: vec![format!("a {} runs", id), "ignored".into()],
            })
            .collect();
        let labels = dir.join("labels.json");
        fs::write(&labels, serde_json::to_string(&records).unwrap()).unwrap();
        labels
    }

    #[test]
    fn test_open_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let labels = write_fixture(dir.path(), &["v1", "v2"], 3, 4);
        let ds = CaptionDataset::open(dir.path().join("feat"), &labels, 4).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.video_id(1), "v2");
        assert_eq!(ds.reference_captions().collect::<Vec<_>>(), vec!["a v1 runs", "a v2 runs"]);

        let features = ds.load_features(1).unwrap();
        assert_eq!(features.shape, vec![3, 4]);
        assert_eq!(features.data[0], 100.0);
        assert_eq!(features.data[5], 111.0);

        let vocab = Vocabulary::build(ds.reference_captions(), 1);
        let ex = ds.example(0, &vocab, true).unwrap();
        assert_eq!(ex.caption, vec![SOS, 4, 5, 6, EOS]);
    }

    #[test]
    fn test_f64_features_are_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.npy");
        let arr = Array2::from_shape_fn((2, 2), |(i, j)| (i * 2 + j) as f64 * 0.5);
        ndarray_npy::write_npy(&path, &arr).unwrap();
        let t = read_feature_file(&path).unwrap();
        assert_eq!(t.data, vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn test_missing_feature_file() {
        let dir = tempfile::tempdir().unwrap();
        let labels = write_fixture(dir.path(), &["v1"], 2, 4);
        let mut records: Vec<CaptionRecord> =
            serde_json::from_str(&fs::read_to_string(&labels).unwrap()).unwrap();
        records.push(CaptionRecord {
            id: "ghost".into(),
            caption: vec!["boo".into()],
        });
        fs::write(&labels, serde_json::to_string(&records).unwrap()).unwrap();

        let err = CaptionDataset::open(dir.path().join("feat"), &labels, 4).unwrap_err();
        assert!(matches!(err, CaptionError::MissingFeatures { ref video_id, .. } if video_id == "ghost"));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let labels = write_fixture(dir.path(), &["v1"], 2, 3);
        let ds = CaptionDataset::open(dir.path().join("feat"), &labels, 4).unwrap();
        assert!(matches!(
            ds.load_features(0),
            Err(CaptionError::FeatureDimension { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn test_zero_frame_features_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let labels = write_fixture(dir.path(), &["v1"], 0, 4);
        let ds = CaptionDataset::open(dir.path().join("feat"), &labels, 4).unwrap();

        let err = ds.load_features(0).unwrap_err();
        match err {
            CaptionError::EmptyFeatures { video_id, path } => {
                assert_eq!(video_id, "v1");
                assert!(path.ends_with("v1.npy"));
            }
            other => panic!("unexpected error: {}", other),
        }

        let vocab = Vocabulary::build(ds.reference_captions(), 1);
        assert!(matches!(
            ds.example(0, &vocab, false),
            Err(CaptionError::EmptyFeatures { .. })
        ));
    }

    #[test]
    fn test_empty_record_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let labels = dir.path().join("labels.json");
        fs::write(&labels, r#"[{"id": "v1", "caption": []}]"#).unwrap();
        assert!(matches!(
            CaptionDataset::open(dir.path(), &labels, 4),
            Err(CaptionError::EmptyRecord(_))
        ));

        fs::write(&labels, "not json").unwrap();
        assert!(matches!(
            CaptionDataset::open(dir.path(), &labels, 4),
            Err(CaptionError::Json { .. })
        ));
    }

    #[test]
    fn test_batch_indices_cover_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ids = ["a", "b", "c", "d", "e"];
        let labels = write_fixture(dir.path(), &ids, 1, 2);
        let ds = CaptionDataset::open(dir.path().join("feat"), &labels, 2).unwrap();

        let ordered = ds.batch_indices::<StdRng>(2, None);
        assert_eq!(ordered, vec![vec![0, 1], vec![2, 3], vec![4]]);

        let mut rng = StdRng::seed_from_u64(1);
        let mut seen: Vec<usize> = ds.batch_indices(2, Some(&mut rng)).concat();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }
}
