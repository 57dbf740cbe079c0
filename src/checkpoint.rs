//! Checkpoint codec: a self-describing persisted record holding a network's
//! architecture descriptor and its learned parameters.
//!
//! Layout of the persisted bytes:
//! ```text
//! [4-byte magic: "CKP1"]
//! [2-byte format version (little-endian)]
//! [postcard body: input_size, output_size, hidden_layers, state_dict]
//! ```
//! The descriptor fields come before every parameter array, so a reader can
//! rebuild structure before decoding any numeric data. Reconstruction is two
//! ordered phases: instantiate from the descriptor, then load values into
//! the freshly allocated slots.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arch::Architecture;
use crate::nn::Network;

const MAGIC: [u8; 4] = *b"CKP1";
const FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = MAGIC.len() + size_of::<u16>();

/// Errors for the checkpoint codec
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Parameter {key} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Bundle is missing required parameter {key}")]
    IncompleteBundle { key: String },
    #[error("Bundle contains parameter {key} not implied by the architecture")]
    UnexpectedEntry { key: String },
    #[error("Corrupt checkpoint record: {reason}")]
    CorruptRecord { reason: String },
    #[error("Unsupported checkpoint format version {found}, supported version is {supported}")]
    VersionMismatch { found: u16, supported: u16 },
    #[error("Checkpoint io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checkpoint encoding failed: {0}")]
    Encode(#[from] postcard::Error),
}

/// State dict key for layer `i`'s weight matrix
pub fn weight_key(layer: usize) -> String {
    format!("layers.{layer}.weight")
}

/// State dict key for layer `i`'s bias vector
pub fn bias_key(layer: usize) -> String {
    format!("layers.{layer}.bias")
}

/// A single named parameter: a 2-D weight matrix or a 1-D bias vector
#[derive(Debug, Clone, PartialEq)]
pub enum ParamTensor {
    Weight(Array2<f32>),
    Bias(Array1<f32>),
}

impl ParamTensor {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ParamTensor::Weight(w) => vec![w.nrows(), w.ncols()],
            ParamTensor::Bias(b) => vec![b.len()],
        }
    }
}

/// Insertion-ordered mapping from state dict keys to parameter tensors.
///
/// Keys are unique; inserting an existing key replaces the tensor in place
/// so iteration order stays stable for round-tripping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBundle {
    entries: Vec<(String, ParamTensor)>,
}

impl ParameterBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, tensor: ParamTensor) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = tensor,
            None => self.entries.push((key, tensor)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ParamTensor> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, t)| t)
    }

    pub fn remove(&mut self, key: &str) -> Option<ParamTensor> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that this bundle holds exactly one weight and one bias entry
    /// per layer implied by `arch`, with the shapes the descriptor requires.
    pub fn validate_against(&self, arch: &Architecture) -> Result<(), CheckpointError> {
        let dims = arch.layer_dims();
        let mut expected_keys = HashSet::with_capacity(dims.len() * 2);
        for (i, &(fan_in, fan_out)) in dims.iter().enumerate() {
            for (key, expected) in [
                (weight_key(i), vec![fan_out, fan_in]),
                (bias_key(i), vec![fan_out]),
            ] {
                let tensor = self
                    .get(&key)
                    .ok_or(CheckpointError::IncompleteBundle { key: key.clone() })?;
                let actual = tensor.shape();
                if actual != expected {
                    return Err(CheckpointError::ShapeMismatch {
                        key,
                        expected,
                        actual,
                    });
                }
                expected_keys.insert(key);
            }
        }
        if self.len() != expected_keys.len() {
            let key = self
                .entries
                .iter()
                .map(|(k, _)| k)
                .find(|k| !expected_keys.contains(k.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(CheckpointError::UnexpectedEntry { key });
        }
        Ok(())
    }
}

/// A validated, write-once pairing of an architecture descriptor and the
/// parameter bundle a model trained with that architecture produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    descriptor: Architecture,
    parameters: ParameterBundle,
}

impl CheckpointRecord {
    /// Pairs a descriptor with a bundle, validating the bundle's keys and
    /// shapes against the descriptor before accepting it
    pub fn new(
        descriptor: Architecture,
        parameters: ParameterBundle,
    ) -> Result<Self, CheckpointError> {
        parameters.validate_against(&descriptor)?;
        Ok(Self {
            descriptor,
            parameters,
        })
    }

    /// Snapshots a live network; the extracted bundle always matches the
    /// network's own architecture
    pub fn from_network(network: &Network) -> Self {
        Self {
            descriptor: network.architecture().clone(),
            parameters: network.state(),
        }
    }

    pub fn descriptor(&self) -> &Architecture {
        &self.descriptor
    }

    pub fn parameters(&self) -> &ParameterBundle {
        &self.parameters
    }

    /// Rebuilds a fresh network in two phases: structure from the
    /// descriptor, then parameter values into the new allocation
    pub fn instantiate(&self) -> Result<Network, CheckpointError> {
        let mut network = Network::new(self.descriptor.clone());
        network.load_state(&self.parameters)?;
        Ok(network)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        let state_dict = self
            .parameters
            .iter()
            .map(|(key, tensor)| EntryDump {
                key: key.to_string(),
                kind: match tensor {
                    ParamTensor::Weight(_) => ParamKind::Weight,
                    ParamTensor::Bias(_) => ParamKind::Bias,
                },
                shape: tensor.shape(),
                data: match tensor {
                    ParamTensor::Weight(w) => w.iter().copied().collect(),
                    ParamTensor::Bias(b) => b.to_vec(),
                },
            })
            .collect();
        let body = BodyDump {
            input_size: self.descriptor.input_size(),
            output_size: self.descriptor.output_size(),
            hidden_layers: self.descriptor.hidden_layers().to_vec(),
            state_dict,
        };
        let body_bytes = postcard::to_allocvec(&body)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + body_bytes.len());
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body_bytes);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        if bytes.len() < HEADER_LEN {
            return Err(corrupt("record shorter than header"));
        }
        if bytes[..MAGIC.len()] != MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(CheckpointError::VersionMismatch {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let (body, rest) = postcard::take_from_bytes::<BodyDump>(&bytes[HEADER_LEN..])
            .map_err(|e| corrupt(&e.to_string()))?;
        if !rest.is_empty() {
            return Err(corrupt("trailing bytes after record body"));
        }

        let descriptor =
            Architecture::new(body.input_size, body.output_size, body.hidden_layers)
                .map_err(|e| corrupt(&e.to_string()))?;

        let mut parameters = ParameterBundle::new();
        for entry in body.state_dict {
            if parameters.get(&entry.key).is_some() {
                return Err(corrupt(&format!("duplicate state dict key {}", entry.key)));
            }
            let (key, tensor) = entry.into_tensor()?;
            parameters.insert(key, tensor);
        }
        parameters
            .validate_against(&descriptor)
            .map_err(|e| corrupt(&e.to_string()))?;

        Ok(Self {
            descriptor,
            parameters,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), &bytes)?;
        log::info!(
            "saved checkpoint to {} ({} bytes)",
            path.as_ref().display(),
            bytes.len()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let bytes = fs::read(path.as_ref())?;
        let record = Self::from_bytes(&bytes)?;
        log::info!("loaded checkpoint from {}", path.as_ref().display());
        Ok(record)
    }
}

fn corrupt(reason: &str) -> CheckpointError {
    CheckpointError::CorruptRecord {
        reason: reason.to_string(),
    }
}

#[derive(Serialize, Deserialize)]
enum ParamKind {
    Weight,
    Bias,
}

#[derive(Serialize, Deserialize)]
struct EntryDump {
    key: String,
    kind: ParamKind,
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl EntryDump {
    fn into_tensor(self) -> Result<(String, ParamTensor), CheckpointError> {
        let tensor = match self.kind {
            ParamKind::Weight => {
                let [rows, cols] = self.shape[..] else {
                    return Err(corrupt(&format!(
                        "weight {} declares a {}-d shape",
                        self.key,
                        self.shape.len()
                    )));
                };
                let weight = Array2::from_shape_vec((rows, cols), self.data)
                    .map_err(|e| corrupt(&format!("weight {}: {e}", self.key)))?;
                ParamTensor::Weight(weight)
            }
            ParamKind::Bias => {
                let [len] = self.shape[..] else {
                    return Err(corrupt(&format!(
                        "bias {} declares a {}-d shape",
                        self.key,
                        self.shape.len()
                    )));
                };
                if len != self.data.len() {
                    return Err(corrupt(&format!(
                        "bias {} declares length {len} but holds {} values",
                        self.key,
                        self.data.len()
                    )));
                }
                ParamTensor::Bias(Array1::from_vec(self.data))
            }
        };
        Ok((self.key, tensor))
    }
}

#[derive(Serialize, Deserialize)]
struct BodyDump {
    input_size: usize,
    output_size: usize,
    hidden_layers: Vec<usize>,
    state_dict: Vec<EntryDump>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> CheckpointRecord {
        let arch = Architecture::new(4, 3, vec![8, 5]).unwrap();
        CheckpointRecord::from_network(&Network::seeded(arch, 42))
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        let bytes = record.to_bytes().unwrap();
        let restored = CheckpointRecord::from_bytes(&bytes).unwrap();
        assert_eq!(restored.descriptor(), record.descriptor());
        assert_eq!(restored.parameters(), record.parameters());
    }

    #[test]
    fn test_round_trip_no_hidden_layers() {
        let arch = Architecture::new(6, 2, vec![]).unwrap();
        let record = CheckpointRecord::from_network(&Network::seeded(arch.clone(), 3));
        let bytes = record.to_bytes().unwrap();
        let restored = CheckpointRecord::from_bytes(&bytes).unwrap();
        assert_eq!(restored.descriptor(), &arch);
        assert_eq!(restored.parameters().len(), 2);
    }

    #[test]
    fn test_every_truncation_is_corrupt() {
        let bytes = sample_record().to_bytes().unwrap();
        for cut in 0..bytes.len() {
            let err = CheckpointRecord::from_bytes(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, CheckpointError::CorruptRecord { .. }),
                "truncation at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_trailing_garbage_is_corrupt() {
        let mut bytes = sample_record().to_bytes().unwrap();
        bytes.push(0);
        let err = CheckpointRecord::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CheckpointError::CorruptRecord { .. }));
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_record().to_bytes().unwrap();
        bytes[0] = b'X';
        let err = CheckpointRecord::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CheckpointError::CorruptRecord { .. }));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = sample_record().to_bytes().unwrap();
        bytes[4..6].copy_from_slice(&9u16.to_le_bytes());
        let err = CheckpointRecord::from_bytes(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::VersionMismatch {
                found: 9,
                supported: FORMAT_VERSION
            }
        ));
    }

    #[test]
    fn test_incomplete_bundle_rejected() {
        let arch = Architecture::new(4, 3, vec![8, 5]).unwrap();
        let mut bundle = Network::seeded(arch.clone(), 42).state();
        bundle.remove(&bias_key(1)).unwrap();
        let err = CheckpointRecord::new(arch, bundle).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::IncompleteBundle { key } if key == bias_key(1)
        ));
    }

    #[test]
    fn test_unexpected_entry_rejected() {
        let arch = Architecture::new(4, 3, vec![8]).unwrap();
        let mut bundle = Network::seeded(arch.clone(), 42).state();
        bundle.insert(
            "layers.9.bias".to_string(),
            ParamTensor::Bias(Array1::zeros(3)),
        );
        let err = CheckpointRecord::new(arch, bundle).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::UnexpectedEntry { key } if key == "layers.9.bias"
        ));
    }

    #[test]
    fn test_shape_mismatch_leaves_target_untouched() {
        let target_arch = Architecture::new(784, 10, vec![400, 200, 100]).unwrap();
        let donor_arch = Architecture::new(784, 10, vec![512, 256, 128]).unwrap();
        let mut target = Network::seeded(target_arch, 7);
        let donor = Network::seeded(donor_arch, 8);

        let before = target.state();
        let err = target.load_state(&donor.state()).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::ShapeMismatch {
                key,
                expected,
                actual,
            } if key == weight_key(0) && expected == vec![400, 784] && actual == vec![512, 784]
        ));
        assert_eq!(target.state(), before);
    }

    #[test]
    fn test_instantiate_matches_source() {
        let arch = Architecture::new(784, 10, vec![512, 256, 128]).unwrap();
        let source = Network::seeded(arch, 42);
        let record = CheckpointRecord::from_network(&source);
        let restored = record.instantiate().unwrap();

        let input = (0..784).map(|i| (i % 7) as f32 / 7.0).collect::<Vec<_>>();
        assert_eq!(
            source.forward(&input).unwrap(),
            restored.forward(&input).unwrap()
        );
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.ckpt");

        let record = sample_record();
        record.save(&path).unwrap();
        let loaded = CheckpointRecord::load(&path).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointRecord::load(dir.path().join("absent.ckpt")).unwrap_err();
        assert!(matches!(err, CheckpointError::Io(_)));
    }
}
