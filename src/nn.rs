//! Components to build a neural network from an architecture descriptor

use ndarray::{Array1, Array2};
use rand::Rng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64Mcg;
use thiserror::Error;

use crate::arch::Architecture;
use crate::checkpoint::{CheckpointError, ParamTensor, ParameterBundle, bias_key, weight_key};

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected}, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
}

/// A single fully-connected layer
///
/// `weight` has one row per output neuron, one column per input, so its
/// shape is `(fan_out, fan_in)`; `bias` has one entry per output neuron.
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    fn with_rng<R: Rng + ?Sized>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing activations
        let std = (2.0 / fan_in.max(1) as f32).sqrt();
        let normal = Normal::new(0.0, std).unwrap();
        let weight = Array2::from_shape_fn((fan_out, fan_in), |_| normal.sample(rng));
        let bias = Array1::from_shape_fn(fan_out, |_| normal.sample(rng));
        Self { weight, bias }
    }

    pub fn fan_in(&self) -> usize {
        self.weight.ncols()
    }

    pub fn fan_out(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, input: &Array1<f32>) -> Array1<f32> {
        self.weight.dot(input) + &self.bias
    }
}

/// A feed-forward classifier built strictly from an [`Architecture`]:
/// hidden layers pass through ReLU, the output layer through softmax.
///
/// Each linear layer owns two named parameter slots (`layers.{i}.weight`,
/// `layers.{i}.bias`) which [`Network::state`] and [`Network::load_state`]
/// enumerate in construction order.
pub struct Network {
    arch: Architecture,
    layers: Vec<Linear>,
}

impl Network {
    /// Creates a randomly initialized network from the descriptor
    pub fn new(arch: Architecture) -> Self {
        Self::with_rng(arch, &mut rand::rng())
    }

    /// Creates a deterministically initialized network from the descriptor
    pub fn seeded(arch: Architecture, seed: u64) -> Self {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        Self::with_rng(arch, &mut rng)
    }

    fn with_rng<R: Rng + ?Sized>(arch: Architecture, rng: &mut R) -> Self {
        let layers = arch
            .layer_dims()
            .into_iter()
            .map(|(fan_in, fan_out)| Linear::with_rng(fan_in, fan_out, rng))
            .collect::<Vec<_>>();
        log::debug!(
            "built network with {} layers, {} parameters",
            layers.len(),
            layers
                .iter()
                .map(|l| l.fan_in() * l.fan_out() + l.fan_out())
                .sum::<usize>()
        );
        Self { arch, layers }
    }

    pub fn architecture(&self) -> &Architecture {
        &self.arch
    }

    /// Computes class probabilities for a single input vector
    pub fn forward(&self, input: &[f32]) -> Result<Array1<f32>, NNError> {
        if input.len() != self.arch.input_size() {
            return Err(NNError::InputSizeMismatch {
                expected: self.arch.input_size(),
                got: input.len(),
            });
        }
        let mut activations = Array1::from(input.to_vec());
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            activations = layer.forward(&activations);
            if i < last {
                activations.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(softmax(&activations))
    }

    /// Extracts a copy of every parameter slot, in layer order
    pub fn state(&self) -> ParameterBundle {
        let mut bundle = ParameterBundle::new();
        for (i, layer) in self.layers.iter().enumerate() {
            bundle.insert(weight_key(i), ParamTensor::Weight(layer.weight.clone()));
            bundle.insert(bias_key(i), ParamTensor::Bias(layer.bias.clone()));
        }
        bundle
    }

    /// Loads a parameter bundle into this network's allocated slots.
    ///
    /// The whole bundle is validated against the network's architecture
    /// before any slot is written, so a failed load leaves every existing
    /// parameter untouched.
    pub fn load_state(&mut self, bundle: &ParameterBundle) -> Result<(), CheckpointError> {
        bundle.validate_against(&self.arch)?;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            // validate_against guarantees both entries exist with matching shapes
            if let Some(ParamTensor::Weight(w)) = bundle.get(&weight_key(i)) {
                layer.weight = w.clone();
            }
            if let Some(ParamTensor::Bias(b)) = bundle.get(&bias_key(i)) {
                layer.bias = b.clone();
            }
        }
        Ok(())
    }
}

/// Numerically stable softmax over the output activations
fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}
