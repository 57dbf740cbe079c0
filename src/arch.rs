//! Architecture descriptor for fully-connected networks

use thiserror::Error;

/// Errors for architecture descriptors
#[derive(Debug, Error)]
pub enum ArchError {
    #[error("Hidden layer {index} has width 0, every hidden width must be positive")]
    ZeroHiddenWidth { index: usize },
}

/// Shape metadata sufficient to reconstruct a feed-forward network:
/// input dimensionality, output dimensionality, and the ordered hidden
/// layer widths (front-to-back connectivity).
///
/// Immutable once constructed. Parameter arrays alone cannot redefine a
/// network's connectivity, so this descriptor is persisted alongside them
/// and reconstruction always rebuilds structure from it first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Architecture {
    input_size: usize,
    output_size: usize,
    hidden_layers: Vec<usize>,
}

impl Architecture {
    /// Creates a descriptor, rejecting zero-width hidden layers.
    ///
    /// An empty `hidden_layers` sequence is valid and describes a direct
    /// input-to-output mapping. Zero `input_size` or `output_size` are
    /// accepted as degenerate networks.
    pub fn new(
        input_size: usize,
        output_size: usize,
        hidden_layers: Vec<usize>,
    ) -> Result<Self, ArchError> {
        if let Some(index) = hidden_layers.iter().position(|&w| w == 0) {
            return Err(ArchError::ZeroHiddenWidth { index });
        }
        Ok(Self {
            input_size,
            output_size,
            hidden_layers,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn hidden_layers(&self) -> &[usize] {
        &self.hidden_layers
    }

    /// Number of linear layers implied by the descriptor
    pub fn num_layers(&self) -> usize {
        self.hidden_layers.len() + 1
    }

    /// Ordered `(fan_in, fan_out)` pairs for each linear layer, input layer
    /// through each hidden layer to the output layer
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.num_layers());
        let mut fan_in = self.input_size;
        for &width in &self.hidden_layers {
            dims.push((fan_in, width));
            fan_in = width;
        }
        dims.push((fan_in, self.output_size));
        dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_dims() {
        let arch = Architecture::new(784, 10, vec![512, 256, 128]).unwrap();
        assert_eq!(
            arch.layer_dims(),
            vec![(784, 512), (512, 256), (256, 128), (128, 10)]
        );
        assert_eq!(arch.num_layers(), 4);
    }

    #[test]
    fn test_no_hidden_layers() {
        let arch = Architecture::new(784, 10, vec![]).unwrap();
        assert_eq!(arch.layer_dims(), vec![(784, 10)]);
        assert_eq!(arch.num_layers(), 1);
    }

    #[test]
    fn test_zero_hidden_width() {
        let err = Architecture::new(784, 10, vec![512, 0, 128]).unwrap_err();
        assert!(matches!(err, ArchError::ZeroHiddenWidth { index: 1 }));
    }
}
