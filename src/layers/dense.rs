use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::WeightInit;
use crate::activations::Activation;

/// Gradients of one dense layer
#[derive(Clone, Debug)]
pub struct LayerGradients {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
}

/// A fully connected (dense) layer in a neural network.
///
/// The layer keeps no activations between calls: the forward pass returns
/// the pre-activation alongside the output, and the caller hands both back
/// to [`backward`](Self::backward). That keeps inference `&self`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DenseLayer {
    pub weights: Array2<f32>,
    pub biases: Array1<f32>,
    pub activation: Activation,
}

impl DenseLayer {
    /// Create a layer with weights drawn per the activation's recommended init
    pub fn new<R: Rng + ?Sized>(input_size: usize, output_size: usize, activation: Activation, rng: &mut R) -> Self {
        Self::with_init(input_size, output_size, activation, WeightInit::for_activation(activation), rng)
    }

    pub fn with_init<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        activation: Activation,
        init: WeightInit,
        rng: &mut R,
    ) -> Self {
        DenseLayer {
            weights: init.weights((input_size, output_size), rng),
            biases: init.biases(output_size),
            activation,
        }
    }

    pub fn with_weights(mut self, weights: Array2<f32>) -> Self {
        assert_eq!(weights.dim(), self.weights.dim());
        self.weights = weights;
        self
    }

    pub fn with_biases(mut self, biases: Array1<f32>) -> Self {
        assert_eq!(biases.dim(), self.biases.dim());
        self.biases = biases;
        self
    }

    pub fn input_size(&self) -> usize {
        self.weights.nrows()
    }

    pub fn output_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Returns `(pre_activation, output)` for a batch of inputs
    pub fn forward_batch(&self, inputs: ArrayView2<f32>) -> (Array2<f32>, Array2<f32>) {
        let pre_activation = inputs.dot(&self.weights) + &self.biases.view().insert_axis(Axis(0));
        let mut outputs = pre_activation.clone();
        self.activation.apply_batch(&mut outputs);
        (pre_activation, outputs)
    }

    /// Backpropagate `output_errors` (dL/d output) through the layer.
    ///
    /// Returns the parameter gradients and dL/d input.
    pub fn backward(
        &self,
        inputs: ArrayView2<f32>,
        pre_activation: ArrayView2<f32>,
        output_errors: ArrayView2<f32>,
    ) -> (LayerGradients, Array2<f32>) {
        let adjusted_error = &output_errors * &self.activation.derivative_batch(pre_activation);
        let gradients = LayerGradients {
            weights: inputs.t().dot(&adjusted_error),
            biases: adjusted_error.sum_axis(Axis(0)),
        };
        let input_errors = adjusted_error.dot(&self.weights.t());
        (gradients, input_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_forward_linear() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let layer = DenseLayer::new(2, 2, Activation::Linear, &mut rng)
            .with_weights(array![[1.0, 0.0], [0.0, 2.0]])
            .with_biases(array![0.5, -0.5]);
        let (pre, out) = layer.forward_batch(array![[1.0, 1.0]].view());
        assert_eq!(pre, array![[1.5, 1.5]]);
        assert_eq!(out, pre);
    }

    #[test]
    fn test_backward_gradients() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let layer = DenseLayer::new(2, 1, Activation::Linear, &mut rng)
            .with_weights(array![[2.0], [3.0]]);
        let inputs = array![[1.0, 2.0], [3.0, 4.0]];
        let (pre, _) = layer.forward_batch(inputs.view());
        let errors = array![[1.0], [0.5]];
        let (grads, input_errors) = layer.backward(inputs.view(), pre.view(), errors.view());
        assert_eq!(grads.weights, array![[2.5], [4.0]]);
        assert_eq!(grads.biases, array![1.5]);
        assert_eq!(input_errors, array![[2.0, 3.0], [1.0, 1.5]]);
    }
}
