use bincode::{deserialize, serialize};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use crate::activations::Activation;
use crate::error::{MetisError, Result};
use crate::layers::{DenseLayer, LayerGradients};
use crate::optimizer::{GradientClipper, Optimizer, OptimizerWrapper};

/// Trainable function from state vectors to output vectors.
///
/// Learners only see this interface: forward passes are pure, and an update
/// takes the gradient of the loss with respect to the outputs.
pub trait FunctionApproximator: Clone {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    fn forward(&self, input: ArrayView1<f32>) -> Array1<f32>;
    fn forward_batch(&self, inputs: ArrayView2<f32>) -> Array2<f32>;

    /// dL/d input for every row of `inputs`, given dL/d output; parameters are untouched
    fn input_gradients(&self, inputs: ArrayView2<f32>, output_gradients: ArrayView2<f32>) -> Array2<f32>;

    /// One optimizer step given dL/d output for every row of `inputs`
    fn update(&mut self, inputs: ArrayView2<f32>, output_gradients: ArrayView2<f32>, learning_rate: f32);

    /// Polyak averaging: `self = tau * other + (1 - tau) * self`
    fn soft_update_from(&mut self, other: &Self, tau: f32) -> Result<()>;
}

/// A feed-forward network of dense layers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NeuralNetwork {
    pub layers: Vec<DenseLayer>,
    pub optimizer: OptimizerWrapper,
    pub clipper: GradientClipper,
}

/// Inputs and pre-activations of every layer from one forward pass
struct ForwardTrace {
    inputs: Vec<Array2<f32>>,
    pre_activations: Vec<Array2<f32>>,
}

impl NeuralNetwork {
    /// Create a network with `layer_sizes.len() - 1` dense layers.
    ///
    /// # Panics
    /// If `activations` does not hold one entry per layer.
    pub fn new<R: Rng + ?Sized>(
        layer_sizes: &[usize],
        activations: &[Activation],
        optimizer: OptimizerWrapper,
        rng: &mut R,
    ) -> Self {
        assert_eq!(layer_sizes.len() - 1, activations.len());

        let layers = layer_sizes
            .windows(2)
            .zip(activations.iter())
            .map(|(window, &activation)| DenseLayer::new(window[0], window[1], activation, rng))
            .collect();

        NeuralNetwork {
            layers,
            optimizer,
            clipper: GradientClipper::None,
        }
    }

    /// Assemble a network from already initialized layers
    pub fn from_layers(layers: Vec<DenseLayer>, optimizer: OptimizerWrapper) -> Self {
        NeuralNetwork {
            layers,
            optimizer,
            clipper: GradientClipper::None,
        }
    }

    /// Same as [`new`](Self::new) with weights drawn from a seeded generator
    pub fn seeded(layer_sizes: &[usize], activations: &[Activation], optimizer: OptimizerWrapper, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::new(layer_sizes, activations, optimizer, &mut rng)
    }

    pub fn with_layers(mut self, layers: Vec<DenseLayer>) -> Self {
        self.layers = layers;
        self
    }

    pub fn with_clipper(mut self, clipper: GradientClipper) -> Self {
        self.clipper = clipper;
        self
    }

    fn trace(&self, inputs: ArrayView2<f32>) -> (ForwardTrace, Array2<f32>) {
        let mut trace = ForwardTrace {
            inputs: Vec::with_capacity(self.layers.len()),
            pre_activations: Vec::with_capacity(self.layers.len()),
        };
        let mut current = inputs.to_owned();
        for layer in &self.layers {
            let (pre, out) = layer.forward_batch(current.view());
            trace.inputs.push(current);
            trace.pre_activations.push(pre);
            current = out;
        }
        (trace, current)
    }

    /// Parameter gradients given dL/d output for a batch
    pub fn gradients(&self, inputs: ArrayView2<f32>, output_gradients: ArrayView2<f32>) -> Vec<LayerGradients> {
        let (trace, _) = self.trace(inputs);
        self.backward(&trace, output_gradients).0
    }

    /// Parameter gradients and dL/d input
    fn backward(&self, trace: &ForwardTrace, output_gradients: ArrayView2<f32>) -> (Vec<LayerGradients>, Array2<f32>) {
        let mut gradients = Vec::with_capacity(self.layers.len());
        let mut error = output_gradients.to_owned();
        for (i, layer) in self.layers.iter().enumerate().rev() {
            let (layer_gradients, input_error) =
                layer.backward(trace.inputs[i].view(), trace.pre_activations[i].view(), error.view());
            gradients.push(layer_gradients);
            error = input_error;
        }
        gradients.reverse();
        (gradients, error)
    }

    /// Clip and apply precomputed gradients
    pub fn apply_gradients(&mut self, mut gradients: Vec<LayerGradients>, learning_rate: f32) {
        self.clipper.clip(&mut gradients);
        for (slot, (layer, grads)) in self.layers.iter_mut().zip(gradients.iter()).enumerate() {
            self.optimizer.update_weights(slot, &mut layer.weights, &grads.weights, learning_rate);
            self.optimizer.update_biases(slot, &mut layer.biases, &grads.biases, learning_rate);
        }
        self.optimizer.step();
    }

    /// Regress outputs onto `targets`; returns the mean squared error before the step
    pub fn train_minibatch(&mut self, inputs: ArrayView2<f32>, targets: ArrayView2<f32>, learning_rate: f32) -> f32 {
        let (trace, outputs) = self.trace(inputs);
        let errors = &outputs - &targets;
        let loss = errors.mapv(|e| e * e).mean().unwrap_or(0.0);
        let scale = 1.0 / inputs.nrows().max(1) as f32;
        let (gradients, _) = self.backward(&trace, (errors * scale).view());
        self.apply_gradients(gradients, learning_rate);
        loss
    }

    /// Save the network, optimizer state included, with bincode
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let serialized = serialize(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(&serialized)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(deserialize(&buffer)?)
    }
}

impl FunctionApproximator for NeuralNetwork {
    fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.input_size())
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.output_size())
    }

    fn forward(&self, input: ArrayView1<f32>) -> Array1<f32> {
        let output = self.forward_batch(input.insert_axis(Axis(0)));
        output.index_axis_move(Axis(0), 0)
    }

    fn forward_batch(&self, inputs: ArrayView2<f32>) -> Array2<f32> {
        let mut current = inputs.to_owned();
        for layer in &self.layers {
            current = layer.forward_batch(current.view()).1;
        }
        current
    }

    fn input_gradients(&self, inputs: ArrayView2<f32>, output_gradients: ArrayView2<f32>) -> Array2<f32> {
        let (trace, _) = self.trace(inputs);
        self.backward(&trace, output_gradients).1
    }

    fn update(&mut self, inputs: ArrayView2<f32>, output_gradients: ArrayView2<f32>, learning_rate: f32) {
        let gradients = self.gradients(inputs, output_gradients);
        self.apply_gradients(gradients, learning_rate);
    }

    fn soft_update_from(&mut self, other: &Self, tau: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&tau) {
            return Err(MetisError::invalid_parameter("tau", format!("must be in [0, 1], got {}", tau)));
        }
        let shapes = |network: &NeuralNetwork| -> Vec<(usize, usize)> {
            network.layers.iter().map(|layer| layer.weights.dim()).collect()
        };
        if shapes(self) != shapes(other) {
            return Err(MetisError::dimension_mismatch(
                format!("{:?}", shapes(self)),
                format!("{:?}", shapes(other)),
            ));
        }
        for (target, source) in self.layers.iter_mut().zip(other.layers.iter()) {
            target.weights.zip_mut_with(&source.weights, |t, &s| *t = tau * s + (1.0 - tau) * *t);
            target.biases.zip_mut_with(&source.biases, |t, &s| *t = tau * s + (1.0 - tau) * *t);
        }
        Ok(())
    }
}
