use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::layers::LayerGradients;

/// Gradient clipping methods
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientClipper {
    /// Clip every component into `[min, max]`
    ClipByValue { min: f32, max: f32 },

    /// Rescale each tensor whose norm exceeds `max_norm`
    ClipByNorm { max_norm: f32 },

    /// Rescale all tensors together when their joint norm exceeds `max_norm`
    ClipByGlobalNorm { max_norm: f32 },

    None,
}

impl Default for GradientClipper {
    fn default() -> Self {
        GradientClipper::None
    }
}

fn squared_norm<'a, I: IntoIterator<Item = &'a f32>>(values: I) -> f32 {
    values.into_iter().map(|&x| x * x).sum()
}

impl GradientClipper {
    /// Clip the gradients of a whole network in place
    pub fn clip(&self, gradients: &mut [LayerGradients]) {
        match *self {
            GradientClipper::ClipByGlobalNorm { max_norm } => {
                let global_norm = Self::compute_global_norm(gradients);
                if global_norm > max_norm {
                    let scale = max_norm / global_norm;
                    for layer in gradients.iter_mut() {
                        layer.weights.mapv_inplace(|g| g * scale);
                        layer.biases.mapv_inplace(|g| g * scale);
                    }
                }
            }
            GradientClipper::None => {}
            _ => {
                for layer in gradients.iter_mut() {
                    self.clip_weights(&mut layer.weights);
                    self.clip_biases(&mut layer.biases);
                }
            }
        }
    }

    /// Clip weight gradients. Global-norm clipping needs every tensor and is
    /// a no-op here; use [`clip`](Self::clip).
    pub fn clip_weights(&self, gradients: &mut Array2<f32>) {
        match *self {
            GradientClipper::ClipByValue { min, max } => gradients.mapv_inplace(|g| g.max(min).min(max)),
            GradientClipper::ClipByNorm { max_norm } => {
                let norm = squared_norm(gradients.iter()).sqrt();
                if norm > max_norm {
                    let scale = max_norm / norm;
                    gradients.mapv_inplace(|g| g * scale);
                }
            }
            GradientClipper::ClipByGlobalNorm { .. } | GradientClipper::None => {}
        }
    }

    pub fn clip_biases(&self, gradients: &mut Array1<f32>) {
        match *self {
            GradientClipper::ClipByValue { min, max } => gradients.mapv_inplace(|g| g.max(min).min(max)),
            GradientClipper::ClipByNorm { max_norm } => {
                let norm = squared_norm(gradients.iter()).sqrt();
                if norm > max_norm {
                    let scale = max_norm / norm;
                    gradients.mapv_inplace(|g| g * scale);
                }
            }
            GradientClipper::ClipByGlobalNorm { .. } | GradientClipper::None => {}
        }
    }

    /// L2 norm over every weight and bias gradient
    pub fn compute_global_norm(gradients: &[LayerGradients]) -> f32 {
        gradients
            .iter()
            .map(|layer| squared_norm(layer.weights.iter()) + squared_norm(layer.biases.iter()))
            .sum::<f32>()
            .sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grads() -> Vec<LayerGradients> {
        vec![
            LayerGradients {
                weights: array![[3.0]],
                biases: array![0.0],
            },
            LayerGradients {
                weights: array![[0.0]],
                biases: array![4.0],
            },
        ]
    }

    #[test]
    fn test_global_norm_clipping() {
        let mut gradients = grads();
        assert_eq!(GradientClipper::compute_global_norm(&gradients), 5.0);
        GradientClipper::ClipByGlobalNorm { max_norm: 1.0 }.clip(&mut gradients);
        assert!((GradientClipper::compute_global_norm(&gradients) - 1.0).abs() < 1e-6);
        assert!((gradients[0].weights[[0, 0]] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_value_clipping() {
        let mut gradients = grads();
        GradientClipper::ClipByValue { min: -1.0, max: 1.0 }.clip(&mut gradients);
        assert_eq!(gradients[0].weights[[0, 0]], 1.0);
        assert_eq!(gradients[1].biases[0], 1.0);
    }

    #[test]
    fn test_none_leaves_gradients() {
        let mut gradients = grads();
        GradientClipper::None.clip(&mut gradients);
        assert_eq!(gradients[1].biases[0], 4.0);
    }
}
