pub mod gradient_clipper;

use ndarray::{Array, Array1, Array2, Dimension, Zip};
use serde::{Deserialize, Serialize};

pub use gradient_clipper::GradientClipper;

/// Parameter update rule.
///
/// `slot` identifies the parameter tensor (one per layer); stateful
/// optimizers keep their moment estimates per slot. Call [`step`](Self::step)
/// once after every slot of a network has been updated.
pub trait Optimizer {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32);
    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32);
    fn step(&mut self) {}
}

/// Optimizer selection, tagged by `kind` in config files
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd,
    Adam {
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
        /// Decoupled weight decay (AdamW); 0 disables it
        #[serde(default)]
        weight_decay: f32,
    },
    RmsProp {
        #[serde(default = "default_rms_beta")]
        beta: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_rms_beta() -> f32 {
    0.9
}

fn default_epsilon() -> f32 {
    1e-8
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam {
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
            weight_decay: 0.0,
        }
    }
}

impl OptimizerConfig {
    pub fn build(&self) -> OptimizerWrapper {
        match *self {
            OptimizerConfig::Sgd => OptimizerWrapper::SGD(SGD::new()),
            OptimizerConfig::Adam { beta1, beta2, epsilon, weight_decay } => {
                OptimizerWrapper::Adam(Adam::new(beta1, beta2, epsilon).with_weight_decay(weight_decay))
            }
            OptimizerConfig::RmsProp { beta, epsilon } => OptimizerWrapper::RMSProp(RMSProp::new(beta, epsilon)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum OptimizerWrapper {
    SGD(SGD),
    Adam(Adam),
    RMSProp(RMSProp),
}

impl Optimizer for OptimizerWrapper {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
            OptimizerWrapper::RMSProp(optimizer) => optimizer.update_weights(slot, weights, gradients, learning_rate),
        }
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::Adam(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
            OptimizerWrapper::RMSProp(optimizer) => optimizer.update_biases(slot, biases, gradients, learning_rate),
        }
    }

    fn step(&mut self) {
        match self {
            OptimizerWrapper::SGD(optimizer) => optimizer.step(),
            OptimizerWrapper::Adam(optimizer) => optimizer.step(),
            OptimizerWrapper::RMSProp(optimizer) => optimizer.step(),
        }
    }
}

/// Zero-initialized state for `slot`, allocated on first use
fn slot_state<D: Dimension>(states: &mut Vec<Option<Array<f32, D>>>, slot: usize, dim: D) -> &mut Array<f32, D> {
    if states.len() <= slot {
        states.resize(slot + 1, None);
    }
    let stale = states[slot].as_ref().map_or(true, |state| state.raw_dim() != dim);
    if stale {
        states[slot] = None;
    }
    states[slot].get_or_insert_with(|| Array::zeros(dim))
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct SGD;

impl SGD {
    pub fn new() -> SGD {
        SGD
    }
}

impl Optimizer for SGD {
    fn update_weights(&mut self, _slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        weights.zip_mut_with(gradients, |w, &g| *w -= learning_rate * g);
    }

    fn update_biases(&mut self, _slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        biases.zip_mut_with(gradients, |b, &g| *b -= learning_rate * g);
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Adam {
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    pub weight_decay: f32,
    m_weights: Vec<Option<Array2<f32>>>,
    v_weights: Vec<Option<Array2<f32>>>,
    m_biases: Vec<Option<Array1<f32>>>,
    v_biases: Vec<Option<Array1<f32>>>,
    /// 1-based timestep used for bias correction
    pub t: usize,
}

impl Adam {
    pub fn new(beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            beta1,
            beta2,
            epsilon,
            weight_decay: 0.0,
            m_weights: Vec::new(),
            v_weights: Vec::new(),
            m_biases: Vec::new(),
            v_biases: Vec::new(),
            t: 1,
        }
    }

    pub fn with_weight_decay(mut self, weight_decay: f32) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    fn corrections(&self) -> (f32, f32) {
        (
            1.0 - self.beta1.powi(self.t as i32),
            1.0 - self.beta2.powi(self.t as i32),
        )
    }
}

impl Default for Adam {
    fn default() -> Self {
        Self::new(0.9, 0.999, 1e-8)
    }
}

impl Optimizer for Adam {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let (c1, c2) = self.corrections();

        let m = slot_state(&mut self.m_weights, slot, weights.raw_dim());
        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        let v = slot_state(&mut self.v_weights, slot, weights.raw_dim());
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        if self.weight_decay > 0.0 {
            let decay = 1.0 - learning_rate * self.weight_decay;
            weights.mapv_inplace(|w| w * decay);
        }
        Zip::from(weights).and(&*m).and(&*v).for_each(|w, &m, &v| {
            *w -= learning_rate * (m / c1) / ((v / c2).sqrt() + epsilon);
        });
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let (c1, c2) = self.corrections();

        let m = slot_state(&mut self.m_biases, slot, biases.raw_dim());
        m.zip_mut_with(gradients, |m, &g| *m = beta1 * *m + (1.0 - beta1) * g);
        let v = slot_state(&mut self.v_biases, slot, biases.raw_dim());
        v.zip_mut_with(gradients, |v, &g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        Zip::from(biases).and(&*m).and(&*v).for_each(|b, &m, &v| {
            *b -= learning_rate * (m / c1) / ((v / c2).sqrt() + epsilon);
        });
    }

    fn step(&mut self) {
        self.t += 1;
    }
}

/// RMSProp optimizer
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RMSProp {
    pub beta: f32,
    pub epsilon: f32,
    v_weights: Vec<Option<Array2<f32>>>,
    v_biases: Vec<Option<Array1<f32>>>,
}

impl RMSProp {
    pub fn new(beta: f32, epsilon: f32) -> Self {
        RMSProp {
            beta,
            epsilon,
            v_weights: Vec::new(),
            v_biases: Vec::new(),
        }
    }
}

impl Default for RMSProp {
    fn default() -> Self {
        Self::new(0.9, 1e-8)
    }
}

impl Optimizer for RMSProp {
    fn update_weights(&mut self, slot: usize, weights: &mut Array2<f32>, gradients: &Array2<f32>, learning_rate: f32) {
        let (beta, epsilon) = (self.beta, self.epsilon);
        let v = slot_state(&mut self.v_weights, slot, weights.raw_dim());
        v.zip_mut_with(gradients, |v, &g| *v = beta * *v + (1.0 - beta) * g * g);
        Zip::from(weights).and(gradients).and(&*v).for_each(|w, &g, &v| {
            *w -= learning_rate * g / (v.sqrt() + epsilon);
        });
    }

    fn update_biases(&mut self, slot: usize, biases: &mut Array1<f32>, gradients: &Array1<f32>, learning_rate: f32) {
        let (beta, epsilon) = (self.beta, self.epsilon);
        let v = slot_state(&mut self.v_biases, slot, biases.raw_dim());
        v.zip_mut_with(gradients, |v, &g| *v = beta * *v + (1.0 - beta) * g * g);
        Zip::from(biases).and(gradients).and(&*v).for_each(|b, &g, &v| {
            *b -= learning_rate * g / (v.sqrt() + epsilon);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sgd_step() {
        let mut sgd = SGD::new();
        let mut w = array![[1.0, 2.0]];
        sgd.update_weights(0, &mut w, &array![[1.0, -1.0]], 0.5);
        assert_eq!(w, array![[0.5, 2.5]]);
    }

    #[test]
    fn test_adam_first_step_is_learning_rate_sized() {
        let mut adam = Adam::default();
        let mut w = array![[0.0, 0.0]];
        adam.update_weights(0, &mut w, &array![[4.0, -0.1]], 0.01);
        // Bias-corrected first step is lr * sign(g)
        assert!((w[[0, 0]] + 0.01).abs() < 1e-4);
        assert!((w[[0, 1]] - 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_adam_slots_are_independent() {
        let mut adam = Adam::default();
        let mut a = array![[0.0]];
        let mut b = array![[0.0, 0.0, 0.0]];
        adam.update_weights(0, &mut a, &array![[1.0]], 0.1);
        adam.update_weights(3, &mut b, &array![[1.0, 1.0, 1.0]], 0.1);
        adam.step();
        adam.update_weights(0, &mut a, &array![[1.0]], 0.1);
        assert!(a[[0, 0]] < -0.19);
        assert_eq!(adam.t, 2);
    }

    #[test]
    fn test_rmsprop_descends() {
        let mut rms = RMSProp::default();
        let mut b = array![1.0];
        for _ in 0..10 {
            let grad = b.clone();
            rms.update_biases(0, &mut b, &grad, 0.01);
        }
        assert!(b[0] < 1.0);
    }

    #[test]
    fn test_config_yaml() {
        let config: OptimizerConfig = serde_yaml::from_str("kind: adam\nweight_decay: 0.01\n").unwrap();
        match config.build() {
            OptimizerWrapper::Adam(adam) => {
                assert_eq!(adam.beta1, 0.9);
                assert_eq!(adam.weight_decay, 0.01);
            }
            other => panic!("unexpected optimizer {:?}", other),
        }
    }
}
