//! # Activation Functions Module
//!
//! Element-wise non-linearities for the dense layers of [`NeuralNetwork`](crate::network::NeuralNetwork).
//!
//! ## Available Activations
//!
//! - **ReLU**: `max(0, x)`, the default for hidden layers
//! - **Linear**: identity, used on value and logit heads
//! - **Sigmoid**: `1 / (1 + e^(-x))`
//! - **Tanh**: hyperbolic tangent, also used by the recurrent history summarizer
//! - **LeakyReLU**: ReLU with a small negative slope
//! - **ELU**: smooth alternative to ReLU

pub mod functions;

pub use functions::Activation;
