pub mod dense;
pub mod initialization;

pub use dense::{DenseLayer, LayerGradients};
pub use initialization::WeightInit;
