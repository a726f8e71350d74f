pub mod test_exploration;
pub mod test_learners;
