//! Discounted return helpers shared by the learners.

/// `sum_k gamma^k * r_k`
pub fn discounted_return(rewards: &[f32], gamma: f32) -> f32 {
    rewards.iter().rev().fold(0.0, |acc, &r| r + gamma * acc)
}

/// n-step bootstrapped target over `rewards.len()` steps.
///
/// A terminated segment contributes no bootstrap; a truncated or unfinished
/// one still bootstraps from `bootstrap_value`.
pub fn n_step_target(rewards: &[f32], gamma: f32, bootstrap_value: f32, terminated: bool) -> f32 {
    let partial = discounted_return(rewards, gamma);
    if terminated {
        partial
    } else {
        partial + gamma.powi(rewards.len() as i32) * bootstrap_value
    }
}
