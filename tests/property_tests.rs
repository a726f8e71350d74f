use metis::exploration::{argmax, greedy_action, ActionScores};
use metis::history::{HistorySummarizer, StackingSummarizer};
use metis::learner::{discounted_return, n_step_target};
use metis::replay_buffer::{ExperienceStore, FifoReplayBuffer, PrioritizedConfig, PrioritizedReplayBuffer, SampleParams};
use metis::types::{Action, ActionSpace, Transition};
use ndarray::{array, Array1};
use proptest::prelude::*;

fn transition(i: usize) -> Transition {
    Transition::new(array![i as f32], Action::Discrete(0), i as f32, array![i as f32 + 1.0], false, false)
}

fn finite_vec(max_len: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0f32..100.0, 1..=max_len)
}

proptest! {
    #[test]
    fn fifo_keeps_the_most_recent_pushes(capacity in 1usize..20, pushes in 0usize..60) {
        let mut buffer = FifoReplayBuffer::new(capacity, 0);
        for i in 0..pushes {
            buffer.push(transition(i));
        }
        prop_assert!(buffer.len() <= capacity);
        let kept: Vec<f32> = buffer.iter().map(|t| t.reward()).collect();
        let expected: Vec<f32> = (pushes.saturating_sub(capacity)..pushes).map(|i| i as f32).collect();
        prop_assert_eq!(kept, expected);
    }

    #[test]
    fn sampling_never_returns_a_short_batch(capacity in 1usize..16, pushes in 0usize..20, batch_size in 1usize..24) {
        let mut fifo = FifoReplayBuffer::new(capacity, 1);
        let mut prioritized = PrioritizedReplayBuffer::new(&PrioritizedConfig::default().capacity(capacity)).unwrap();
        for i in 0..pushes {
            fifo.push(transition(i));
            prioritized.push(transition(i));
        }
        let stores: [&mut dyn ExperienceStore; 2] = [&mut fifo, &mut prioritized];
        for store in stores {
            match store.sample(batch_size, &SampleParams::default()) {
                Ok(batch) => {
                    prop_assert!(batch_size <= store.len());
                    prop_assert_eq!(batch.len(), batch_size);
                    prop_assert_eq!(batch.indices().len(), batch_size);
                }
                Err(_) => prop_assert!(batch_size > store.len()),
            }
        }
    }

    #[test]
    fn prioritized_store_never_exceeds_capacity(capacity in 1usize..10, priorities in prop::collection::vec(0.0f32..10.0, 0..40)) {
        let mut buffer = PrioritizedReplayBuffer::new(&PrioritizedConfig::default().capacity(capacity)).unwrap();
        for (i, priority) in priorities.iter().enumerate() {
            buffer.push(transition(i));
            buffer.update_priorities(&[i], &[*priority]).unwrap();
            prop_assert!(buffer.len() <= capacity);
        }
    }

    #[test]
    fn argmax_is_a_lowest_maximum(values in finite_vec(12)) {
        let values = Array1::from(values);
        let best = argmax(&values).unwrap();
        prop_assert!(values.iter().all(|v| *v <= values[best]));
        prop_assert!(values.iter().take(best).all(|v| *v < values[best]));
    }

    #[test]
    fn greedy_continuous_action_is_inside_the_box(values in prop::collection::vec(-10.0f32..10.0, 3)) {
        let space = ActionSpace::continuous(array![-1.0, 0.0, -5.0], array![1.0, 2.0, 5.0]);
        let action = greedy_action(&ActionScores::new(Array1::from(values)), &space).unwrap();
        prop_assert!(space.contains(&action));
    }

    #[test]
    fn terminated_targets_ignore_the_bootstrap(rewards in finite_vec(8), gamma in 0.0f32..0.999, bootstrap in -50.0f32..50.0) {
        prop_assert_eq!(n_step_target(&rewards, gamma, bootstrap, true), discounted_return(&rewards, gamma));
        let open = n_step_target(&rewards, gamma, bootstrap, false);
        let expected = discounted_return(&rewards, gamma) + gamma.powi(rewards.len() as i32) * bootstrap;
        prop_assert!((open - expected).abs() <= 1e-3 * (1.0 + expected.abs()));
    }

    #[test]
    fn stacking_resets_to_a_fresh_state(history in prop::collection::vec(prop::collection::vec(-100.0f32..100.0, 2), 0..10), first in prop::collection::vec(-1.0f32..1.0, 2)) {
        let mut used = StackingSummarizer::new(2, 4).unwrap();
        for observation in &history {
            used.summarize(&Array1::from(observation.clone())).unwrap();
        }
        used.reset();
        let mut fresh = StackingSummarizer::new(2, 4).unwrap();
        let first = Array1::from(first);
        prop_assert_eq!(used.summarize(&first).unwrap(), fresh.summarize(&first).unwrap());
    }
}
