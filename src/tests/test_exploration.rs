use ndarray::array;

use crate::exploration::{ActionScores, EpsilonSchedule, ExplorationConfig, ExplorationStrategy};
use crate::learner::{LinearBanditConfig, LinearBanditLearner, PolicyLearner};
use crate::replay_buffer::Batch;
use crate::types::{Action, ActionSpace, Transition};

#[test]
fn test_epsilon_one_is_uniform_through_config() {
    let config = ExplorationConfig::EpsilonGreedy {
        schedule: EpsilonSchedule::Constant { epsilon: 1.0 },
        seed: 21,
    };
    let mut strategy = config.build().unwrap();
    let scores = ActionScores::new(array![5.0, 0.0, 0.0, 0.0]);
    let mut counts = [0usize; 4];
    for _ in 0..8000 {
        let action = strategy.select_action(&scores, &ActionSpace::discrete(4)).unwrap();
        counts[action.to_discrete().unwrap()] += 1;
    }
    for count in counts {
        assert!((1800..=2200).contains(&count), "counts {:?}", counts);
    }
}

#[test]
fn test_epsilon_zero_picks_lowest_index_on_ties() {
    let config = ExplorationConfig::EpsilonGreedy {
        schedule: EpsilonSchedule::Constant { epsilon: 0.0 },
        seed: 0,
    };
    let mut strategy = config.build().unwrap();
    let scores = ActionScores::new(array![0.5, 2.0, 2.0, 1.0]);
    for _ in 0..100 {
        let action = strategy.select_action(&scores, &ActionSpace::discrete(4)).unwrap();
        assert_eq!(action, Action::Discrete(1));
    }
}

#[test]
fn test_linear_schedule_reaches_floor() {
    let config = ExplorationConfig::EpsilonGreedy {
        schedule: EpsilonSchedule::Linear { start: 1.0, end: 0.1, steps: 10 },
        seed: 3,
    };
    let mut strategy = config.build().unwrap();
    let scores = ActionScores::new(array![1.0, 0.0]);
    for _ in 0..10 {
        strategy.select_action(&scores, &ActionSpace::discrete(2)).unwrap();
    }
    assert_eq!(strategy.steps(), 10);
    assert!((strategy.exploration_rate().unwrap() - 0.1).abs() < 1e-6);
}

#[test]
fn test_ucb_prefers_untried_arm_of_linear_bandit() {
    let mut learner = LinearBanditLearner::new(1, ActionSpace::discrete(2), &LinearBanditConfig::default()).unwrap();
    let context = array![1.0];
    let pulls: Vec<Transition> = (0..20)
        .map(|_| Transition::new(context.clone(), Action::Discrete(0), 0.5, context.clone(), true, false))
        .collect();
    learner.learn_batch(&Batch::from_transitions(pulls)).unwrap();

    let scores = learner.act(&context).unwrap();
    // greedy prefers the arm with a positive estimate
    assert!(scores.values[0] > scores.values[1]);

    let mut ucb = ExplorationConfig::Ucb { c: 2.0 }.build().unwrap();
    let action = ucb.select_action(&scores, learner.action_space()).unwrap();
    assert_eq!(action, Action::Discrete(1));
}

#[test]
fn test_thompson_without_uncertainty_is_rejected() {
    let mut strategy = ExplorationConfig::ThompsonSampling { seed: 1 }.build().unwrap();
    let result = strategy.select_action(&ActionScores::new(array![1.0, 0.0]), &ActionSpace::discrete(2));
    assert!(result.is_err());

    let certain = ActionScores::new(array![1.0, 0.0]).with_uncertainty(array![0.0, 0.0]);
    let action = strategy.select_action(&certain, &ActionSpace::discrete(2)).unwrap();
    assert_eq!(action, Action::Discrete(0));
}

#[test]
fn test_ou_noise_through_config_stays_in_box() {
    let config = ExplorationConfig::OrnsteinUhlenbeck { theta: 0.15, sigma: 3.0, dt: 1.0, seed: 6 };
    let mut strategy = config.build().unwrap();
    let space = ActionSpace::continuous(array![-2.0], array![2.0]);
    for _ in 0..100 {
        let action = strategy.select_action(&ActionScores::new(array![0.0]), &space).unwrap();
        assert!(space.contains(&action));
    }
}
