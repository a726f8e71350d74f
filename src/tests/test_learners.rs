use ndarray::array;

use crate::learner::{
    ActorCriticConfig, DeepBanditConfig, DqnConfig, DqnLearner, LearnerConfig, LearnerWrapper, PolicyLearner,
    TargetUpdate, TdLoss,
};
use crate::optimizer::OptimizerConfig;
use crate::replay_buffer::{Batch, BatchItems, Sequence};
use crate::types::{Action, ActionSpace, Transition};

fn step(s: f32, action: usize, reward: f32, terminated: bool) -> Transition {
    Transition::new(array![s], Action::Discrete(action), reward, array![s + 1.0], terminated, false)
}

#[test]
fn test_learner_config_yaml() {
    let yaml = "kind: dqn\nhidden_sizes: [8]\nloss:\n  huber:\n    delta: 1.0\ntarget_update:\n  soft:\n    tau: 0.01\n";
    let config: LearnerConfig = serde_yaml::from_str(yaml).unwrap();
    match &config {
        LearnerConfig::Dqn(dqn) => {
            assert_eq!(dqn.hidden_sizes, vec![8]);
            assert_eq!(dqn.loss, TdLoss::Huber { delta: 1.0 });
            assert_eq!(dqn.target_update, TargetUpdate::Soft { tau: 0.01 });
        }
        other => panic!("unexpected config {:?}", other),
    }
    let learner = config.build(3, &ActionSpace::discrete(2)).unwrap();
    assert_eq!(learner.act(&array![0.0, 0.0, 0.0]).unwrap().values.len(), 2);
}

#[test]
fn test_learners_reject_continuous_spaces() {
    let space = ActionSpace::continuous(array![-1.0], array![1.0]);
    for config in [
        LearnerConfig::Dqn(DqnConfig::default()),
        LearnerConfig::ActorCritic(ActorCriticConfig::default()),
        LearnerConfig::DeepBandit(DeepBanditConfig::default()),
    ] {
        assert!(config.build(2, &space).is_err());
    }
}

#[test]
fn test_network_learners_from_yaml() {
    let yaml = "kind: deep_bandit\nhidden_sizes: [4]\nhidden_activation: Tanh\nweight_init: XavierNormal\n";
    let bandit: LearnerConfig = serde_yaml::from_str(yaml).unwrap();
    let learner = bandit.build(2, &ActionSpace::discrete(3)).unwrap();
    assert!(matches!(learner, LearnerWrapper::DeepBandit(_)));
    assert_eq!(learner.act(&array![0.5, -0.5]).unwrap().values.len(), 3);

    let yaml = "kind: td3\nhidden_sizes: [4]\npolicy_delay: 3\ntarget_update:\n  hard:\n    every: 10\n";
    let td3: LearnerConfig = serde_yaml::from_str(yaml).unwrap();
    let space = ActionSpace::continuous(array![-1.0, 0.0], array![1.0, 4.0]);
    let learner = td3.build(2, &space).unwrap();
    let proposal = learner.act(&array![0.5, -0.5]).unwrap().values;
    assert!(space.contains(&Action::Continuous(proposal)));
    assert!(td3.build(2, &ActionSpace::discrete(2)).is_err());
}

#[test]
fn test_dqn_learns_from_sequences() {
    let config = DqnConfig::default()
        .hidden_sizes(&[16])
        .learning_rate(0.02)
        .optimizer(OptimizerConfig::Sgd)
        .seed(9);
    let mut learner = DqnLearner::new(1, ActionSpace::discrete(2), &config).unwrap();

    let batch = Batch::new(
        BatchItems::Sequences(vec![
            Sequence::new(vec![Some(step(0.0, 1, 1.0, false)), Some(step(1.0, 0, 1.0, true)), None]),
            Sequence::new(vec![Some(step(1.0, 0, 1.0, true)), None, None]),
        ]),
        None,
        vec![0, 1],
    );
    let first = learner.learn_batch(&batch).unwrap();
    assert_eq!(first.td_errors.len(), 2);
    let mut last = first.loss;
    for _ in 0..300 {
        last = learner.learn_batch(&batch).unwrap().loss;
    }
    assert!(last < first.loss);
    assert_eq!(learner.learn_steps(), 301);
}
