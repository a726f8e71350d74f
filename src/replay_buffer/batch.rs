use crate::types::Transition;

/// Per-call sampling overrides.
///
/// Fields left as `None` fall back to the store's configuration.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleParams {
    /// Importance-weight exponent for prioritized stores
    pub beta: Option<f32>,
    /// Sub-sequence length for sequential stores
    pub sequence_length: Option<usize>,
}

impl SampleParams {
    pub fn with_beta(mut self, beta: f32) -> Self {
        self.beta = Some(beta);
        self
    }

    pub fn with_sequence_length(mut self, length: usize) -> Self {
        self.sequence_length = Some(length);
        self
    }
}

/// A fixed-length, episode-respecting sub-trajectory.
///
/// Steps past the end of the episode segment are padded with `None`.
/// Padding only ever appears at the tail: once a `None` is seen every
/// following step is `None` too.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    steps: Vec<Option<Transition>>,
}

impl Sequence {
    pub fn new(steps: Vec<Option<Transition>>) -> Self {
        Sequence { steps }
    }

    /// All steps including padding
    pub fn steps(&self) -> &[Option<Transition>] {
        &self.steps
    }

    /// Requested length, padding included
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of real (non-padding) steps
    pub fn valid_len(&self) -> usize {
        self.steps.iter().take_while(|step| step.is_some()).count()
    }

    /// `true` for real steps, `false` for padding
    pub fn mask(&self) -> Vec<bool> {
        self.steps.iter().map(Option::is_some).collect()
    }

    /// Iterate over the real steps in order
    pub fn valid_steps(&self) -> impl Iterator<Item = &Transition> {
        self.steps.iter().map_while(Option::as_ref)
    }
}

/// Payload of a sampled batch
#[derive(Clone, Debug, PartialEq)]
pub enum BatchItems {
    Transitions(Vec<Transition>),
    Sequences(Vec<Sequence>),
}

/// A freshly sampled batch.
///
/// `indices` are opaque handles for [`ExperienceStore::update_priorities`](super::ExperienceStore::update_priorities);
/// they stay meaningful only for as long as the item is still stored.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    items: BatchItems,
    weights: Option<Vec<f32>>,
    indices: Vec<usize>,
}

impl Batch {
    pub fn new(items: BatchItems, weights: Option<Vec<f32>>, indices: Vec<usize>) -> Self {
        Batch { items, weights, indices }
    }

    /// Build an unweighted batch directly from transitions
    pub fn from_transitions(transitions: Vec<Transition>) -> Self {
        let indices = (0..transitions.len()).collect();
        Batch::new(BatchItems::Transitions(transitions), None, indices)
    }

    pub fn items(&self) -> &BatchItems {
        &self.items
    }

    pub fn len(&self) -> usize {
        match &self.items {
            BatchItems::Transitions(transitions) => transitions.len(),
            BatchItems::Sequences(sequences) => sequences.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn transitions(&self) -> Option<&[Transition]> {
        match &self.items {
            BatchItems::Transitions(transitions) => Some(transitions),
            BatchItems::Sequences(_) => None,
        }
    }

    pub fn sequences(&self) -> Option<&[Sequence]> {
        match &self.items {
            BatchItems::Transitions(_) => None,
            BatchItems::Sequences(sequences) => Some(sequences),
        }
    }

    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref()
    }

    /// Importance weight of item `i`, 1.0 when the batch is unweighted
    pub fn weight(&self, i: usize) -> f32 {
        self.weights
            .as_ref()
            .and_then(|weights| weights.get(i).copied())
            .unwrap_or(1.0)
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Flatten to `(item_index, transition)` pairs.
    ///
    /// Sequences contribute each of their real steps under the sequence's
    /// item index; padding is skipped.
    pub fn flat_transitions(&self) -> Vec<(usize, &Transition)> {
        match &self.items {
            BatchItems::Transitions(transitions) => transitions.iter().enumerate().collect(),
            BatchItems::Sequences(sequences) => sequences
                .iter()
                .enumerate()
                .flat_map(|(i, sequence)| sequence.valid_steps().map(move |t| (i, t)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Action;
    use ndarray::array;

    fn step(i: usize) -> Transition {
        Transition::new(array![i as f32], Action::Discrete(0), 0.0, array![(i + 1) as f32], false, false)
    }

    #[test]
    fn test_sequence_mask() {
        let sequence = Sequence::new(vec![Some(step(0)), Some(step(1)), None, None]);
        assert_eq!(sequence.len(), 4);
        assert_eq!(sequence.valid_len(), 2);
        assert_eq!(sequence.mask(), vec![true, true, false, false]);
        assert_eq!(sequence.valid_steps().count(), 2);
    }

    #[test]
    fn test_batch_weights_default_to_one() {
        let batch = Batch::from_transitions(vec![step(0), step(1)]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.weight(1), 1.0);
        assert!(batch.weights().is_none());
        assert!(batch.sequences().is_none());
    }

    #[test]
    fn test_flat_transitions_skip_padding() {
        let batch = Batch::new(
            BatchItems::Sequences(vec![
                Sequence::new(vec![Some(step(0)), None]),
                Sequence::new(vec![Some(step(4)), Some(step(5))]),
            ]),
            Some(vec![0.5, 1.0]),
            vec![0, 4],
        );
        let flat = batch.flat_transitions();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0].0, 0);
        assert_eq!(flat[2].0, 1);
        assert_eq!(batch.weight(0), 0.5);
    }
}
