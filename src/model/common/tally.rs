use std::collections::HashMap;

use super::ChoiceId;

/// Vote counts for the choices of a single question, counted live from the
/// stored votes. Choices nobody has voted for are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally(HashMap<ChoiceId, u64>);

impl Tally {
    /// Number of votes currently referencing `choice`.
    pub fn count(&self, choice: ChoiceId) -> u64 {
        self.0.get(&choice).copied().unwrap_or(0)
    }

    /// Total number of votes cast on the question.
    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

impl FromIterator<(ChoiceId, u64)> for Tally {
    fn from_iter<I: IntoIterator<Item = (ChoiceId, u64)>>(iter: I) -> Self {
        let mut counts = HashMap::new();
        for (choice, count) in iter {
            *counts.entry(choice).or_insert(0) += count;
        }
        Self(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_choices_count_zero() {
        let (a, b, c) = (ChoiceId::new(), ChoiceId::new(), ChoiceId::new());
        let tally: Tally = vec![(a, 2), (b, 1), (a, 1)].into_iter().collect();
        assert_eq!(tally.count(a), 3);
        assert_eq!(tally.count(b), 1);
        assert_eq!(tally.count(c), 0);
        assert_eq!(tally.total(), 4);
    }
}
