//! Aggregation of streamed text fragments into turns

/// Collects the text fragments of the currently open turn
///
/// A turn opens with its first fragment and closes on [`finish`](Self::finish);
/// fragments pushed after that belong to a new turn.
#[derive(Debug, Default)]
pub struct TurnAggregator {
    fragments: Vec<String>,
}

impl TurnAggregator {
    /// Create an empty aggregator with no open turn
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    /// Append a fragment to the open turn
    ///
    /// Returns `true` if this fragment opened a new turn
    pub fn push(&mut self, fragment: impl Into<String>) -> bool {
        let opened = self.fragments.is_empty();
        self.fragments.push(fragment.into());
        opened
    }

    /// Whether a turn is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.fragments.is_empty()
    }

    /// Number of fragments in the open turn
    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether no fragments have been collected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Close the open turn and return its full text
    ///
    /// Returns `None` when no turn is open.
    pub fn finish(&mut self) -> Option<String> {
        if self.fragments.is_empty() {
            return None;
        }
        let text = self.fragments.concat();
        self.fragments.clear();
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenates_in_arrival_order() {
        let mut turn = TurnAggregator::new();
        assert!(turn.push("Good "));
        assert!(!turn.push("morning"));
        assert!(!turn.push(", Lin!"));
        assert_eq!(turn.len(), 3);
        assert_eq!(turn.finish().as_deref(), Some("Good morning, Lin!"));
    }

    #[test]
    fn test_finish_without_open_turn() {
        let mut turn = TurnAggregator::new();
        assert!(!turn.is_open());
        assert_eq!(turn.finish(), None);
    }

    #[test]
    fn test_fragments_after_close_start_new_turn() {
        let mut turn = TurnAggregator::new();
        turn.push("first");
        assert_eq!(turn.finish().as_deref(), Some("first"));
        assert!(turn.is_empty());

        assert!(turn.push("second"));
        assert_eq!(turn.finish().as_deref(), Some("second"));
    }
}
