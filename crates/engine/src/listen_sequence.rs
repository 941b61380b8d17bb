//! Listen sequence numbers
//!
//! One counter per persistence instance. It is only advanced under the
//! transaction guard, so two transactions never observe the same number.

use docsync_core::ListenSequenceNumber;

/// Strictly increasing source of listen sequence numbers
#[derive(Debug, Clone, Default)]
pub struct ListenSequence {
    previous: ListenSequenceNumber,
}

impl ListenSequence {
    /// Continue after `previous`, the highest number already handed out
    pub fn new(previous: ListenSequenceNumber) -> Self {
        Self {
            previous: previous.max(0),
        }
    }

    /// Most recently issued number, 0 if none
    pub fn current(&self) -> ListenSequenceNumber {
        self.previous
    }

    pub fn next(&mut self) -> ListenSequenceNumber {
        self.previous += 1;
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_increase_from_previous() {
        let mut seq = ListenSequence::new(41);
        assert_eq!(seq.current(), 41);
        assert_eq!(seq.next(), 42);
        assert_eq!(seq.next(), 43);
    }

    #[test]
    fn test_invalid_previous_starts_at_zero() {
        let mut seq = ListenSequence::new(docsync_core::INVALID_SEQUENCE_NUMBER);
        assert_eq!(seq.next(), 1);
    }
}
