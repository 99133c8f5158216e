use std::collections::VecDeque;
use std::fmt;

use time::OffsetDateTime;
use time::macros::format_description;

/// Ordering token for one armed callback. Sequence numbers are handed out
/// monotonically per scheduler, so two tokens never collide even when armed
/// within the same second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackToken {
    pub seq: u64,
    pub armed_at: OffsetDateTime,
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = self
            .armed_at
            .format(format_description!(
                "[year][month][day][hour][minute][second]"
            ))
            .map_err(|_| fmt::Error)?;
        write!(f, "{stamp}-{}", self.seq)
    }
}

/// FIFO of armed callbacks. The head is the only token allowed to run.
#[derive(Debug, Default)]
pub struct CallbackQueue {
    inner: VecDeque<CallbackToken>,
}

impl CallbackQueue {
    pub fn enqueue(&mut self, token: CallbackToken) {
        self.inner.push_back(token);
    }

    pub fn head(&self) -> Option<u64> {
        self.inner.front().map(|token| token.seq)
    }

    /// Removes `seq` wherever it sits. Normally it is the head; a token that
    /// was abandoned before its turn is removed from the middle.
    pub fn remove(&mut self, seq: u64) -> Option<CallbackToken> {
        let position = self.inner.iter().position(|token| token.seq == seq)?;
        self.inner.remove(position)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(seq: u64) -> CallbackToken {
        CallbackToken {
            seq,
            armed_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = CallbackQueue::default();
        queue.enqueue(token(1));
        queue.enqueue(token(2));

        assert_eq!(queue.head(), Some(1));
        assert_eq!(queue.remove(1).map(|t| t.seq), Some(1));
        assert_eq!(queue.head(), Some(2));
        queue.remove(2);
        assert!(queue.is_empty());
    }

    #[test]
    fn removing_abandoned_token_keeps_head() {
        let mut queue = CallbackQueue::default();
        queue.enqueue(token(1));
        queue.enqueue(token(2));
        queue.enqueue(token(3));

        queue.remove(2);
        assert_eq!(queue.head(), Some(1));
        assert_eq!(queue.len(), 2);
        assert!(queue.remove(9).is_none());
    }

    #[test]
    fn token_display_uses_arming_time() {
        assert_eq!(token(4).to_string(), "19700101000000-4");
    }
}
