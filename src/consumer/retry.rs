//! Retry strategy: whether a recoverably-failed message is requeued.

/// Decides, from a message's current retry count, whether one more requeue
/// is allowed. Only recoverable handler failures consult this; fatal
/// failures and infrastructure errors never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// Never requeue
    #[default]
    NoRetry,
    /// Requeue while the retry count is below the limit
    MaxRetries(u32),
}

impl RetryStrategy {
    /// Whether a message that has already been retried `retry_count` times
    /// may be requeued once more.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        match self {
            Self::NoRetry => false,
            Self::MaxRetries(limit) => retry_count < *limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry_never_retries() {
        let strategy = RetryStrategy::NoRetry;
        assert!(!strategy.should_retry(0));
        assert!(!strategy.should_retry(5));
    }

    #[test]
    fn test_max_retries_honors_limit() {
        let strategy = RetryStrategy::MaxRetries(2);
        assert!(strategy.should_retry(0));
        assert!(strategy.should_retry(1));
        assert!(!strategy.should_retry(2));
        assert!(!strategy.should_retry(3));
    }

    #[test]
    fn test_zero_limit_behaves_like_no_retry() {
        assert!(!RetryStrategy::MaxRetries(0).should_retry(0));
    }
}
