use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Too many resting orders on the account
    #[error("open order limit exceeded: {0}")]
    OrderLimitExceeded(String),

    #[error("margin rejected: {0}")]
    MarginRejected(String),

    #[error("unknown symbol {0}")]
    UnknownSymbol(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("no position on {0}")]
    NoPosition(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

impl ExchangeError {
    /// Map a raw venue message onto the classified variants.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("order limit")
            || lower.contains("too many orders")
            || lower.contains("maximum number of orders")
        {
            ExchangeError::OrderLimitExceeded(message)
        } else if lower.contains("insufficient")
            || lower.contains("margin")
            || lower.contains("balance not enough")
        {
            ExchangeError::MarginRejected(message)
        } else {
            ExchangeError::Other(message)
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            ExchangeError::classify("Too many orders on this symbol"),
            ExchangeError::OrderLimitExceeded(_)
        ));
        assert!(matches!(
            ExchangeError::classify("Insufficient margin for order"),
            ExchangeError::MarginRejected(_)
        ));
        assert!(matches!(
            ExchangeError::classify("gateway hiccup"),
            ExchangeError::Other(_)
        ));
    }
}
