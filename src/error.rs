// =============================================================================
// Error taxonomy for per-symbol refresh failures
// =============================================================================
//
// Every variant here is recoverable and scoped to one symbol. The orchestrator
// absorbs them into that symbol's state; none of them stops a cycle.
// =============================================================================

use thiserror::Error;

/// Provider-side failure for a single request.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection failure, timeout, or body read error.
    #[error("request failed: {0}")]
    Transport(String),

    /// Provider answered with a non-2xx status.
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Payload could not be interpreted.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Provider returned zero candles for a symbol.
#[derive(Debug, Clone, Error)]
#[error("provider returned no candles for {symbol}")]
pub struct EmptyResultError {
    pub symbol: String,
}

/// Anything that can fail one symbol's refresh.
#[derive(Debug, Clone, Error)]
pub enum RefreshError {
    #[error("candles: {0}")]
    Candles(FetchError),

    #[error("ticker: {0}")]
    Ticker(FetchError),

    #[error(transparent)]
    Empty(#[from] EmptyResultError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_request() {
        let err = RefreshError::Ticker(FetchError::Status {
            status: 429,
            body: "too many requests".into(),
        });
        assert_eq!(err.to_string(), "ticker: provider returned 429: too many requests");

        let err: RefreshError = EmptyResultError {
            symbol: "BTCUSDT".into(),
        }
        .into();
        assert_eq!(err.to_string(), "provider returned no candles for BTCUSDT");
    }
}
