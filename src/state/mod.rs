//! Persistent limiter state.
//!
//! A [`LimiterState`] is the record a [`Storage`](crate::storage::Storage)
//! backend keeps per subject key. Backends may encode it however they like
//! (it derives `Serialize`/`Deserialize`), as long as every numeric field
//! survives the round trip exactly.

mod bucket;
mod window;

pub use bucket::TokenBucketState;
pub use window::Window;

use serde::{Deserialize, Serialize};

/// Record stored for one subject key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterState {
    /// Fixed or sliding window counter.
    Window(Window),
    /// Token bucket fill level.
    TokenBucket(TokenBucketState),
}

impl LimiterState {
    /// Subject key the record belongs to.
    pub fn id(&self) -> &str {
        match self {
            Self::Window(w) => w.id(),
            Self::TokenBucket(b) => b.id(),
        }
    }

    /// The window, if this is a window record.
    pub fn as_window(&self) -> Option<&Window> {
        match self {
            Self::Window(w) => Some(w),
            Self::TokenBucket(_) => None,
        }
    }

    /// The bucket, if this is a token bucket record.
    pub fn as_token_bucket(&self) -> Option<&TokenBucketState> {
        match self {
            Self::TokenBucket(b) => Some(b),
            Self::Window(_) => None,
        }
    }

    pub(crate) fn into_window(self) -> Option<Window> {
        match self {
            Self::Window(w) => Some(w),
            Self::TokenBucket(_) => None,
        }
    }

    pub(crate) fn into_token_bucket(self) -> Option<TokenBucketState> {
        match self {
            Self::TokenBucket(b) => Some(b),
            Self::Window(_) => None,
        }
    }
}

impl From<Window> for LimiterState {
    fn from(window: Window) -> Self {
        Self::Window(window)
    }
}

impl From<TokenBucketState> for LimiterState {
    fn from(bucket: TokenBucketState) -> Self {
        Self::TokenBucket(bucket)
    }
}
