//! Rate-limit policy.

use serde::{Deserialize, Serialize};

/// One token bucket: `capacity` requests may burst, and the bucket refills
/// completely over `refill_window_secs`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
    /// Maximum tokens held, i.e. the burst size.
    pub capacity: u32,
    /// Seconds needed to refill an empty bucket to `capacity`.
    pub refill_window_secs: u64,
}

impl BucketConfig {
    /// Tokens regained per second.
    pub fn refill_per_sec(&self) -> f64 {
        if self.refill_window_secs == 0 {
            return f64::from(self.capacity);
        }
        f64::from(self.capacity) / self.refill_window_secs as f64
    }
}

/// Per-client-IP token buckets.
///
/// Webhook and signup endpoints get their own buckets so that a burst on
/// one cannot drain the budget of the other.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Carrier webhook endpoints.
    #[serde(default = "default_webhook_bucket")]
    pub webhook: BucketConfig,
    /// Pending signup creation.
    #[serde(default = "default_signup_bucket")]
    pub signup: BucketConfig,
    /// Everything else under `/api`.
    #[serde(default = "default_api_bucket")]
    pub default: BucketConfig,
}

fn default_webhook_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 100,
        refill_window_secs: 60,
    }
}

fn default_signup_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 5,
        refill_window_secs: 15 * 60,
    }
}

fn default_api_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 100,
        refill_window_secs: 15 * 60,
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            webhook: default_webhook_bucket(),
            signup: default_signup_bucket(),
            default: default_api_bucket(),
        }
    }
}
