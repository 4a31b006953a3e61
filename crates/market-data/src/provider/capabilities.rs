//! Provider descriptors and rate limiting configuration.

use std::time::Duration;

use serde::Serialize;

use crate::models::ProviderId;

/// Rate limiting configuration for a provider.
///
/// Controls how aggressively we can call a provider to avoid
/// hitting their rate limits and getting blocked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum requests allowed per minute.
    pub requests_per_minute: u32,
}

impl RateLimit {
    pub const fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

/// Static per-provider settings, loaded once at startup.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    /// Lower values are tried first.
    pub priority: u32,
    /// Per-attempt timeout.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    /// Informational weight reported by status; does not affect ordering.
    pub weight: u32,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<ProviderId>, priority: u32, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            priority,
            timeout,
            weight: 1,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}
