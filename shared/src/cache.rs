//! Freshness tiers for API responses.
//!
//! Every route group is assigned a tier; the tier decides the
//! `Cache-Control` header clients see and how aggressively they refetch.

use std::time::Duration;

use serde::Serialize;

string_enum! {
    pub enum CacheTier {
        Static => "static",
        Master => "master",
        Dynamic => "dynamic",
        Live => "live",
        Search => "search",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    #[serde(with = "secs")]
    pub stale_time: Duration,
    #[serde(with = "secs")]
    pub gc_time: Duration,
    pub refetch_on_window_focus: bool,
    pub refetch_on_mount: bool,
    pub refetch_on_reconnect: bool,
    #[serde(with = "opt_secs")]
    pub refetch_interval: Option<Duration>,
}

mod secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

mod opt_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }
}

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

impl CacheTier {
    pub fn policy(&self) -> CachePolicy {
        match self {
            CacheTier::Static => CachePolicy {
                stale_time: minutes(30),
                gc_time: minutes(120),
                refetch_on_window_focus: false,
                refetch_on_mount: false,
                refetch_on_reconnect: false,
                refetch_interval: None,
            },
            CacheTier::Master => CachePolicy {
                stale_time: minutes(10),
                gc_time: minutes(30),
                refetch_on_window_focus: false,
                refetch_on_mount: false,
                refetch_on_reconnect: true,
                refetch_interval: None,
            },
            CacheTier::Dynamic => CachePolicy {
                stale_time: minutes(2),
                gc_time: minutes(5),
                refetch_on_window_focus: true,
                refetch_on_mount: true,
                refetch_on_reconnect: true,
                refetch_interval: None,
            },
            CacheTier::Live => CachePolicy {
                stale_time: Duration::from_secs(30),
                gc_time: minutes(2),
                refetch_on_window_focus: true,
                refetch_on_mount: true,
                refetch_on_reconnect: true,
                refetch_interval: Some(minutes(1)),
            },
            CacheTier::Search => CachePolicy {
                stale_time: minutes(5),
                gc_time: minutes(10),
                refetch_on_window_focus: false,
                refetch_on_mount: false,
                refetch_on_reconnect: true,
                refetch_interval: None,
            },
        }
    }

    /// `Cache-Control` value for responses in this tier.
    pub fn cache_control(&self) -> String {
        let policy = self.policy();
        let stale = policy.stale_time.as_secs();
        let revalidate = policy.gc_time.as_secs().saturating_sub(stale);
        let mut value = format!(
            "private, max-age={}, stale-while-revalidate={}",
            stale, revalidate
        );
        if *self == CacheTier::Live {
            value.push_str(", must-revalidate");
        }
        value
    }
}

/// Whether a client should retry a failed request: never on 401/403.
pub fn is_retryable(status: u16) -> bool {
    !matches!(status, 401 | 403)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_header_values() {
        assert_eq!(
            CacheTier::Static.cache_control(),
            "private, max-age=1800, stale-while-revalidate=5400"
        );
        assert_eq!(
            CacheTier::Live.cache_control(),
            "private, max-age=30, stale-while-revalidate=90, must-revalidate"
        );
        assert_eq!(
            CacheTier::Search.cache_control(),
            "private, max-age=300, stale-while-revalidate=300"
        );
    }

    #[test]
    fn only_live_polls() {
        for tier in CacheTier::ALL {
            let policy = tier.policy();
            assert_eq!(policy.refetch_interval.is_some(), *tier == CacheTier::Live);
            assert!(policy.stale_time < policy.gc_time);
        }
        assert!(CacheTier::Master.policy().refetch_on_reconnect);
        assert!(!CacheTier::Master.policy().refetch_on_window_focus);
    }

    #[test]
    fn auth_failures_are_not_retried() {
        assert!(!is_retryable(401));
        assert!(!is_retryable(403));
        assert!(is_retryable(500));
        assert!(is_retryable(409));
    }
}
