use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;

use crate::config::ProxyConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    ScraperApi,
    Regular,
    None,
}

/// One rung of the fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Strategy {
    pub use_proxy: bool,
    pub delay: bool,
    pub proxy_kind: ProxyKind,
}

impl Strategy {
    pub const fn direct(delay: bool) -> Self {
        Self {
            use_proxy: false,
            delay,
            proxy_kind: ProxyKind::None,
        }
    }

    pub const fn proxied(kind: ProxyKind, delay: bool) -> Self {
        Self {
            use_proxy: true,
            delay,
            proxy_kind: kind,
        }
    }

    pub fn resolve_proxy(&self, proxies: &ProxyConfig) -> Route {
        if !self.use_proxy {
            return Route::Direct;
        }
        let url = match self.proxy_kind {
            ProxyKind::ScraperApi => proxies.premium_proxy_url(),
            ProxyKind::Regular => proxies.random_plain_proxy(),
            ProxyKind::None => None,
        };
        url.map_or(Route::Unavailable, Route::Proxy)
    }
}

/// How an attempt reaches the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct,
    Proxy(String),
    /// The entry wants a proxy the configuration cannot supply.
    Unavailable,
}

fn preferred_kind(proxies: &ProxyConfig) -> ProxyKind {
    if proxies.has_premium() {
        ProxyKind::ScraperApi
    } else if !proxies.proxy_urls.is_empty() {
        ProxyKind::Regular
    } else {
        ProxyKind::None
    }
}

/// Proxy without delay, proxy with delay, direct, direct with delay.
pub fn default_ladder(proxies: &ProxyConfig) -> Vec<Strategy> {
    let kind = preferred_kind(proxies);
    vec![
        Strategy::proxied(kind, false),
        Strategy::proxied(kind, true),
        Strategy::direct(false),
        Strategy::direct(true),
    ]
}

/// Random pause drawn from an inclusive range of seconds.
#[derive(Debug, Clone)]
pub struct Jitter {
    range_secs: RangeInclusive<f64>,
}

impl Jitter {
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        let (lo, hi) = if min_secs <= max_secs {
            (min_secs, max_secs)
        } else {
            (max_secs, min_secs)
        };
        Self {
            range_secs: lo.max(0.0)..=hi.max(0.0),
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn sample(&self) -> Duration {
        let (lo, hi) = (*self.range_secs.start(), *self.range_secs.end());
        if hi <= lo {
            return Duration::from_secs_f64(lo);
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(lo..=hi))
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::new(2.0, 5.0)
    }
}
