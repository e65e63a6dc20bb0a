//! Keyed request deduplication with a short-lived result cache.
//!
//! `execute` serves a fresh cached value when one exists, joins an identical
//! request that is still in flight, and otherwise starts the request, parks it
//! as pending, and caches its successful result. Failures are never cached.
//!
//! A pending request older than `pending_stale_after` is abandoned rather than
//! awaited: a new call is started for the key while the old one keeps running
//! for whoever already holds it. Nothing is cancelled.

use futures::future::{BoxFuture, FutureExt, Shared};
use regex::Regex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_millis(30_000);
pub const PENDING_STALE_AFTER: Duration = Duration::from_millis(5_000);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub pending_stale_after: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            pending_stale_after: PENDING_STALE_AFTER,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub skip_cache: bool,
}

impl CacheOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Prefix(String),
    Matching(Regex),
}

impl KeyPattern {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyPattern::Prefix(prefix.into())
    }

    fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::Prefix(p) => key.starts_with(p.as_str()),
            KeyPattern::Matching(re) => re.is_match(key),
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(key: &str) -> Self {
        KeyPattern::Exact(key.to_string())
    }
}

impl From<String> for KeyPattern {
    fn from(key: String) -> Self {
        KeyPattern::Exact(key)
    }
}

impl From<Regex> for KeyPattern {
    fn from(re: Regex) -> Self {
        KeyPattern::Matching(re)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub cached: usize,
    pub pending: usize,
}

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct CacheEntry<T> {
    data: T,
    stored_at: Instant,
    ttl: Duration,
}

struct PendingRequest<T, E> {
    id: u64,
    future: SharedResult<T, E>,
    started_at: Instant,
}

struct State<T, E> {
    entries: HashMap<String, CacheEntry<T>>,
    pending: HashMap<String, PendingRequest<T, E>>,
    next_id: u64,
}

fn lock<T, E>(state: &Mutex<State<T, E>>) -> MutexGuard<'_, State<T, E>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct RequestCache<T, E> {
    state: Arc<Mutex<State<T, E>>>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
}

impl<T, E> RequestCache<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(settings: CacheSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                entries: HashMap::new(),
                pending: HashMap::new(),
                next_id: 0,
            })),
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Runs `request_fn` for `key` unless a fresh cached value or a live
    /// pending request can answer instead.
    ///
    /// The pending entry is registered before the returned future first
    /// suspends, so concurrent callers polled after it share one call.
    /// `request_fn` itself runs on the first poll of the shared future, after
    /// the state lock is released, so it may call back into this cache.
    pub async fn execute<F, Fut>(
        &self,
        key: &str,
        request_fn: F,
        options: CacheOptions,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut state = lock(&self.state);
            let now = self.clock.now();

            if !options.skip_cache {
                if let Some(entry) = state.entries.get(key) {
                    if now.saturating_duration_since(entry.stored_at) < entry.ttl {
                        debug!(key, "request cache hit");
                        return Ok(entry.data.clone());
                    }
                    state.entries.remove(key);
                }
            }

            let stale_after = self.settings.pending_stale_after;
            let live = state
                .pending
                .get(key)
                .filter(|p| now.saturating_duration_since(p.started_at) < stale_after)
                .map(|p| p.future.clone());
            if live.is_none() && state.pending.remove(key).is_some() {
                debug!(key, "discarding stale pending request");
            }

            match live {
                Some(future) => {
                    debug!(key, "joining pending request");
                    future
                }
                None => {
                    let ttl = options.ttl.unwrap_or(self.settings.default_ttl);
                    self.dispatch(&mut state, key, now, ttl, request_fn)
                }
            }
        };
        shared.await
    }

    fn dispatch<F, Fut>(
        &self,
        state: &mut State<T, E>,
        key: &str,
        now: Instant,
        ttl: Duration,
        request_fn: F,
    ) -> SharedResult<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let id = state.next_id;
        state.next_id += 1;

        let handle = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        let owned_key = key.to_string();
        let future = async move {
            let result = request_fn().await;
            let mut state = lock(&handle);
            // Only the registered request settles the key; one that was
            // invalidated or superseded leaves newer state alone.
            let current = state.pending.get(&owned_key).map(|p| p.id) == Some(id);
            if current {
                state.pending.remove(&owned_key);
                if let Ok(data) = &result {
                    state.entries.insert(
                        owned_key,
                        CacheEntry {
                            data: data.clone(),
                            stored_at: clock.now(),
                            ttl,
                        },
                    );
                }
            }
            result
        }
        .boxed()
        .shared();

        debug!(key, "dispatching request");
        state.pending.insert(
            key.to_string(),
            PendingRequest {
                id,
                future: future.clone(),
                started_at: now,
            },
        );
        future
    }

    /// Drops cached and pending state for every key the pattern matches.
    pub fn invalidate(&self, pattern: impl Into<KeyPattern>) {
        let pattern = pattern.into();
        let mut state = lock(&self.state);
        state.entries.retain(|k, _| !pattern.matches(k));
        state.pending.retain(|k, _| !pattern.matches(k));
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.pending.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = lock(&self.state);
        CacheStats {
            cached: state.entries.len(),
            pending: state.pending.len(),
        }
    }
}
