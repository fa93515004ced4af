//! Org directory access.
//!
//! The directory is an external HR service that knows which application
//! step grants an identity holds. It is slow and sometimes down, so every
//! call goes through [`CachedDirectory`]: results are fresh for the
//! configured TTL, refetched after that, and served stale when a refetch
//! fails. Each call is bounded by the configured timeout.
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::config::EngineConfig;

/// Permission for one (application, step) pair in one department.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub application: String,
    pub step: u32,
    pub department: String,
    pub job_level: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub identity: String,
    pub display_name: String,
    pub department: Option<String>,
    pub job_level: Option<u8>,
    pub title: Option<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Unavailable(String),
    #[error("Directory call exceeded {0:?}")]
    Timeout(Duration),
    #[error("Identity {0} is unknown to the directory")]
    UnknownIdentity(String),
}

impl DirectoryError {
    /// Failures where cached or local data may stand in for the answer.
    pub fn is_outage(&self) -> bool {
        matches!(self, DirectoryError::Unavailable(_) | DirectoryError::Timeout(_))
    }
}

pub trait DirectoryGateway: Send + Sync {
    fn resolve_grants(&self, identity: &str) -> Result<Vec<Grant>, DirectoryError>;
    fn resolve_profile(&self, identity: &str) -> Result<Profile, DirectoryError>;
}

struct CacheEntry<T> {
    value: T,
    fetched_at: Instant,
}

type Cache<T> = Mutex<LruCache<String, CacheEntry<T>>>;
type Fetch<T> = fn(&dyn DirectoryGateway, &str) -> Result<T, DirectoryError>;

pub struct CachedDirectory {
    gateway: Arc<dyn DirectoryGateway>,
    grants: Cache<Vec<Grant>>,
    profiles: Cache<Profile>,
    ttl: Duration,
    timeout: Duration,
}

impl CachedDirectory {
    pub fn new(gateway: Arc<dyn DirectoryGateway>, config: &EngineConfig) -> Self {
        let capacity = NonZeroUsize::new(config.directory_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            gateway,
            grants: Mutex::new(LruCache::new(capacity)),
            profiles: Mutex::new(LruCache::new(capacity)),
            ttl: config.directory_ttl,
            timeout: config.directory_timeout,
        }
    }

    pub fn grants(&self, identity: &str) -> Result<Vec<Grant>, DirectoryError> {
        self.lookup(&self.grants, identity, |gateway, id| gateway.resolve_grants(id))
    }

    pub fn profile(&self, identity: &str) -> Result<Profile, DirectoryError> {
        self.lookup(&self.profiles, identity, |gateway, id| gateway.resolve_profile(id))
    }

    /// Drops cached data for `identity`, forcing the next lookup to refetch.
    pub fn invalidate(&self, identity: &str) {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner).pop(identity);
        self.profiles.lock().unwrap_or_else(PoisonError::into_inner).pop(identity);
    }

    fn lookup<T>(&self, cache: &Cache<T>, identity: &str, fetch: Fetch<T>) -> Result<T, DirectoryError>
    where
        T: Clone + Send + 'static,
    {
        if let Some(entry) = cache.lock().unwrap_or_else(PoisonError::into_inner).get(identity) {
            if entry.fetched_at.elapsed() < self.ttl {
                debug!(identity, "directory cache hit");
                return Ok(entry.value.clone());
            }
        }

        match self.call_with_timeout(identity, fetch) {
            Ok(value) => {
                cache.lock().unwrap_or_else(PoisonError::into_inner).put(
                    identity.to_string(),
                    CacheEntry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(err) if err.is_outage() => {
                let stale = cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .peek(identity)
                    .map(|entry| entry.value.clone());
                match stale {
                    Some(value) => {
                        warn!(identity, error = %err, "directory unavailable, serving stale entry");
                        Ok(value)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn call_with_timeout<T>(&self, identity: &str, fetch: Fetch<T>) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let gateway = Arc::clone(&self.gateway);
        let id = identity.to_string();

        thread::spawn(move || {
            // the receiver may have given up already
            let _ = tx.send(fetch(gateway.as_ref(), &id));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(DirectoryError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DirectoryError::Unavailable("directory worker exited without a reply".to_string()))
            }
        }
    }
}
