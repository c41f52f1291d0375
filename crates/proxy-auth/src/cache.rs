//! Per-proxy credential cache
//!
//! Library credentials are expensive to obtain (a KDC round-trip for a
//! password source) and stay valid for hours, so they are kept per proxy
//! until the library-reported lifetime runs out or the proxy rejects them.
//! Security contexts are never cached; every exchange opens a fresh one.
//!
//! Each proxy gets a `ProxySlot` holding the cached credential and the lock
//! that serializes negotiations for backends that are not reentrant.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use negotiate::AcquiredCredential;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::debug;
use url::Url;

struct Cached<C> {
    handle: Arc<C>,
    valid_until: Instant,
}

pub struct ProxySlot<C> {
    key: String,
    credential: AsyncMutex<Option<Cached<C>>>,
    negotiation: AsyncMutex<()>,
}

impl<C> ProxySlot<C> {
    fn new(key: String) -> Self {
        Self {
            key,
            credential: AsyncMutex::new(None),
            negotiation: AsyncMutex::new(()),
        }
    }

    /// Exclusive right to negotiate with this proxy.
    pub async fn serialize(&self) -> MutexGuard<'_, ()> {
        self.negotiation.lock().await
    }

    /// Return the cached credential if still valid, otherwise run `acquire`
    /// and cache its result when the library reported a lifetime.
    ///
    /// Concurrent callers wait on the same acquisition instead of racing to
    /// the KDC.
    pub async fn get_or_acquire<F, Fut, E>(&self, acquire: F) -> Result<Arc<C>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AcquiredCredential<C>, E>>,
    {
        let mut cached = self.credential.lock().await;
        let now = Instant::now();
        if let Some(entry) = cached.as_ref() {
            if now < entry.valid_until {
                debug!(proxy = %self.key, "using cached proxy credential");
                return Ok(Arc::clone(&entry.handle));
            }
            debug!(proxy = %self.key, "cached proxy credential expired");
            *cached = None;
        }

        let acquired = acquire().await?;
        let handle = Arc::new(acquired.handle);
        match acquired.valid_until {
            Some(valid_until) if now < valid_until => {
                *cached = Some(Cached {
                    handle: Arc::clone(&handle),
                    valid_until,
                });
            }
            _ => debug!(proxy = %self.key, "credential lifetime unknown, not caching"),
        }
        Ok(handle)
    }

    /// Forget the cached credential, e.g. after the proxy rejected it.
    pub async fn invalidate(&self) {
        if self.credential.lock().await.take().is_some() {
            debug!(proxy = %self.key, "invalidated cached proxy credential");
        }
    }

    pub async fn is_cached(&self) -> bool {
        self.credential.lock().await.is_some()
    }
}

/// Slots keyed by `scheme://host:port` of the proxy.
pub struct CredentialCache<C> {
    slots: Mutex<HashMap<String, Arc<ProxySlot<C>>>>,
}

impl<C> Default for CredentialCache<C> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<C> CredentialCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, proxy: &Url) -> Arc<ProxySlot<C>> {
        let key = proxy_key(proxy);
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ProxySlot::new(key))),
        )
    }
}

/// Normalized identity of a proxy: scheme, lowercased host, effective port.
pub fn proxy_key(proxy: &Url) -> String {
    let host = proxy.host_str().unwrap_or_default().to_ascii_lowercase();
    match proxy.port_or_known_default() {
        Some(port) => format!("{}://{host}:{port}", proxy.scheme()),
        None => format!("{}://{host}", proxy.scheme()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn acquired(valid_for: Option<Duration>) -> AcquiredCredential<u32> {
        AcquiredCredential {
            handle: 7,
            valid_until: valid_for.map(|d| Instant::now() + d),
        }
    }

    #[test]
    fn proxy_key_normalizes_host_and_port() {
        let a = Url::parse("http://PROXY.corp.example/").unwrap();
        let b = Url::parse("http://proxy.corp.example:80").unwrap();
        assert_eq!(proxy_key(&a), proxy_key(&b));
        assert_eq!(proxy_key(&a), "http://proxy.corp.example:80");

        let c = Url::parse("http://proxy.corp.example:3128").unwrap();
        assert_ne!(proxy_key(&a), proxy_key(&c));
    }

    #[tokio::test]
    async fn valid_credential_is_reused() {
        let cache = CredentialCache::<u32>::new();
        let slot = cache.slot(&Url::parse("http://proxy:3128").unwrap());
        let calls = &AtomicUsize::new(0);

        for _ in 0..3 {
            let handle = slot
                .get_or_acquire(move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(acquired(Some(Duration::from_secs(3600))))
                })
                .await
                .unwrap();
            assert_eq!(*handle, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(slot.is_cached().await);
    }

    #[tokio::test]
    async fn unknown_lifetime_is_not_cached() {
        let cache = CredentialCache::<u32>::new();
        let slot = cache.slot(&Url::parse("http://proxy:3128").unwrap());
        slot.get_or_acquire(|| async { Ok::<_, ()>(acquired(None)) })
            .await
            .unwrap();
        assert!(!slot.is_cached().await);
    }

    #[tokio::test]
    async fn invalidate_forces_reacquire() {
        let cache = CredentialCache::<u32>::new();
        let proxy = Url::parse("http://proxy:3128").unwrap();
        let calls = &AtomicUsize::new(0);
        let acquire = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(acquired(Some(Duration::from_secs(3600))))
        };

        cache.slot(&proxy).get_or_acquire(acquire).await.unwrap();
        cache.slot(&proxy).invalidate().await;
        cache.slot(&proxy).get_or_acquire(acquire).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slots_are_per_proxy() {
        let cache = CredentialCache::<u32>::new();
        let a = cache.slot(&Url::parse("http://proxy-a:3128").unwrap());
        let b = cache.slot(&Url::parse("http://proxy-b:3128").unwrap());
        a.get_or_acquire(|| async { Ok::<_, ()>(acquired(Some(Duration::from_secs(60)))) })
            .await
            .unwrap();
        assert!(a.is_cached().await);
        assert!(!b.is_cached().await);
        assert!(Arc::ptr_eq(
            &a,
            &cache.slot(&Url::parse("http://PROXY-A:3128/").unwrap())
        ));
    }

    #[tokio::test]
    async fn failed_acquire_leaves_cache_empty() {
        let cache = CredentialCache::<u32>::new();
        let slot = cache.slot(&Url::parse("http://proxy:3128").unwrap());
        let result = slot
            .get_or_acquire(|| async { Err::<AcquiredCredential<u32>, _>("kdc unreachable") })
            .await;
        assert_eq!(result.unwrap_err(), "kdc unreachable");
        assert!(!slot.is_cached().await);
    }
}
