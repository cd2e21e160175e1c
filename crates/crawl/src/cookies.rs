//! Per-domain cookie persistence for Cloudflare clearance reuse.
//!
//! Clearance tokens are expensive to earn (a solved challenge) and stay
//! valid for a while, so they are kept per domain|proxy and replayed into
//! fresh pages before navigation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cookie names worth persisting (Cloudflare anti-bot tokens).
const CF_COOKIE_NAMES: &[&str] = &["__cf_bm", "cf_clearance", "__cflb"];

/// 25 minutes — clearance cookies rot fast.
const DEFAULT_TTL: Duration = Duration::from_secs(1500);

#[derive(Debug, Clone)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    stored_at: Instant,
    ttl: Duration,
}

impl StoredCookie {
    pub fn is_expired(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

#[derive(Default)]
pub struct CookieStore {
    store: Mutex<HashMap<String, Vec<StoredCookie>>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(domain: &str, proxy: Option<&str>) -> String {
        format!("{domain}|{}", proxy.unwrap_or("direct"))
    }

    /// Keep the Cloudflare cookies out of a page's cookie jar.
    /// `cookies` is (name, value, domain, path) as read from the browser.
    pub fn save(
        &self,
        domain: &str,
        proxy: Option<&str>,
        cookies: impl IntoIterator<Item = (String, String, String, String)>,
    ) {
        let kept: Vec<StoredCookie> = cookies
            .into_iter()
            .filter(|(name, ..)| CF_COOKIE_NAMES.contains(&name.as_str()))
            .map(|(name, value, cookie_domain, path)| StoredCookie {
                name,
                value,
                domain: if cookie_domain.is_empty() {
                    domain.to_string()
                } else {
                    cookie_domain
                },
                path: if path.is_empty() { "/".into() } else { path },
                stored_at: Instant::now(),
                ttl: DEFAULT_TTL,
            })
            .collect();
        self.store.lock().insert(Self::key(domain, proxy), kept);
    }

    /// Unexpired stored cookies for a domain, ready to re-inject.
    pub fn load(&self, domain: &str, proxy: Option<&str>) -> Vec<StoredCookie> {
        self.store
            .lock()
            .get(&Self::key(domain, proxy))
            .map(|cookies| cookies.iter().filter(|c| !c.is_expired()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_expired(&self) {
        let mut store = self.store.lock();
        for cookies in store.values_mut() {
            cookies.retain(|c| !c.is_expired());
        }
        store.retain(|_, cookies| !cookies.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str) -> (String, String, String, String) {
        (name.into(), "v".into(), ".example.com".into(), "/".into())
    }

    #[test]
    fn only_cloudflare_cookies_are_kept() {
        let store = CookieStore::new();
        store.save(
            "example.com",
            None,
            vec![cookie("cf_clearance"), cookie("session_id"), cookie("__cf_bm")],
        );
        let loaded = store.load("example.com", None);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|c| c.name.starts_with("cf") || c.name.starts_with("__cf")));
    }

    #[test]
    fn proxy_keys_are_isolated() {
        let store = CookieStore::new();
        store.save("example.com", Some("proxy-a"), vec![cookie("cf_clearance")]);
        assert!(store.load("example.com", None).is_empty());
        assert_eq!(store.load("example.com", Some("proxy-a")).len(), 1);
    }

    #[test]
    fn expired_cookies_are_dropped() {
        let store = CookieStore::new();
        store.save("example.com", None, vec![cookie("cf_clearance")]);
        {
            let mut inner = store.store.lock();
            for cookies in inner.values_mut() {
                for c in cookies.iter_mut() {
                    c.ttl = Duration::from_secs(0);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.load("example.com", None).is_empty());
        store.clear_expired();
        assert!(store.store.lock().is_empty());
    }
}
