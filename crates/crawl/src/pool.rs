//! Fixed-size pool of warm headless Chromium sessions.
//!
//! Each slot holds one launched browser, its CDP event handler task, and a
//! single page kept on about:blank between leases. Leases are keyed by
//! session id so streaming endpoints can find their live page. `acquire`
//! never blocks — a saturated pool returns `None` and the caller decides
//! (503 to the client, or route to a peer).

use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use wr_domain::{Error, Result};

const RESET_NAV_TIMEOUT: Duration = Duration::from_secs(5);

const POOL_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.60 Safari/537.36";

struct PoolSlot {
    slot_id: String,
    browser: Browser,
    handler_task: JoinHandle<()>,
    page: Page,
    session_id: Option<String>,
    leased: bool,
    leased_at: Instant,
    navigated_url: Option<String>,
}

/// A live lease: the page handle is a cheap clone of the slot's CDP session.
#[derive(Clone)]
pub struct Lease {
    pub slot_id: String,
    pub session_id: String,
    pub page: Page,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot_id: String,
    pub leased: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub leased_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub started: bool,
    pub pool_size: usize,
    pub free: usize,
    pub leased: usize,
    pub slots: Vec<SlotStatus>,
}

/// Fixed-size pool of warm Chromium instances.
pub struct BrowserPool {
    size: usize,
    max_lease: Duration,
    headless: bool,
    viewport_width: u32,
    slots: Mutex<Vec<PoolSlot>>,
    started: std::sync::atomic::AtomicBool,
}

impl BrowserPool {
    pub fn new(size: usize, max_lease_seconds: u64, headless: bool, viewport_width: u32) -> Self {
        Self {
            size: size.max(1),
            max_lease: Duration::from_secs(max_lease_seconds),
            headless,
            viewport_width,
            slots: Mutex::new(Vec::new()),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Initialize the pool with warm browser instances, concurrently.
    pub async fn start(&self) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if self.started.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(size = self.size, "starting browser pool");
        let created = futures_util::future::join_all((0..self.size).map(|_| self.create_slot())).await;
        for slot in created {
            let slot = slot?;
            tracing::info!(slot_id = %slot.slot_id, "pool slot ready");
            slots.push(slot);
        }

        self.started.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    /// Close all slots and release resources.
    pub async fn shutdown(&self) {
        let mut slots = self.slots.lock().await;
        tracing::info!("shutting down browser pool");
        for mut slot in slots.drain(..) {
            Self::destroy_slot(&mut slot).await;
        }
        self.started.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    // ── Acquire / release ─────────────────────────────────────────

    /// Lease a slot for a session. Returns `None` when saturated.
    ///
    /// Expired leases are reclaimed first, so one crashed consumer can
    /// never starve the pool indefinitely.
    pub async fn acquire(&self, session_id: &str) -> Option<Lease> {
        let mut slots = self.slots.lock().await;

        let now = Instant::now();
        for slot in slots.iter_mut() {
            if slot.leased && now.duration_since(slot.leased_at) > self.max_lease {
                tracing::warn!(
                    slot_id = %slot.slot_id,
                    session_id = ?slot.session_id,
                    leased_secs = now.duration_since(slot.leased_at).as_secs(),
                    "reclaiming expired lease"
                );
                self.reset_slot(slot).await;
            }
        }

        for slot in slots.iter_mut() {
            if !slot.leased {
                slot.leased = true;
                slot.leased_at = now;
                slot.session_id = Some(session_id.to_string());
                tracing::info!(slot_id = %slot.slot_id, session_id, "slot acquired");
                return Some(Lease {
                    slot_id: slot.slot_id.clone(),
                    session_id: session_id.to_string(),
                    page: slot.page.clone(),
                });
            }
        }

        tracing::warn!(size = self.size, "no free pool slots");
        None
    }

    /// Return a slot to the pool and reset it for reuse.
    pub async fn release(&self, lease: &Lease) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.slot_id == lease.slot_id) {
            tracing::info!(slot_id = %slot.slot_id, session_id = ?slot.session_id, "slot released");
            self.reset_slot(slot).await;
        }
    }

    /// Find the page currently leased for a session. Read-only.
    pub async fn lookup_by_session(&self, session_id: &str) -> Option<Page> {
        let slots = self.slots.lock().await;
        slots
            .iter()
            .find(|s| s.leased && s.session_id.as_deref() == Some(session_id))
            .map(|s| s.page.clone())
    }

    /// Record the URL a leased page navigated to (shown in status).
    pub async fn note_navigation(&self, slot_id: &str, url: &str) {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.iter_mut().find(|s| s.slot_id == slot_id) {
            slot.navigated_url = Some(url.to_string());
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let slots = self.slots.lock().await;
        let now = Instant::now();
        let statuses: Vec<SlotStatus> = slots
            .iter()
            .map(|s| SlotStatus {
                slot_id: s.slot_id.clone(),
                leased: s.leased,
                session_id: s.session_id.clone(),
                url: s.navigated_url.clone(),
                leased_seconds: if s.leased {
                    now.duration_since(s.leased_at).as_secs()
                } else {
                    0
                },
            })
            .collect();
        PoolStatus {
            started: self.started.load(std::sync::atomic::Ordering::SeqCst),
            pool_size: self.size,
            free: statuses.iter().filter(|s| !s.leased).count(),
            leased: statuses.iter().filter(|s| s.leased).count(),
            slots: statuses,
        }
    }

    pub async fn free_slots(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.iter().filter(|s| !s.leased).count()
    }

    // ── Internals ─────────────────────────────────────────────────

    async fn create_slot(&self) -> Result<PoolSlot> {
        let height = self.viewport_width * 9 / 16;
        let mut builder = BrowserConfig::builder()
            .window_size(self.viewport_width, height)
            .arg(format!("--user-agent={POOL_USER_AGENT}"))
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--mute-audio")
            .arg("--no-first-run")
            .arg("--ignore-certificate-errors");
        builder = if self.headless {
            builder.headless_mode(HeadlessMode::New)
        } else {
            builder.with_head()
        };
        let config = builder
            .build()
            .map_err(|e| Error::Execution(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| Error::Execution(format!("browser launch: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| Error::Execution(format!("new page: {e}")))?;

        Ok(PoolSlot {
            slot_id: uuid::Uuid::new_v4().simple().to_string()[..8].to_string(),
            browser,
            handler_task,
            page,
            session_id: None,
            leased: false,
            leased_at: Instant::now(),
            navigated_url: None,
        })
    }

    /// Reset a slot for reuse: navigate to blank and clear the lease.
    /// A failed reset means the browser is wedged — rebuild the slot.
    async fn reset_slot(&self, slot: &mut PoolSlot) {
        let nav = tokio::time::timeout(RESET_NAV_TIMEOUT, slot.page.goto("about:blank")).await;
        let nav_ok = matches!(nav, Ok(Ok(_)));
        if !nav_ok {
            tracing::warn!(slot_id = %slot.slot_id, "slot reset failed, rebuilding browser");
            Self::destroy_slot(slot).await;
            match self.create_slot().await {
                Ok(fresh) => {
                    let slot_id = slot.slot_id.clone();
                    *slot = fresh;
                    slot.slot_id = slot_id;
                }
                Err(err) => {
                    tracing::error!(slot_id = %slot.slot_id, error = %err, "slot rebuild failed");
                }
            }
        }

        slot.leased = false;
        slot.session_id = None;
        slot.navigated_url = None;
    }

    async fn destroy_slot(slot: &mut PoolSlot) {
        if let Err(err) = slot.browser.close().await {
            tracing::debug!(slot_id = %slot.slot_id, error = %err, "browser close failed");
        }
        let _ = slot.browser.wait().await;
        slot.handler_task.abort();
    }
}
