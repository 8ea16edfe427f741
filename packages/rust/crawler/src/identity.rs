//! Per-request identity rotation (proxy, user agent, pacing delay).
//!
//! One [`AntiDetectionManager`] is built per process and cloned into every
//! fetch worker; clones share the same rotation state.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use sitecorpus_shared::AntiDetectionConfig;
use tracing::{debug, warn};

/// Agent used when the configured pool is empty.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// DelayWindow
// ---------------------------------------------------------------------------

/// Bounds for the pause a caller takes before the request an identity guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    pub min: Duration,
    pub max: Duration,
}

impl DelayWindow {
    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms.min(max_ms)),
            max: Duration::from_millis(max_ms.max(min_ms)),
        }
    }

    /// No pause at all.
    pub fn none() -> Self {
        Self::from_millis(0, 0)
    }

    /// Draw a uniformly random delay from the window.
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The proxy/user-agent/delay tuple assigned to one outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Proxy URL, or `None` for a direct connection.
    pub proxy: Option<String>,
    pub user_agent: String,
    pub delay: DelayWindow,
}

impl Identity {
    /// Direct connection, default agent, no delay.
    pub fn direct() -> Self {
        Self {
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            delay: DelayWindow::none(),
        }
    }
}

/// An [`Identity`] whose proxy stays reserved until the lease is dropped.
#[derive(Debug)]
pub struct IdentityLease {
    identity: Identity,
    slot: Option<usize>,
    state: Arc<Mutex<RotationState>>,
}

impl Deref for IdentityLease {
    type Target = Identity;

    fn deref(&self) -> &Identity {
        &self.identity
    }
}

impl IdentityLease {
    /// Take this lease's proxy out of rotation. It comes back once every
    /// proxy in the pool has been marked failed. No-op for direct identities.
    pub fn mark_failed(&self) {
        let Some(slot) = self.slot else {
            return;
        };
        let mut state = lock(&self.state);
        if let Some(failed) = state.proxies_failed.get_mut(slot) {
            if !*failed {
                *failed = true;
                warn!(proxy = ?self.identity.proxy, "proxy marked failed");
            }
        }
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        if let Some(slot) = self.slot {
            let mut state = lock(&self.state);
            if let Some(count) = state.proxies_in_use.get_mut(slot) {
                *count = count.saturating_sub(1);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AntiDetectionManager
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RotationState {
    proxies: Vec<String>,
    /// Outstanding leases per proxy slot.
    proxies_in_use: Vec<usize>,
    /// Slots marked failed by a caller; skipped until all have failed.
    proxies_failed: Vec<bool>,
    proxy_cursor: usize,
    user_agents: Vec<String>,
    agent_cursor: usize,
}

/// Round-robin pools of proxies and user agents.
///
/// Sequential calls cycle through each pool in configured order, so within
/// any window of `pool.len()` calls no value repeats. A proxy still held by
/// an outstanding [`IdentityLease`] is passed over while a free one exists;
/// when every proxy is busy the rotation order is used as is. Proxies marked
/// failed through [`IdentityLease::mark_failed`] leave the rotation until the
/// whole pool has failed, at which point every proxy is tried again.
#[derive(Debug, Clone)]
pub struct AntiDetectionManager {
    state: Arc<Mutex<RotationState>>,
    delay: DelayWindow,
}

impl AntiDetectionManager {
    pub fn new(proxies: Vec<String>, user_agents: Vec<String>, delay: DelayWindow) -> Self {
        let proxies: Vec<String> = proxies
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let user_agents: Vec<String> = user_agents
            .into_iter()
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty())
            .collect();

        Self {
            state: Arc::new(Mutex::new(RotationState {
                proxies_in_use: vec![0; proxies.len()],
                proxies_failed: vec![false; proxies.len()],
                proxies,
                proxy_cursor: 0,
                user_agents,
                agent_cursor: 0,
            })),
            delay,
        }
    }

    /// Build from the `[anti_detection]` config section.
    pub fn from_config(config: &AntiDetectionConfig) -> Self {
        Self::new(
            config.proxies.clone(),
            config.user_agents.clone(),
            DelayWindow::from_millis(config.min_delay_ms, config.max_delay_ms),
        )
    }

    /// Empty pools and no delay.
    pub fn direct() -> Self {
        Self::new(Vec::new(), Vec::new(), DelayWindow::none())
    }

    /// Assign the next identity in rotation.
    pub fn next_identity(&self) -> IdentityLease {
        let mut state = lock(&self.state);

        let slot = state.next_proxy_slot();
        let proxy = slot.map(|i| state.proxies[i].clone());
        let user_agent = state.next_user_agent();
        drop(state);

        debug!(proxy = proxy.as_deref().unwrap_or("direct"), "identity assigned");

        IdentityLease {
            identity: Identity {
                proxy,
                user_agent,
                delay: self.delay,
            },
            slot,
            state: Arc::clone(&self.state),
        }
    }

    /// The agent robots.txt groups are matched against.
    pub fn primary_user_agent(&self) -> String {
        lock(&self.state)
            .user_agents
            .first()
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }
}

impl RotationState {
    fn next_proxy_slot(&mut self) -> Option<usize> {
        let n = self.proxies.len();
        if n == 0 {
            return None;
        }

        if self.proxies_failed.iter().all(|&failed| failed) {
            debug!(proxies = n, "every proxy failed, resetting pool");
            self.proxies_failed.fill(false);
        }

        let healthy: Vec<usize> = (0..n)
            .map(|offset| (self.proxy_cursor + offset) % n)
            .filter(|&i| !self.proxies_failed[i])
            .collect();
        let chosen = healthy
            .iter()
            .copied()
            .find(|&i| self.proxies_in_use[i] == 0)
            .unwrap_or(healthy[0]);

        self.proxy_cursor = (chosen + 1) % n;
        self.proxies_in_use[chosen] += 1;
        Some(chosen)
    }

    fn next_user_agent(&mut self) -> String {
        if self.user_agents.is_empty() {
            return DEFAULT_USER_AGENT.to_string();
        }
        let i = self.agent_cursor % self.user_agents.len();
        self.agent_cursor = (i + 1) % self.user_agents.len();
        self.user_agents[i].clone()
    }
}

/// The rotation state holds no invariants a panic could break mid-update.
fn lock(state: &Mutex<RotationState>) -> MutexGuard<'_, RotationState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn pool(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}-{i}")).collect()
    }

    #[test]
    fn no_repeats_within_a_pool_sized_window() {
        let manager = AntiDetectionManager::new(pool("proxy", 4), pool("ua", 3), DelayWindow::none());

        let identities: Vec<Identity> = (0..24)
            .map(|_| manager.next_identity().deref().clone())
            .collect();

        for window in identities.windows(4) {
            let proxies: HashSet<_> = window.iter().map(|i| i.proxy.clone()).collect();
            assert_eq!(proxies.len(), 4, "proxy repeated in {window:?}");
        }
        for window in identities.windows(3) {
            let agents: HashSet<_> = window.iter().map(|i| i.user_agent.clone()).collect();
            assert_eq!(agents.len(), 3, "agent repeated in {window:?}");
        }
    }

    #[test]
    fn empty_pools_mean_direct_default_agent() {
        let manager = AntiDetectionManager::direct();
        let identity = manager.next_identity();
        assert!(identity.proxy.is_none());
        assert_eq!(identity.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(identity.delay, DelayWindow::none());
    }

    #[test]
    fn single_entry_pool_is_reused() {
        let manager = AntiDetectionManager::new(pool("proxy", 1), pool("ua", 1), DelayWindow::none());
        let a = manager.next_identity();
        let b = manager.next_identity();
        assert_eq!(a.proxy, b.proxy);
        assert_eq!(a.user_agent, b.user_agent);
    }

    #[test]
    fn held_proxies_are_not_handed_out_twice() {
        let manager = AntiDetectionManager::new(pool("proxy", 3), Vec::new(), DelayWindow::none());

        let first = manager.next_identity();
        let second = manager.next_identity();
        drop(second);
        // proxy-2 is next in order, then proxy-1 (released) before proxy-0 (held)
        let third = manager.next_identity();
        let fourth = manager.next_identity();

        assert_eq!(first.proxy.as_deref(), Some("proxy-0"));
        assert_eq!(third.proxy.as_deref(), Some("proxy-2"));
        assert_eq!(fourth.proxy.as_deref(), Some("proxy-1"));
    }

    #[test]
    fn smaller_pool_than_concurrency_keeps_rotation_order() {
        let manager = AntiDetectionManager::new(pool("proxy", 2), Vec::new(), DelayWindow::none());
        let held: Vec<IdentityLease> = (0..5).map(|_| manager.next_identity()).collect();
        let order: Vec<_> = held.iter().map(|l| l.proxy.clone().unwrap_or_default()).collect();
        assert_eq!(order, ["proxy-0", "proxy-1", "proxy-0", "proxy-1", "proxy-0"]);
    }

    #[test]
    fn failed_proxies_leave_rotation_until_all_fail() {
        let manager = AntiDetectionManager::new(pool("proxy", 3), Vec::new(), DelayWindow::none());

        let first = manager.next_identity();
        assert_eq!(first.proxy.as_deref(), Some("proxy-0"));
        first.mark_failed();
        drop(first);

        let next: Vec<String> = (0..4)
            .map(|_| manager.next_identity().proxy.clone().unwrap_or_default())
            .collect();
        assert_eq!(next, ["proxy-1", "proxy-2", "proxy-1", "proxy-2"]);

        // Fail the rest: the whole pool comes back
        manager.next_identity().mark_failed();
        manager.next_identity().mark_failed();
        let reset: HashSet<String> = (0..3)
            .map(|_| manager.next_identity().proxy.clone().unwrap_or_default())
            .collect();
        assert_eq!(reset.len(), 3);
    }

    #[test]
    fn marking_a_direct_identity_is_a_no_op() {
        let manager = AntiDetectionManager::direct();
        let lease = manager.next_identity();
        lease.mark_failed();
        assert!(manager.next_identity().proxy.is_none());
    }

    #[tokio::test]
    async fn concurrent_leases_are_distinct_when_pool_is_large_enough() {
        let manager = AntiDetectionManager::new(pool("proxy", 8), Vec::new(), DelayWindow::none());
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        for _ in 0..8 {
            let manager = manager.clone();
            let tx = tx.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let lease = manager.next_identity();
                let proxy = lease.proxy.clone();
                // Hold every lease until all workers have one
                barrier.wait().await;
                tx.send(proxy).await.ok();
            });
        }
        drop(tx);

        let mut seen = HashSet::new();
        while let Some(proxy) = rx.recv().await {
            assert!(seen.insert(proxy), "proxy leased twice at once");
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn delay_samples_stay_in_window() {
        let window = DelayWindow::from_millis(1000, 3000);
        for _ in 0..100 {
            let d = window.sample();
            assert!(d >= Duration::from_millis(1000) && d <= Duration::from_millis(3000));
        }
        // Inverted bounds are normalized
        let window = DelayWindow::from_millis(50, 10);
        assert_eq!(window.min, Duration::from_millis(10));
    }
}
