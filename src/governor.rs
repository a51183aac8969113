//! Admission control for concurrent builds.
//!
//! The governor is a bounded registry of in-flight builds keyed by requester
//! identity. It never queues: a refused requester must retry later. A
//! background watchdog reclaims slots from builds that have run too long or
//! gone silent, so a wedged build cannot starve other requesters.
//!
//! The governor owns scheduling metadata only. It does not hold process
//! handles; killing a runaway subprocess is the supervisor's job. The
//! optional cancellation handle attached to a slot lets reclamation also
//! *request* the kill without merging the two mechanisms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{LaneConfig, MAX_CAPACITY, MIN_CAPACITY};
use crate::error::AdmissionRefusal;

/// One in-flight build's claim on shared capacity.
#[derive(Debug)]
struct BuildSlot {
    started_at: Instant,
    last_activity: Instant,
    /// Kill-request flag shared with the build's supervisor, if attached.
    cancel: Option<Arc<AtomicBool>>,
}

/// Read-only projection of one slot.
#[derive(Debug, Clone)]
pub struct SlotInfo {
    pub requester: String,
    pub running_for: Duration,
    pub idle_for: Duration,
}

/// Bounded-capacity admission governor. One instance per process,
/// explicitly constructed and passed to callers (never ambient state).
#[derive(Debug)]
pub struct BuildGovernor {
    capacity: usize,
    absolute_timeout: Duration,
    inactivity_timeout: Duration,
    slots: Mutex<HashMap<String, BuildSlot>>,
}

impl BuildGovernor {
    /// Create a governor. `capacity` is clamped into `[1, 4]` to bound
    /// resource usage on the host regardless of configuration.
    pub fn new(capacity: usize, absolute_timeout: Duration, inactivity_timeout: Duration) -> Self {
        Self {
            capacity: capacity.clamp(MIN_CAPACITY, MAX_CAPACITY),
            absolute_timeout,
            inactivity_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Governor wired from lane configuration.
    pub fn from_config(config: &LaneConfig) -> Self {
        Self::new(
            config.capacity,
            config.absolute_timeout(),
            config.inactivity_timeout(),
        )
    }

    /// Try to claim a slot for `requester`. Fails closed: refused when the
    /// requester already holds a slot or capacity is reached. Check and
    /// insert happen in one critical section, so the capacity invariant
    /// holds under concurrent admission attempts.
    pub fn try_acquire(&self, requester: &str) -> bool {
        self.acquire_inner(requester).is_ok()
    }

    fn acquire_inner(&self, requester: &str) -> Result<(), AdmissionRefusal> {
        let mut slots = self.lock_slots();
        if slots.contains_key(requester) {
            debug!(requester, "admission refused: already building");
            return Err(AdmissionRefusal::AlreadyInFlight);
        }
        if slots.len() >= self.capacity {
            debug!(requester, capacity = self.capacity, "admission refused: at capacity");
            return Err(AdmissionRefusal::AtCapacity);
        }
        let now = Instant::now();
        slots.insert(
            requester.to_string(),
            BuildSlot {
                started_at: now,
                last_activity: now,
                cancel: None,
            },
        );
        info!(requester, active = slots.len(), "build slot acquired");
        Ok(())
    }

    /// Acquire with structurally guaranteed release: the returned guard
    /// releases the slot when dropped, on every exit path including panics.
    pub fn admit(self: &Arc<Self>, requester: &str) -> Result<SlotGuard, AdmissionRefusal> {
        self.acquire_inner(requester)?;
        Ok(SlotGuard {
            governor: Arc::clone(self),
            requester: requester.to_string(),
        })
    }

    /// Release `requester`'s slot. Idempotent-safe: callers may race with
    /// the watchdog's reclamation, so an unknown id only logs.
    pub fn release(&self, requester: &str) {
        let mut slots = self.lock_slots();
        if slots.remove(requester).is_some() {
            info!(requester, active = slots.len(), "build slot released");
        } else {
            debug!(requester, "release for unknown slot (already reclaimed?)");
        }
    }

    /// Remove a slot unconditionally (watchdog or administrative path).
    /// Without an id, clears all slots (emergency reset). Sets the slot's
    /// cancellation handle, if attached, so the supervisor kills the
    /// underlying subprocess on its next poll.
    pub fn force_release(&self, requester: Option<&str>) {
        let mut slots = self.lock_slots();
        match requester {
            Some(id) => {
                if let Some(slot) = slots.remove(id) {
                    request_cancel(&slot);
                    warn!(requester = id, "build slot force-released");
                }
            }
            None => {
                for (id, slot) in slots.drain() {
                    request_cancel(&slot);
                    warn!(requester = %id, "build slot force-released (reset)");
                }
            }
        }
    }

    /// Bump `last_activity`. Without an id this is the legacy broadcast
    /// form: refresh every slot and never fail, since a step callback may
    /// not know which other builds exist.
    pub fn update_activity(&self, requester: Option<&str>) {
        let mut slots = self.lock_slots();
        let now = Instant::now();
        match requester {
            Some(id) => {
                if let Some(slot) = slots.get_mut(id) {
                    slot.last_activity = now;
                }
            }
            None => {
                for slot in slots.values_mut() {
                    slot.last_activity = now;
                }
            }
        }
    }

    /// Share the supervisor's kill flag with the slot so watchdog
    /// reclamation also requests subprocess death.
    pub fn attach_cancel_handle(&self, requester: &str, cancel: Arc<AtomicBool>) {
        let mut slots = self.lock_slots();
        if let Some(slot) = slots.get_mut(requester) {
            slot.cancel = Some(cancel);
        }
    }

    /// True when every slot is occupied.
    pub fn is_busy(&self) -> bool {
        self.lock_slots().len() >= self.capacity
    }

    /// Number of in-flight builds.
    pub fn active_count(&self) -> usize {
        self.lock_slots().len()
    }

    /// Configured (clamped) capacity.
    pub fn max_capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of all in-flight builds.
    pub fn builds(&self) -> Vec<SlotInfo> {
        let slots = self.lock_slots();
        let now = Instant::now();
        slots
            .iter()
            .map(|(id, slot)| SlotInfo {
                requester: id.clone(),
                running_for: now.duration_since(slot.started_at),
                idle_for: now.duration_since(slot.last_activity),
            })
            .collect()
    }

    /// Legacy single-build accessor: the longest-running slot, if any.
    pub fn current_build(&self) -> Option<SlotInfo> {
        self.builds()
            .into_iter()
            .max_by_key(|info| info.running_for)
    }

    /// Human-readable queue status line.
    pub fn status_line(&self) -> String {
        let builds = self.builds();
        if builds.is_empty() {
            return format!("0/{} slots busy", self.capacity);
        }
        let details: Vec<String> = builds
            .iter()
            .map(|b| {
                format!(
                    "{} ({}m{}s, idle {}s)",
                    b.requester,
                    b.running_for.as_secs() / 60,
                    b.running_for.as_secs() % 60,
                    b.idle_for.as_secs()
                )
            })
            .collect();
        format!(
            "{}/{} slots busy: {}",
            builds.len(),
            self.capacity,
            details.join(", ")
        )
    }

    /// One watchdog pass: reclaim every slot that has run past the absolute
    /// budget or gone inactive past the inactivity window. Returns the
    /// reclaimed requester ids. A problem with one slot never prevents the
    /// others from being processed.
    pub fn reclaim_stalled(&self) -> Vec<String> {
        let now = Instant::now();
        let stalled: Vec<String> = {
            let slots = self.lock_slots();
            slots
                .iter()
                .filter_map(|(id, slot)| {
                    let total = now.duration_since(slot.started_at);
                    let idle = now.duration_since(slot.last_activity);
                    if total > self.absolute_timeout {
                        warn!(
                            requester = %id,
                            total_secs = total.as_secs(),
                            "reclaiming slot: absolute budget exceeded"
                        );
                        Some(id.clone())
                    } else if idle > self.inactivity_timeout {
                        warn!(
                            requester = %id,
                            idle_secs = idle.as_secs(),
                            "reclaiming slot: no observable progress"
                        );
                        Some(id.clone())
                    } else {
                        None
                    }
                })
                .collect()
        };

        for id in &stalled {
            self.force_release(Some(id));
        }
        stalled
    }

    /// Start the background watchdog thread. Runs for the process's
    /// lifetime; a tick never aborts the loop.
    pub fn spawn_watchdog(self: &Arc<Self>, period: Duration) -> thread::JoinHandle<()> {
        let governor = Arc::clone(self);
        thread::Builder::new()
            .name("slot-watchdog".to_string())
            .spawn(move || loop {
                thread::sleep(period);
                let reclaimed = governor.reclaim_stalled();
                if !reclaimed.is_empty() {
                    info!(count = reclaimed.len(), "watchdog reclaimed stalled slots");
                }
            })
            .unwrap_or_else(|e| {
                // Thread spawn only fails on resource exhaustion at startup.
                panic!("failed to start slot watchdog: {e}")
            })
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, BuildSlot>> {
        // A panic while holding this short critical section is a bug;
        // recover the map rather than poisoning every future build.
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn request_cancel(slot: &BuildSlot) {
    if let Some(cancel) = &slot.cancel {
        cancel.store(true, Ordering::SeqCst);
    }
}

/// RAII slot claim: releases on drop, so release happens on all exit paths
/// of the build (success, any error, or a panic).
#[derive(Debug)]
pub struct SlotGuard {
    governor: Arc<BuildGovernor>,
    requester: String,
}

impl SlotGuard {
    /// The requester this guard releases for.
    pub fn requester(&self) -> &str {
        &self.requester
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.governor.release(&self.requester);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor(capacity: usize) -> BuildGovernor {
        BuildGovernor::new(
            capacity,
            Duration::from_secs(2700),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(governor(0).max_capacity(), 1);
        assert_eq!(governor(3).max_capacity(), 3);
        assert_eq!(governor(64).max_capacity(), 4);
    }

    #[test]
    fn test_duplicate_requester_refused() {
        let g = governor(4);
        assert!(g.try_acquire("alice"));
        assert!(!g.try_acquire("alice"));
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn test_release_then_reacquire() {
        let g = governor(4);
        assert!(g.try_acquire("alice"));
        g.release("alice");
        assert!(g.try_acquire("alice"));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let g = governor(2);
        g.release("ghost");
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let g = governor(2);
        assert!(g.try_acquire("a"));
        assert!(g.try_acquire("b"));
        assert!(!g.try_acquire("c"));
        assert!(g.is_busy());
        assert_eq!(g.active_count(), 2);
    }

    #[test]
    fn test_force_release_all() {
        let g = governor(3);
        assert!(g.try_acquire("a"));
        assert!(g.try_acquire("b"));
        g.force_release(None);
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn test_force_release_sets_cancel_handle() {
        let g = governor(2);
        assert!(g.try_acquire("a"));
        let cancel = Arc::new(AtomicBool::new(false));
        g.attach_cancel_handle("a", Arc::clone(&cancel));

        g.force_release(Some("a"));
        assert!(cancel.load(Ordering::SeqCst));
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn test_update_activity_broadcast() {
        let g = governor(3);
        assert!(g.try_acquire("a"));
        assert!(g.try_acquire("b"));
        std::thread::sleep(Duration::from_millis(30));
        g.update_activity(None);
        for info in g.builds() {
            assert!(info.idle_for < Duration::from_millis(20));
        }
    }

    #[test]
    fn test_reclaim_inactivity_but_not_fresh() {
        let g = BuildGovernor::new(
            2,
            Duration::from_secs(3600),
            Duration::from_millis(40),
        );
        assert!(g.try_acquire("stale"));
        std::thread::sleep(Duration::from_millis(80));
        assert!(g.try_acquire("fresh"));

        let reclaimed = g.reclaim_stalled();
        assert_eq!(reclaimed, vec!["stale".to_string()]);
        assert_eq!(g.active_count(), 1);
    }

    #[test]
    fn test_reclaim_absolute_despite_recent_activity() {
        let g = BuildGovernor::new(
            2,
            Duration::from_millis(40),
            Duration::from_secs(3600),
        );
        assert!(g.try_acquire("runaway"));
        std::thread::sleep(Duration::from_millis(80));
        // Activity was just refreshed, but the absolute budget still fires.
        g.update_activity(Some("runaway"));

        let reclaimed = g.reclaim_stalled();
        assert_eq!(reclaimed, vec!["runaway".to_string()]);
    }

    #[test]
    fn test_acquire_after_reclaim() {
        let g = BuildGovernor::new(1, Duration::from_millis(20), Duration::from_secs(60));
        assert!(g.try_acquire("a"));
        std::thread::sleep(Duration::from_millis(50));
        g.reclaim_stalled();
        assert!(g.try_acquire("a"));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let g = Arc::new(governor(2));
        {
            let _guard = g.admit("alice").unwrap();
            assert_eq!(g.active_count(), 1);
        }
        assert_eq!(g.active_count(), 0);
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let g = Arc::new(governor(2));
        let g2 = Arc::clone(&g);
        let result = std::panic::catch_unwind(move || {
            let _guard = g2.admit("alice").unwrap();
            panic!("step exploded");
        });
        assert!(result.is_err());
        assert_eq!(g.active_count(), 0);
        assert!(g.try_acquire("alice"));
    }

    #[test]
    fn test_status_line_idle() {
        let g = governor(2);
        assert_eq!(g.status_line(), "0/2 slots busy");
    }

    #[test]
    fn test_status_line_busy() {
        let g = governor(2);
        assert!(g.try_acquire("alice"));
        let line = g.status_line();
        assert!(line.starts_with("1/2 slots busy"));
        assert!(line.contains("alice"));
    }

    #[test]
    fn test_current_build_is_longest_running() {
        let g = governor(3);
        assert!(g.try_acquire("older"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(g.try_acquire("newer"));
        let current = g.current_build().unwrap();
        assert_eq!(current.requester, "older");
    }

    #[test]
    fn test_concurrent_admission_grants_exactly_capacity() {
        let g = Arc::new(governor(2));
        let mut handles = Vec::new();
        for id in ["a", "b", "c"] {
            let g = Arc::clone(&g);
            handles.push(std::thread::spawn(move || g.try_acquire(id)));
        }
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|granted| *granted)
            .count();

        assert_eq!(granted, 2);
        assert_eq!(g.active_count(), 2);
    }
}
