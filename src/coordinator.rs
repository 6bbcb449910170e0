//! Shared data-update coordinator: one poller per house.
//!
//! All entities of a house read the snapshot cached here; none of them talk
//! to the vendor on their own for reads. A dedicated worker thread keeps a
//! steady cadence (like the realtime collection loop this grew out of) and
//! doubles as the executor for on-demand refreshes, which arrive over a
//! control channel and coalesce while a fetch is in flight.
//!
//! Failure policy: a failed cycle never tears down the loop and never touches
//! the previously published snapshot; it only ages it. The next cycle retries,
//! forever.

use crate::client::{ContromeApi, ContromeClientError};
use crate::models::controme::{HouseId, RoomId};
use crate::normalize::{RoomReadings, normalize_house};
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Snapshot age (in poll intervals) beyond which entities report unavailable.
const STALE_AFTER_INTERVALS: u32 = 3;

/// All rooms' readings from one successful poll. Published atomically as a
/// whole; never merged into.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub rooms: BTreeMap<RoomId, RoomReadings>,
    pub taken_at: DateTime<Utc>,
}

enum Control {
    Refresh,
    Shutdown,
}

#[derive(Default)]
struct Status {
    /// Completed fetch cycles, success or failure.
    generation: u64,
    /// A fetch is in flight right now.
    busy: bool,
    last_success_at: Option<Instant>,
    last_update_ok: bool,
    consecutive_failures: u32,
}

struct Shared {
    house: HouseId,
    interval: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    status: Mutex<Status>,
    cycle_done: Condvar,
    shutdown: AtomicBool,
    listeners: Mutex<Vec<mpsc::Sender<()>>>,
}

pub struct UpdateCoordinator {
    shared: Arc<Shared>,
    control: mpsc::Sender<Control>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl UpdateCoordinator {
    /// Run one synchronous fetch to prime the cache, then spawn the poller.
    ///
    /// A failing initial fetch is not fatal: entities start out unavailable
    /// and the cadence retries.
    pub fn start(api: Arc<dyn ContromeApi>, house: HouseId, interval: Duration) -> UpdateCoordinator {
        let shared = Arc::new(Shared {
            house,
            interval,
            snapshot: RwLock::new(None),
            status: Mutex::new(Status::default()),
            cycle_done: Condvar::new(),
            shutdown: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });

        run_cycle(api.as_ref(), &shared);

        let (control, control_rx) = mpsc::channel();
        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || worker_loop(api, shared, control_rx))
        };

        UpdateCoordinator {
            shared,
            control,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// The currently published snapshot, if any poll ever succeeded.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.snapshot.read().unwrap().clone()
    }

    /// Current readings of one room, from the published snapshot.
    pub fn room(&self, room: RoomId) -> Option<RoomReadings> {
        self.snapshot().and_then(|s| s.rooms.get(&room).cloned())
    }

    pub fn last_update_ok(&self) -> bool {
        self.shared.status.lock().unwrap().last_update_ok
    }

    /// Age of the published snapshot since the last successful poll.
    pub fn staleness(&self) -> Option<Duration> {
        self.shared
            .status
            .lock()
            .unwrap()
            .last_success_at
            .map(|t| t.elapsed())
    }

    /// Whether the snapshot is too old to trust. True until the first
    /// successful poll.
    pub fn is_stale(&self) -> bool {
        match self.staleness() {
            Some(age) => age > self.shared.interval * STALE_AFTER_INTERVALS,
            None => true,
        }
    }

    /// Register for a notification after every successful publish.
    pub fn subscribe(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        self.shared.listeners.lock().unwrap().push(tx);
        rx
    }

    /// Run one fetch cycle out of band and block until it completed.
    ///
    /// Requests arriving while a fetch is pending coalesce into a single
    /// fetch; a fetch that was already in flight when this was called does
    /// not count, because its data may predate the caller's reason for
    /// refreshing (a just-completed setpoint write).
    pub fn request_refresh(&self) {
        let target = {
            let st = self.shared.status.lock().unwrap();
            st.generation + if st.busy { 2 } else { 1 }
        };

        if self.control.send(Control::Refresh).is_err() {
            // Worker already gone; nothing to wait for.
            return;
        }

        let mut st = self.shared.status.lock().unwrap();
        while st.generation < target && !self.shared.shutdown.load(Ordering::SeqCst) {
            let (guard, _) = self
                .shared
                .cycle_done
                .wait_timeout(st, Duration::from_millis(500))
                .unwrap();
            st = guard;
        }
    }

    /// Stop the poller and join the worker thread. A fetch that is in flight
    /// completes and its result is discarded.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.control.send(Control::Shutdown);
        self.shared.cycle_done.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(api: Arc<dyn ContromeApi>, shared: Arc<Shared>, control: mpsc::Receiver<Control>) {
    'cadence: loop {
        match control.recv_timeout(shared.interval) {
            Ok(Control::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Ok(Control::Refresh) | Err(mpsc::RecvTimeoutError::Timeout) => {
                // Coalesce demand refreshes that piled up while we were away;
                // they are all satisfied by the one fetch below.
                loop {
                    match control.try_recv() {
                        Ok(Control::Refresh) => continue,
                        Ok(Control::Shutdown) => break 'cadence,
                        Err(_) => break,
                    }
                }
                if shared.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                run_cycle(api.as_ref(), &shared);
            }
        }
    }
    // Wake any refresh waiters so they don't block on a dead worker.
    shared.cycle_done.notify_all();
}

/// One full cycle: fetch the whole house (exactly one API read), normalize,
/// publish. On failure the previous snapshot stays published untouched.
fn run_cycle(api: &dyn ContromeApi, shared: &Shared) {
    {
        let mut st = shared.status.lock().unwrap();
        st.busy = true;
    }

    let result = api.fetch_house(shared.house);

    let mut st = shared.status.lock().unwrap();
    if shared.shutdown.load(Ordering::SeqCst) {
        // Teardown raced the fetch: discard the result instead of publishing.
        st.generation += 1;
        st.busy = false;
        drop(st);
        shared.cycle_done.notify_all();
        return;
    }

    let published = match result {
        Ok(floors) => {
            let rooms = normalize_house(&floors);
            debug!("Poll ok: house {}, {} room(s)", shared.house.0, rooms.len());
            let snapshot = Arc::new(Snapshot {
                rooms,
                taken_at: Utc::now(),
            });
            *shared.snapshot.write().unwrap() = Some(snapshot);
            st.last_success_at = Some(Instant::now());
            st.last_update_ok = true;
            st.consecutive_failures = 0;
            true
        }
        Err(e) => {
            st.last_update_ok = false;
            st.consecutive_failures += 1;
            let failures = st.consecutive_failures;
            let age = st
                .last_success_at
                .map(|t| format!("{}s", t.elapsed().as_secs()))
                .unwrap_or_else(|| "-".to_string());
            match &e {
                ContromeClientError::Auth(_) => error!(
                    "GET temps failed for house {}: {} (consecutive failures {}, snapshot age {})",
                    shared.house.0, e, failures, age
                ),
                _ => warn!(
                    "GET temps failed for house {}: {} (consecutive failures {}, snapshot age {})",
                    shared.house.0, e, failures, age
                ),
            }
            false
        }
    };

    st.generation += 1;
    st.busy = false;
    drop(st);
    shared.cycle_done.notify_all();

    if published {
        notify_listeners(shared);
    }
}

fn notify_listeners(shared: &Shared) {
    let mut listeners = shared.listeners.lock().unwrap();
    listeners.retain(|tx| tx.send(()).is_ok());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TargetDuration;
    use crate::models::controme::RawFloor;
    use crate::normalize::Reading;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn three_room_payload() -> Vec<RawFloor> {
        serde_json::from_value(json!([
            {
                "id": 1,
                "etagenname": "EG",
                "raeume": [
                    {"id": 1, "name": "Wohnzimmer", "temperatur": 21.5, "solltemperatur": 22.0, "luftfeuchte": 45, "betriebsart": "1"},
                    {"id": 2, "name": "Küche", "temperatur": 20.1, "solltemperatur": 20.0, "luftfeuchte": 50, "betriebsart": "1"}
                ]
            },
            {
                "id": 2,
                "etagenname": "OG",
                "raeume": [
                    {"id": 3, "name": "Bad", "temperatur": 23.0, "solltemperatur": 23.0, "luftfeuchte": 60, "betriebsart": "2"}
                ]
            }
        ]))
        .unwrap()
    }

    /// Scripted stand-in for the vendor API: counts fetches, optionally
    /// fails after the first N and delays each call.
    struct FakeApi {
        fetches: AtomicUsize,
        succeed_first: usize,
        delay: Duration,
    }

    impl FakeApi {
        fn ok() -> FakeApi {
            FakeApi {
                fetches: AtomicUsize::new(0),
                succeed_first: usize::MAX,
                delay: Duration::ZERO,
            }
        }

        fn count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    impl ContromeApi for FakeApi {
        fn fetch_house(&self, _house: HouseId) -> Result<Vec<RawFloor>, ContromeClientError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            if n < self.succeed_first {
                Ok(three_room_payload())
            } else {
                Err(ContromeClientError::Transport("connection refused".into()))
            }
        }

        fn set_temporary_target(
            &self,
            _house: HouseId,
            _room: RoomId,
            _target_celsius: f64,
            _duration: TargetDuration,
        ) -> Result<(), ContromeClientError> {
            Ok(())
        }
    }

    #[test]
    fn one_fetch_per_cycle_regardless_of_room_count() {
        let api = Arc::new(FakeApi::ok());
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_secs(3600));

        // Initial prime: three rooms, one call.
        assert_eq!(api.count(), 1);
        assert_eq!(coordinator.snapshot().unwrap().rooms.len(), 3);

        coordinator.request_refresh();
        assert_eq!(api.count(), 2);
    }

    #[test]
    fn failed_poll_keeps_previous_snapshot_untouched() {
        let api = Arc::new(FakeApi {
            succeed_first: 1,
            ..FakeApi::ok()
        });
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_secs(3600));

        let before = coordinator.snapshot().expect("primed snapshot");
        assert!(coordinator.last_update_ok());

        coordinator.request_refresh();

        let after = coordinator.snapshot().expect("snapshot survives failure");
        assert_eq!(before.rooms, after.rooms);
        assert_eq!(before.taken_at, after.taken_at);
        assert!(!coordinator.last_update_ok());
        assert!(coordinator.staleness().is_some());
    }

    #[test]
    fn overlapping_demand_refreshes_coalesce() {
        let api = Arc::new(FakeApi {
            delay: Duration::from_millis(100),
            ..FakeApi::ok()
        });
        let coordinator = Arc::new(UpdateCoordinator::start(
            api.clone(),
            HouseId(1),
            Duration::from_secs(3600),
        ));
        assert_eq!(api.count(), 1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(thread::spawn(move || coordinator.request_refresh()));
        }
        for h in handles {
            h.join().unwrap();
        }

        // 8 overlapping requests must not cost 8 fetches: one coalesced batch,
        // plus follow-ups for stragglers that arrived mid-fetch.
        let total = api.count();
        assert!(total >= 2 && total <= 4, "expected 2..=4 fetches, got {total}");
    }

    #[test]
    fn becomes_stale_after_repeated_failures() {
        let api = Arc::new(FakeApi {
            succeed_first: 1,
            ..FakeApi::ok()
        });
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_millis(10));

        assert!(!coordinator.is_stale());

        // Every subsequent cycle fails; age passes 3x the interval.
        thread::sleep(Duration::from_millis(150));
        assert!(coordinator.is_stale());
        assert!(coordinator.snapshot().is_some());
        assert!(!coordinator.last_update_ok());
    }

    #[test]
    fn stale_until_first_success() {
        let api = Arc::new(FakeApi {
            succeed_first: 0,
            ..FakeApi::ok()
        });
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_secs(3600));

        assert!(coordinator.snapshot().is_none());
        assert!(coordinator.is_stale());
        assert_eq!(coordinator.staleness(), None);
    }

    #[test]
    fn shutdown_mid_fetch_discards_the_result() {
        let api = Arc::new(FakeApi {
            delay: Duration::from_millis(200),
            ..FakeApi::ok()
        });
        let coordinator = Arc::new(UpdateCoordinator::start(
            api.clone(),
            HouseId(1),
            Duration::from_secs(3600),
        ));
        let before = coordinator.snapshot().expect("primed snapshot");

        // Get a fetch in flight, then tear down while it sleeps.
        let refresher = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || coordinator.request_refresh())
        };
        thread::sleep(Duration::from_millis(50));
        coordinator.shutdown();
        refresher.join().unwrap();

        // The in-flight fetch completed but its result was not published.
        assert_eq!(api.count(), 2);
        let after = coordinator.snapshot().expect("snapshot still published");
        assert_eq!(before.taken_at, after.taken_at);
        assert!(coordinator.last_update_ok());
    }

    #[test]
    fn shutdown_stops_the_cadence() {
        let api = Arc::new(FakeApi::ok());
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_millis(10));

        coordinator.shutdown();
        let at_shutdown = api.count();
        thread::sleep(Duration::from_millis(60));
        assert_eq!(api.count(), at_shutdown);
    }

    #[test]
    fn listeners_hear_about_successful_publishes_only() {
        let api = Arc::new(FakeApi {
            succeed_first: 2,
            ..FakeApi::ok()
        });
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_secs(3600));

        let updates = coordinator.subscribe();

        // Second fetch succeeds and notifies.
        coordinator.request_refresh();
        assert!(updates.try_recv().is_ok());

        // Third fetch fails: snapshot kept, no notification.
        coordinator.request_refresh();
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn readings_are_reachable_by_room() {
        let api = Arc::new(FakeApi::ok());
        let coordinator =
            UpdateCoordinator::start(api.clone(), HouseId(1), Duration::from_secs(3600));

        let bad = coordinator.room(RoomId(3)).expect("room present");
        assert_eq!(bad.name, "Bad");
        assert_eq!(bad.current_temperature, Reading::Numeric(23.0));
        assert!(coordinator.room(RoomId(99)).is_none());
    }
}
