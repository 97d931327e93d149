//!
//! Components shared by the tests of this crate.
//!

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use crossbeam::channel::{unbounded, Receiver, Sender};

use rtec_core::{ComponentProxy, ReturnCode};

/// A component that records every callback it receives.
///
/// Callbacks can be told to fail or panic by name.
pub struct Recorder {
    calls: Mutex<HashMap<&'static str, (u64, u64)>>,
    failing: Mutex<HashSet<&'static str>>,
    panicking: Mutex<HashSet<&'static str>>,
    events: Option<Sender<&'static str>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            events: None,
        }
    }

    /// A recorder that also sends the name of every callback over a channel
    pub fn with_events() -> (Self, Receiver<&'static str>) {
        let (tx, rx) = unbounded();
        let mut recorder = Self::new();
        recorder.events = Some(tx);
        (recorder, rx)
    }

    pub fn fail(&self, callback: &'static str) {
        self.failing.lock().unwrap().insert(callback);
    }

    pub fn succeed(&self, callback: &'static str) {
        self.failing.lock().unwrap().remove(callback);
    }

    pub fn panic_on(&self, callback: &'static str) {
        self.panicking.lock().unwrap().insert(callback);
    }

    pub fn count(&self, callback: &'static str) -> u64 {
        self.calls.lock().unwrap().get(callback).map_or(0, |c| c.0)
    }

    pub fn last_cycle(&self, callback: &'static str) -> Option<u64> {
        self.calls.lock().unwrap().get(callback).map(|c| c.1)
    }

    pub fn total(&self) -> u64 {
        self.calls.lock().unwrap().values().map(|c| c.0).sum()
    }

    fn record(&self, callback: &'static str, cycle: u64) -> ReturnCode {
        {
            let mut calls = self.calls.lock().unwrap();
            let entry = calls.entry(callback).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = cycle;
        }
        if let Some(events) = self.events.as_ref() {
            let _ = events.send(callback);
        }
        if self.panicking.lock().unwrap().contains(callback) {
            panic!("{} panicked", callback);
        }
        if self.failing.lock().unwrap().contains(callback) {
            ReturnCode::Error
        } else {
            ReturnCode::Ok
        }
    }
}

impl ComponentProxy for Recorder {
    fn on_execute(&self, cycle: u64) -> ReturnCode {
        self.record("on_execute", cycle)
    }

    fn on_activated(&self, cycle: u64) -> ReturnCode {
        self.record("on_activated", cycle)
    }

    fn on_deactivated(&self, cycle: u64) -> ReturnCode {
        self.record("on_deactivated", cycle)
    }

    fn on_aborting(&self, cycle: u64) -> ReturnCode {
        self.record("on_aborting", cycle)
    }

    fn on_error(&self, cycle: u64) -> ReturnCode {
        self.record("on_error", cycle)
    }

    fn on_reset(&self, cycle: u64) -> ReturnCode {
        self.record("on_reset", cycle)
    }

    fn on_state_update(&self, cycle: u64) -> ReturnCode {
        self.record("on_state_update", cycle)
    }

    fn on_rate_changed(&self, cycle: u64) -> ReturnCode {
        self.record("on_rate_changed", cycle)
    }

    fn on_startup(&self, cycle: u64) -> ReturnCode {
        self.record("on_startup", cycle)
    }

    fn on_shutdown(&self, cycle: u64) -> ReturnCode {
        self.record("on_shutdown", cycle)
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}
