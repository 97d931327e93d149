//!
//! The Execution Context owns a worker thread and drives the lifecycle of
//! every participant attached to it.
//!
//! Administrative callers (any thread) only ever mutate the profile or
//! request a lifecycle transition.  The worker is the only thread that
//! invokes component callbacks during a tick, and it blocks on the
//! configured [`WaitStrategy`] between ticks.  When no participant needs
//! ticking the worker parks on a gate until an administrative call wakes
//! it up again.
//!
//! One tick runs in three phases over a snapshot of the participant list:
//!
//! 1. pre-do: the snapshot itself, taken under the profile lock
//! 2. do: the do-action of every participant (`on_execute` when ACTIVE,
//!    `on_error` in ERROR)
//! 3. post-do: `on_state_update` for ACTIVE participants, then any owed
//!    `on_rate_changed`, then every pending transition is applied
//!
//! A rate change is put in force by the administrative caller but only
//! recorded on the participants, so `on_rate_changed` runs on the worker
//! like every other callback.
//!
//! No lock is held while a callback runs, so callbacks are free to call
//! back into the execution context.
//!

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use crossbeam::channel::{bounded, Sender};
use quanta::Clock;
use tracing::{debug, error, info, trace, warn};

use rtec_core::{
    ComponentId, ComponentProxy, ExecutionContextService, ExecutionKind, LifecycleState, ProfileSnapshot,
    ReturnCode, SchedulerRunState,
};

use crate::{
    arena::ComponentArena,
    error::{EcError, Result},
    gate::{Gate, Signal, Wake},
    profile::Profile,
    state_machine::LifecycleStateMachine,
    stats::{ExecutionStats, TimeMeasure},
    strategy::{Cycle, Deadline, WaitStrategy},
};

/// How many ticks pass between two timing summaries in the trace log
const STATS_LOG_INTERVAL: u64 = 1000;

/// The state shared between the administrative surface and the worker
struct Shared {
    name: String,
    profile: Profile,
    strategy: Box<dyn WaitStrategy>,
    arena: Arc<ComponentArena>,
    /// The worker parks here while no participant needs ticking
    park: Gate<Signal>,
    /// Bumped by every start and stop, a worker leaves its loop once the
    /// epoch it was started in has passed
    epoch: AtomicU64,
    /// The thread running the most recent worker
    worker_thread: Mutex<Option<ThreadId>>,
    running: AtomicBool,
    run_state: AtomicU8,
    ticks: AtomicU64,
    clock: Clock,
    measure: Mutex<TimeMeasure>,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }

    fn on_worker_thread(&self) -> bool {
        *self.worker_thread.lock().unwrap_or_else(PoisonError::into_inner)
            == Some(thread::current().id())
    }

    /// Make the current worker leave its loop
    fn signal_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.park.close();
        self.strategy.interrupt();
    }

    fn run_state(&self) -> SchedulerRunState {
        match self.run_state.load(Ordering::Acquire) {
            1 => SchedulerRunState::Parked,
            2 => SchedulerRunState::Ticking,
            _ => SchedulerRunState::Stopped,
        }
    }

    fn set_run_state(&self, state: SchedulerRunState) {
        let raw = match state {
            SchedulerRunState::Stopped => 0,
            SchedulerRunState::Parked => 1,
            SchedulerRunState::Ticking => 2,
        };
        self.run_state.store(raw, Ordering::Release);
    }

    /// Whether any participant is ACTIVE, in ERROR, waiting for a
    /// transition or owed a rate change
    fn needs_ticking(&self) -> bool {
        self.profile.view().participants().iter().any(|participant| {
            let states = participant.states();
            states.is_pending()
                || participant.rate_change_pending()
                || matches!(states.curr, LifecycleState::Active | LifecycleState::Error)
        })
    }

    /// Run one tick over every participant.  Returns the number of
    /// participants that changed state.
    fn tick(&self) -> usize {
        let participants = self.profile.participants();

        for participant in participants.iter() {
            participant.do_action();
        }

        let mut changed = 0;
        for participant in participants.iter() {
            participant.post_action();
            participant.deliver_rate_change();
            if participant.apply_pending().is_some() {
                changed += 1;
            }
        }

        self.ticks.fetch_add(1, Ordering::AcqRel);
        if changed > 0 {
            debug!(ec = %self.name, changed, "participants changed state");
        }
        changed
    }

    fn measure(&self) -> MutexGuard<'_, TimeMeasure> {
        self.measure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, elapsed: Duration, period: Duration) {
        let mut measure = self.measure();
        measure.record(elapsed, period);
        measure.record_strategy(self.strategy.coalesced(), self.strategy.missed_releases());
        let stats = measure.stats();
        if stats.count % STATS_LOG_INTERVAL == 0 {
            trace!(
                ec = %self.name,
                ticks = stats.count,
                mean_us = stats.mean * 1e6,
                stddev_us = stats.stddev * 1e6,
                max_us = stats.max.as_secs_f64() * 1e6,
                overruns = stats.overruns,
                missed_releases = stats.missed_releases,
                "timing summary"
            );
        }
    }

    fn broadcast(&self, callback: &'static str, f: fn(&dyn ComponentProxy, u64) -> ReturnCode) {
        for participant in self.profile.participants() {
            participant.invoke(callback, f);
        }
    }
}

/// The body of the worker thread
fn run_worker(shared: Arc<Shared>, epoch: u64, ready: Sender<Result<()>>) {
    *shared.worker_thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(thread::current().id());
    if let Err(err) = shared.strategy.prepare(shared.profile.period()) {
        let _ = ready.send(Err(err));
        return;
    }
    shared.broadcast("on_startup", |proxy, cycle| proxy.on_startup(cycle));
    let _ = ready.send(Ok(()));
    drop(ready);

    let mut next = shared.clock.now();
    while shared.is_current(epoch) {
        if !shared.needs_ticking() {
            shared.set_run_state(SchedulerRunState::Parked);
            trace!(ec = %shared.name, "worker parked");
            if shared.park.park() == Wake::Closed {
                break;
            }
            shared.strategy.resume();
            next = shared.clock.now();
            continue;
        }

        if shared.strategy.await_next_cycle(Deadline::new(&shared.clock, next)) == Cycle::Interrupted
            || !shared.is_current(epoch)
        {
            break;
        }

        shared.set_run_state(SchedulerRunState::Ticking);
        let start = shared.clock.now();
        shared.tick();
        let elapsed = shared.clock.now().duration_since(start);
        let period = shared.strategy.period();
        shared.record(elapsed, period);
        next = start + period;
    }

    shared.set_run_state(SchedulerRunState::Stopped);
    shared.broadcast("on_shutdown", |proxy, cycle| proxy.on_shutdown(cycle));
    if let Err(err) = shared.strategy.teardown() {
        error!(ec = %shared.name, %err, "failed to release the timing resource");
    }
    debug!(ec = %shared.name, "worker exited");
}

/// Execution Context
///
/// A worker thread ticking a set of participants with a pluggable wait
/// strategy.  Every administrative operation comes in two forms: a
/// `try_*` method returning a typed [`Result`] and the
/// [`ExecutionContextService`] method returning a flat [`ReturnCode`].
pub struct ExecutionContext {
    shared: Arc<Shared>,
    /// The worker, present while the context is running
    worker: Mutex<Option<JoinHandle<()>>>,
    /// A worker that was stopped from one of its own callbacks and may
    /// still be finishing its tick
    detached: Mutex<Option<JoinHandle<()>>>,
    /// Serializes rate changes
    rate_lock: Mutex<()>,
}

impl ExecutionContext {
    /// Create a new, stopped execution context.
    ///
    /// Components are resolved through `arena` when they are added.
    pub fn new(
        name: impl Into<String>,
        strategy: Box<dyn WaitStrategy>,
        rate: f64,
        arena: Arc<ComponentArena>,
    ) -> Result<Self> {
        let profile = Profile::new(strategy.kind(), rate)?;
        strategy.reconfigure(profile.period())?;

        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                profile,
                strategy,
                arena,
                park: Gate::signal(),
                epoch: AtomicU64::new(0),
                worker_thread: Mutex::new(None),
                running: AtomicBool::new(false),
                run_state: AtomicU8::new(0),
                ticks: AtomicU64::new(0),
                clock: Clock::new(),
                measure: Mutex::new(TimeMeasure::default()),
            }),
            worker: Mutex::new(None),
            detached: Mutex::new(None),
            rate_lock: Mutex::new(()),
        })
    }

    /// The name of this execution context
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The name of the wait strategy
    pub fn strategy_name(&self) -> &'static str {
        self.shared.strategy.name()
    }

    /// The live profile
    pub fn profile(&self) -> &Profile {
        &self.shared.profile
    }

    /// What the worker is currently doing
    pub fn run_state(&self) -> SchedulerRunState {
        self.shared.run_state()
    }

    /// The number of ticks executed so far
    pub fn tick_count(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// The timing statistics of the worker
    pub fn stats(&self) -> ExecutionStats {
        let mut measure = self.shared.measure();
        measure.record_strategy(
            self.shared.strategy.coalesced(),
            self.shared.strategy.missed_releases(),
        );
        measure.stats()
    }

    /// The lifecycle state machine of a participant
    pub fn participant(&self, id: ComponentId) -> Result<Arc<LifecycleStateMachine>> {
        self.shared
            .profile
            .find(id)
            .ok_or_else(|| self.missing(id))
    }

    /// Start the worker.
    ///
    /// Starting a running context does nothing.  If the wait strategy fails
    /// to prepare, the context stays stopped.  A worker stopped from one of
    /// its own callbacks is joined before the new one is spawned.
    pub fn try_start(&self) -> Result<()> {
        if self.shared.on_worker_thread() {
            return if self.is_running() {
                Ok(())
            } else {
                Err(EcError::Unsupported("restarting from inside a callback"))
            };
        }

        let mut worker = self.lock_worker();
        if worker.is_some() {
            return Ok(());
        }
        self.join_detached()?;

        self.shared.park.reopen();
        let epoch = self.shared.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let (tx, rx) = bounded(1);
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name(format!("rtec-{}", self.shared.name))
            .spawn(move || run_worker(shared, epoch, tx))
            .map_err(|err| EcError::Thread(err.to_string()))?;

        let ready = rx
            .recv()
            .unwrap_or_else(|_| Err(EcError::Thread("worker exited before it was ready".into())));
        if let Err(err) = ready {
            let _ = handle.join();
            return Err(err);
        }
        if !self.shared.is_current(epoch) {
            // Stopped by an on_startup callback
            let _ = handle.join();
            return Ok(());
        }

        *worker = Some(handle);
        self.shared.running.store(true, Ordering::Release);
        info!(
            ec = %self.shared.name,
            strategy = self.strategy_name(),
            rate = self.shared.profile.rate(),
            "execution context started"
        );
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Stopping is not deactivation: participants keep their lifecycle
    /// state and only receive `on_shutdown`.
    pub fn try_stop(&self) -> Result<()> {
        if self.shared.on_worker_thread() {
            // Stopped from inside a callback, the worker leaves on its own
            let mut worker = match self.worker.try_lock() {
                Ok(worker) => Some(worker),
                Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
                // Whoever holds the lock is starting or stopping and joins
                Err(TryLockError::WouldBlock) => None,
            };
            if let Some(handle) = worker.as_mut().and_then(|worker| worker.take()) {
                *self.lock_detached() = Some(handle);
            }
            self.shared.signal_stop();
            drop(worker);
            debug!(ec = %self.shared.name, "stop requested by the worker itself");
            return Ok(());
        }

        let mut worker = self.lock_worker();
        let Some(handle) = worker.take() else {
            return self.join_detached();
        };
        self.shared.signal_stop();
        handle
            .join()
            .map_err(|_| EcError::Thread("worker panicked".into()))?;
        info!(ec = %self.shared.name, "execution context stopped");
        Ok(())
    }

    /// Change the rate (in Hz)
    pub fn try_set_rate(&self, rate: f64) -> Result<()> {
        let _guard = self.lock_rate();
        let old = self.shared.profile.rate();
        self.shared.profile.set_rate(rate)?;
        self.rate_changed(old)
    }

    /// Change the period
    pub fn try_set_period(&self, period: Duration) -> Result<()> {
        let _guard = self.lock_rate();
        let old = self.shared.profile.rate();
        self.shared.profile.set_period(period)?;
        self.rate_changed(old)
    }

    /// Put the period of the profile in force and owe every participant an
    /// `on_rate_changed`.
    ///
    /// If the wait strategy refuses the new period the profile goes back to
    /// `old`.  Must be called with the rate lock held.
    fn rate_changed(&self, old: f64) -> Result<()> {
        let period = self.shared.profile.period();
        if period == self.shared.strategy.period() {
            return Ok(());
        }
        if let Err(err) = self.shared.strategy.reconfigure(period) {
            let _ = self.shared.profile.set_rate(old);
            return Err(err);
        }
        info!(ec = %self.shared.name, rate = self.shared.profile.rate(), "rate changed");

        for participant in self.shared.profile.participants() {
            participant.notify_rate_changed();
        }
        self.shared.park.wake();
        Ok(())
    }

    /// Attach a component as a participant.
    ///
    /// The participant starts in CREATED and moves to INACTIVE right away
    /// when the context is stopped, or on the next tick otherwise.
    pub fn try_add_component(&self, id: ComponentId) -> Result<()> {
        let proxy = self
            .shared
            .arena
            .resolve(id)
            .ok_or(EcError::NoSuchComponent(id))?;
        let participant = Arc::new(LifecycleStateMachine::new(id, proxy));
        self.shared.profile.add_component(participant.clone())?;

        if self.is_running() {
            self.shared.park.wake();
        } else {
            participant.apply_pending();
        }
        debug!(ec = %self.shared.name, component = %id, "component added");
        Ok(())
    }

    /// Detach a participant without invoking any of its callbacks
    pub fn try_remove_component(&self, id: ComponentId) -> Result<()> {
        self.shared
            .profile
            .remove_component(id)
            .map_err(|_| self.missing(id))?;
        if self.shared.profile.owner() == Some(id) {
            self.shared.profile.set_owner(None);
        }
        debug!(ec = %self.shared.name, component = %id, "component removed");
        Ok(())
    }

    /// Attach a component and make it the owner of this context
    pub fn try_bind_component(&self, id: ComponentId) -> Result<()> {
        self.try_add_component(id)?;
        self.shared.profile.set_owner(Some(id));
        Ok(())
    }

    /// Request INACTIVE -> ACTIVE
    pub fn try_activate_component(&self, id: ComponentId) -> Result<()> {
        self.request(id, LifecycleState::Inactive, LifecycleState::Active)
    }

    /// Request ACTIVE -> INACTIVE
    pub fn try_deactivate_component(&self, id: ComponentId) -> Result<()> {
        self.request(id, LifecycleState::Active, LifecycleState::Inactive)
    }

    /// Request ERROR -> INACTIVE
    pub fn try_reset_component(&self, id: ComponentId) -> Result<()> {
        self.request(id, LifecycleState::Error, LifecycleState::Inactive)
    }

    /// Trigger one tick of an externally triggered context.
    ///
    /// Does nothing while the context is stopped.
    pub fn try_tick(&self) -> Result<()> {
        if !self.is_running() {
            trace!(ec = %self.shared.name, "tick ignored, execution context is stopped");
            return Ok(());
        }
        self.shared.strategy.trigger()
    }

    /// Trigger one tick of an externally triggered context
    pub fn tick(&self) -> ReturnCode {
        self.report("tick", self.try_tick())
    }

    /// Attach a component and make it the owner of this context
    pub fn bind_component(&self, id: ComponentId) -> ReturnCode {
        self.report("bind_component", self.try_bind_component(id))
    }

    /// Change the period
    pub fn set_period(&self, period: Duration) -> ReturnCode {
        self.report("set_period", self.try_set_period(period))
    }

    /// Stop the worker and move every participant to EXITING
    pub fn finalize(&self) {
        if let Err(err) = self.try_stop() {
            error!(ec = %self.shared.name, %err, "failed to stop while finalizing");
        }
        for participant in self.shared.profile.participants() {
            participant.exit();
        }
    }

    #[cfg(test)]
    pub(crate) fn invoke_worker(&self) -> usize {
        self.shared.tick()
    }

    fn request(&self, id: ComponentId, from: LifecycleState, to: LifecycleState) -> Result<()> {
        self.participant(id)?.request_from(from, to)?;
        self.shared.park.wake();
        Ok(())
    }

    /// The error for an id that is not a participant
    fn missing(&self, id: ComponentId) -> EcError {
        if self.shared.arena.contains(id) {
            EcError::NotParticipant(id)
        } else {
            EcError::NoSuchComponent(id)
        }
    }

    /// Flatten the result of an administrative operation into a return code,
    /// logging the failure
    fn report(&self, op: &'static str, result: Result<()>) -> ReturnCode {
        match result {
            Ok(()) => ReturnCode::Ok,
            Err(err) => {
                let code = err.code();
                warn!(ec = %self.shared.name, op, %code, %err, "operation failed");
                code
            }
        }
    }

    /// Wait for a worker stopped from one of its own callbacks to exit
    fn join_detached(&self) -> Result<()> {
        let detached = self.lock_detached().take();
        if let Some(handle) = detached {
            handle
                .join()
                .map_err(|_| EcError::Thread("worker panicked".into()))?;
            debug!(ec = %self.shared.name, "detached worker joined");
        }
        Ok(())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_detached(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.detached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_rate(&self) -> MutexGuard<'_, ()> {
        self.rate_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionContextService for ExecutionContext {
    fn start(&self) -> ReturnCode {
        self.report("start", self.try_start())
    }

    fn stop(&self) -> ReturnCode {
        self.report("stop", self.try_stop())
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    fn get_rate(&self) -> f64 {
        self.shared.profile.rate()
    }

    fn get_period(&self) -> Duration {
        self.shared.profile.period()
    }

    fn set_rate(&self, rate: f64) -> ReturnCode {
        self.report("set_rate", self.try_set_rate(rate))
    }

    fn add_component(&self, id: ComponentId) -> ReturnCode {
        self.report("add_component", self.try_add_component(id))
    }

    fn remove_component(&self, id: ComponentId) -> ReturnCode {
        self.report("remove_component", self.try_remove_component(id))
    }

    fn activate_component(&self, id: ComponentId) -> ReturnCode {
        self.report("activate_component", self.try_activate_component(id))
    }

    fn deactivate_component(&self, id: ComponentId) -> ReturnCode {
        self.report("deactivate_component", self.try_deactivate_component(id))
    }

    fn reset_component(&self, id: ComponentId) -> ReturnCode {
        self.report("reset_component", self.try_reset_component(id))
    }

    fn get_component_state(&self, id: ComponentId) -> LifecycleState {
        self.shared
            .profile
            .find(id)
            .map_or(LifecycleState::Unknown, |participant| participant.current())
    }

    fn get_kind(&self) -> ExecutionKind {
        self.shared.profile.kind()
    }

    fn get_profile(&self) -> ProfileSnapshot {
        self.shared.profile.snapshot()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crossbeam::channel::{unbounded, Receiver};

    use crate::{
        strategy::{ExtTriggerStrategy, PeriodicStrategy},
        test_utils::{wait_until, Recorder},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn periodic(arena: &Arc<ComponentArena>, rate: f64) -> ExecutionContext {
        let period = Duration::from_secs_f64(1.0 / rate);
        ExecutionContext::new(
            "test",
            Box::new(PeriodicStrategy::new(period)),
            rate,
            arena.clone(),
        )
        .unwrap()
    }

    fn triggered(arena: &Arc<ComponentArena>) -> ExecutionContext {
        ExecutionContext::new(
            "triggered",
            Box::new(ExtTriggerStrategy::new(Duration::from_millis(1))),
            1000.0,
            arena.clone(),
        )
        .unwrap()
    }

    fn component(arena: &Arc<ComponentArena>) -> (ComponentId, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::new());
        (arena.insert(recorder.clone()), recorder)
    }

    #[test]
    fn test_default_rate() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, crate::config::DEFAULT_RATE);
        assert_eq!(ec.get_rate(), 1_000_000.0);
        assert_eq!(ec.get_period(), Duration::from_micros(1));
        assert_eq!(ec.get_kind(), ExecutionKind::Periodic);
        assert!(!ec.is_running());
        assert_eq!(ec.run_state(), SchedulerRunState::Stopped);
    }

    #[test]
    fn test_set_rate_updates_period() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        assert_eq!(ec.set_rate(10.0), ReturnCode::Ok);
        assert_eq!(ec.get_rate(), 10.0);
        assert_eq!(ec.get_period(), Duration::from_millis(100));
        assert_eq!(ec.shared.strategy.period(), Duration::from_millis(100));

        assert_eq!(ec.set_period(Duration::from_millis(20)), ReturnCode::Ok);
        assert_eq!(ec.get_rate(), 50.0);
    }

    #[test]
    fn test_invalid_rate_keeps_old_rate() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(ec.set_rate(rate), ReturnCode::BadParameter);
        }
        assert_eq!(ec.set_period(Duration::ZERO), ReturnCode::BadParameter);
        assert_eq!(ec.get_rate(), 100.0);
    }

    #[test]
    fn test_rate_change_notifies_participants() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (a, recorder_a) = component(&arena);
        let (b, recorder_b) = component(&arena);
        ec.add_component(a);
        ec.add_component(b);

        ec.activate_component(b);
        ec.invoke_worker();
        recorder_b.fail("on_rate_changed");

        // The new rate is in force right away, the callbacks wait for a tick
        assert_eq!(ec.set_rate(200.0), ReturnCode::Ok);
        assert_eq!(ec.get_rate(), 200.0);
        assert_eq!(recorder_a.count("on_rate_changed"), 0);

        // The failing ACTIVE participant goes to ERROR in the same tick
        ec.invoke_worker();
        assert_eq!(recorder_a.count("on_rate_changed"), 1);
        assert_eq!(recorder_b.count("on_rate_changed"), 1);
        assert_eq!(recorder_b.count("on_aborting"), 1);
        assert_eq!(ec.get_component_state(a), LifecycleState::Inactive);
        assert_eq!(ec.get_component_state(b), LifecycleState::Error);

        // Setting the rate in force again is a no-op
        assert_eq!(ec.set_rate(200.0), ReturnCode::Ok);
        ec.invoke_worker();
        assert_eq!(recorder_a.count("on_rate_changed"), 1);
    }

    #[test]
    fn test_rate_change_delivered_by_worker() {
        #[derive(Default)]
        struct ThreadWitness(Mutex<Vec<Option<String>>>);

        impl ComponentProxy for ThreadWitness {
            fn on_execute(&self, _cycle: u64) -> ReturnCode {
                ReturnCode::Ok
            }

            fn on_rate_changed(&self, _cycle: u64) -> ReturnCode {
                let name = thread::current().name().map(String::from);
                self.0.lock().unwrap().push(name);
                ReturnCode::Ok
            }
        }

        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let witness = Arc::new(ThreadWitness::default());
        let id = arena.insert(witness.clone());
        ec.add_component(id);
        ec.start();
        assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Parked));

        // A parked worker wakes up to deliver the callback
        assert_eq!(ec.set_rate(50.0), ReturnCode::Ok);
        assert!(wait_until(TIMEOUT, || witness.0.lock().unwrap().len() == 1));
        assert_eq!(
            witness.0.lock().unwrap()[0].as_deref(),
            Some("rtec-test")
        );
        assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Parked));
        ec.stop();
    }

    /// Periodic timing whose re-registration for a 100ms period is slow
    struct SlowReconfigure(PeriodicStrategy);

    impl WaitStrategy for SlowReconfigure {
        fn name(&self) -> &'static str {
            "slow_reconfigure"
        }

        fn kind(&self) -> ExecutionKind {
            self.0.kind()
        }

        fn prepare(&self, period: Duration) -> Result<()> {
            self.0.prepare(period)
        }

        fn await_next_cycle(&self, deadline: Deadline<'_>) -> Cycle {
            self.0.await_next_cycle(deadline)
        }

        fn teardown(&self) -> Result<()> {
            self.0.teardown()
        }

        fn interrupt(&self) {
            self.0.interrupt()
        }

        fn period(&self) -> Duration {
            self.0.period()
        }

        fn reconfigure(&self, period: Duration) -> Result<()> {
            if period == Duration::from_millis(100) {
                thread::sleep(Duration::from_millis(50));
            }
            self.0.reconfigure(period)
        }
    }

    #[test]
    fn test_concurrent_rate_changes_stay_consistent() {
        let arena = Arc::new(ComponentArena::new());
        let ec = Arc::new(
            ExecutionContext::new(
                "slow",
                Box::new(SlowReconfigure(PeriodicStrategy::new(Duration::from_millis(1)))),
                1000.0,
                arena,
            )
            .unwrap(),
        );

        let slow = {
            let ec = ec.clone();
            thread::spawn(move || ec.set_rate(10.0))
        };
        thread::sleep(Duration::from_millis(10));
        let fast = {
            let ec = ec.clone();
            thread::spawn(move || ec.set_rate(20.0))
        };
        assert_eq!(slow.join().unwrap(), ReturnCode::Ok);
        assert_eq!(fast.join().unwrap(), ReturnCode::Ok);

        assert_eq!(ec.get_period(), ec.shared.strategy.period());
        assert_eq!(ec.get_rate(), 20.0);
    }

    #[test]
    fn test_add_component() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (id, recorder) = component(&arena);

        assert_eq!(ec.add_component(id), ReturnCode::Ok);
        assert_eq!(ec.get_component_state(id), LifecycleState::Inactive);
        assert_eq!(ec.get_profile().participants, vec![id]);
        assert_eq!(recorder.total(), 0);

        assert_eq!(ec.add_component(id), ReturnCode::BadParameter);
        assert_eq!(ec.add_component(ComponentId::NIL), ReturnCode::BadParameter);
        assert_eq!(ec.get_profile().participants.len(), 1);
    }

    #[test]
    fn test_remove_component() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (id, _) = component(&arena);
        let (outsider, _) = component(&arena);

        assert_eq!(ec.bind_component(id), ReturnCode::Ok);
        assert_eq!(ec.get_profile().owner, Some(id));
        assert_eq!(ec.remove_component(outsider), ReturnCode::BadParameter);
        assert_eq!(ec.remove_component(id), ReturnCode::Ok);
        assert_eq!(ec.get_profile().owner, None);
        assert_eq!(ec.get_component_state(id), LifecycleState::Unknown);
        assert_eq!(ec.remove_component(id), ReturnCode::BadParameter);
    }

    #[test]
    fn test_activation_applies_on_next_tick() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (id, recorder) = component(&arena);
        ec.add_component(id);

        assert_eq!(ec.activate_component(id), ReturnCode::Ok);
        assert_eq!(ec.get_component_state(id), LifecycleState::Inactive);
        assert_eq!(ec.activate_component(id), ReturnCode::PreconditionNotMet);

        assert_eq!(ec.invoke_worker(), 1);
        assert_eq!(ec.get_component_state(id), LifecycleState::Active);
        assert_eq!(recorder.count("on_activated"), 1);
        assert_eq!(recorder.count("on_execute"), 0);

        ec.invoke_worker();
        assert_eq!(recorder.count("on_execute"), 1);
        assert_eq!(recorder.count("on_state_update"), 1);
        assert_eq!(recorder.count("on_activated"), 1);
    }

    #[test]
    fn test_preconditions() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (id, _) = component(&arena);
        let (outsider, _) = component(&arena);
        ec.add_component(id);

        assert_eq!(ec.deactivate_component(id), ReturnCode::PreconditionNotMet);
        assert_eq!(ec.reset_component(id), ReturnCode::PreconditionNotMet);
        assert_eq!(ec.activate_component(outsider), ReturnCode::BadParameter);
        assert_eq!(
            ec.activate_component(ComponentId::NIL),
            ReturnCode::BadParameter
        );
        assert!(matches!(
            ec.try_activate_component(outsider),
            Err(EcError::NotParticipant(_))
        ));
    }

    #[test]
    fn test_error_and_reset() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        let (id, recorder) = component(&arena);
        ec.add_component(id);
        recorder.fail("on_execute");

        ec.activate_component(id);
        ec.invoke_worker();
        ec.invoke_worker();
        assert_eq!(ec.get_component_state(id), LifecycleState::Error);
        assert_eq!(recorder.count("on_aborting"), 1);
        assert_eq!(ec.deactivate_component(id), ReturnCode::PreconditionNotMet);

        ec.invoke_worker();
        assert_eq!(recorder.count("on_error"), 1);

        recorder.succeed("on_execute");
        assert_eq!(ec.reset_component(id), ReturnCode::Ok);
        ec.invoke_worker();
        assert_eq!(ec.get_component_state(id), LifecycleState::Inactive);
        assert_eq!(recorder.count("on_reset"), 1);
    }

    #[test]
    fn test_start_stop() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        let (id, recorder) = component(&arena);
        ec.add_component(id);

        assert_eq!(ec.start(), ReturnCode::Ok);
        assert!(ec.is_running());
        assert_eq!(ec.start(), ReturnCode::Ok);
        assert_eq!(recorder.count("on_startup"), 1);

        ec.activate_component(id);
        assert!(wait_until(TIMEOUT, || recorder.count("on_execute") >= 5));
        assert_eq!(recorder.count("on_activated"), 1);

        assert_eq!(ec.stop(), ReturnCode::Ok);
        assert!(!ec.is_running());
        assert_eq!(ec.run_state(), SchedulerRunState::Stopped);
        assert_eq!(recorder.count("on_shutdown"), 1);
        // Stopping is not deactivating
        assert_eq!(ec.get_component_state(id), LifecycleState::Active);
        assert_eq!(recorder.count("on_deactivated"), 0);

        let executed = recorder.count("on_execute");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.count("on_execute"), executed);

        // Restarting resumes ticking without activating again
        assert_eq!(ec.start(), ReturnCode::Ok);
        assert!(wait_until(TIMEOUT, || recorder.count("on_execute") > executed));
        assert_eq!(recorder.count("on_activated"), 1);
        assert_eq!(ec.stop(), ReturnCode::Ok);
        assert_eq!(ec.stop(), ReturnCode::Ok);
    }

    #[test]
    fn test_callback_order() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        let (recorder, events) = Recorder::with_events();
        let id = arena.insert(Arc::new(recorder));
        ec.add_component(id);
        ec.activate_component(id);
        ec.start();

        let seen: Vec<_> = (0..4)
            .map(|_| events.recv_timeout(TIMEOUT).unwrap())
            .collect();
        assert_eq!(
            seen,
            ["on_startup", "on_activated", "on_execute", "on_state_update"]
        );
        ec.stop();
    }

    /// A strategy that can never be prepared and only accepts a 1ms period
    struct Unpreparable;

    impl WaitStrategy for Unpreparable {
        fn name(&self) -> &'static str {
            "unpreparable"
        }

        fn kind(&self) -> ExecutionKind {
            ExecutionKind::Periodic
        }

        fn prepare(&self, _period: Duration) -> Result<()> {
            Err(EcError::Timing("no timer available".into()))
        }

        fn await_next_cycle(&self, _deadline: Deadline<'_>) -> Cycle {
            Cycle::Interrupted
        }

        fn teardown(&self) -> Result<()> {
            Ok(())
        }

        fn interrupt(&self) {}

        fn period(&self) -> Duration {
            Duration::from_millis(1)
        }

        fn reconfigure(&self, period: Duration) -> Result<()> {
            if period == Duration::from_millis(1) {
                Ok(())
            } else {
                Err(EcError::Timing("the period is fixed".into()))
            }
        }
    }

    #[test]
    fn test_failed_prepare_keeps_context_stopped() {
        let arena = Arc::new(ComponentArena::new());
        let ec = ExecutionContext::new("fixed", Box::new(Unpreparable), 1000.0, arena.clone())
            .unwrap();
        let (id, recorder) = component(&arena);
        ec.add_component(id);

        assert_eq!(ec.start(), ReturnCode::Error);
        assert!(!ec.is_running());
        assert_eq!(ec.run_state(), SchedulerRunState::Stopped);
        assert_eq!(recorder.count("on_startup"), 0);
        assert_eq!(ec.stop(), ReturnCode::Ok);
    }

    #[test]
    fn test_refused_rate_change_reverts() {
        let arena = Arc::new(ComponentArena::new());
        let ec = ExecutionContext::new("fixed", Box::new(Unpreparable), 1000.0, arena.clone())
            .unwrap();
        let (id, recorder) = component(&arena);
        ec.add_component(id);

        assert!(matches!(ec.try_set_rate(10.0), Err(EcError::Timing(_))));
        assert_eq!(ec.get_rate(), 1000.0);
        assert_eq!(ec.get_period(), Duration::from_millis(1));
        assert_eq!(recorder.count("on_rate_changed"), 0);
    }

    #[test]
    fn test_worker_parks_without_active_participants() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        let (id, recorder) = component(&arena);
        ec.add_component(id);

        ec.start();
        assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Parked));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ec.tick_count(), 0);

        ec.activate_component(id);
        assert!(wait_until(TIMEOUT, || recorder.count("on_execute") >= 3));

        ec.deactivate_component(id);
        assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Parked));
        assert_eq!(recorder.count("on_deactivated"), 1);
        let executed = recorder.count("on_execute");
        thread::sleep(Duration::from_millis(20));
        assert_eq!(recorder.count("on_execute"), executed);
        ec.stop();
    }

    #[test]
    fn test_add_while_running() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        ec.start();

        let (id, recorder) = component(&arena);
        ec.add_component(id);
        assert!(wait_until(TIMEOUT, || ec.get_component_state(id)
            == LifecycleState::Inactive));
        assert_eq!(recorder.count("on_execute"), 0);
        ec.stop();
    }

    #[test]
    fn test_tick_drives_ext_trigger() {
        let arena = Arc::new(ComponentArena::new());
        let ec = triggered(&arena);
        let (id, recorder) = component(&arena);
        ec.add_component(id);
        assert_eq!(ec.get_kind(), ExecutionKind::EventDriven);

        // Not running: nothing happens
        assert_eq!(ec.tick(), ReturnCode::Ok);
        assert_eq!(ec.tick_count(), 0);

        ec.start();
        ec.activate_component(id);
        assert_eq!(ec.tick(), ReturnCode::Ok);
        assert!(wait_until(TIMEOUT, || ec.get_component_state(id)
            == LifecycleState::Active));
        assert_eq!(recorder.count("on_execute"), 0);

        for expected in 1..=3 {
            let ticks = ec.tick_count();
            ec.tick();
            assert!(wait_until(TIMEOUT, || ec.tick_count() > ticks));
            assert!(wait_until(TIMEOUT, || recorder.count("on_execute") == expected));
        }
        ec.stop();
    }

    #[test]
    fn test_tick_needs_triggerable_strategy() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 100.0);
        ec.start();
        assert_eq!(ec.tick(), ReturnCode::PreconditionNotMet);
        ec.stop();
    }

    #[test]
    fn test_callbacks_may_call_back() {
        struct Stopper {
            ec: Mutex<Option<Arc<ExecutionContext>>>,
            done: AtomicBool,
        }

        impl ComponentProxy for Stopper {
            fn on_execute(&self, _cycle: u64) -> ReturnCode {
                if let Some(ec) = self.ec.lock().unwrap().take() {
                    ec.get_profile();
                    ec.stop();
                    self.done.store(true, Ordering::Release);
                }
                ReturnCode::Ok
            }
        }

        let arena = Arc::new(ComponentArena::new());
        let ec = Arc::new(periodic(&arena, 1000.0));
        let stopper = Arc::new(Stopper {
            ec: Mutex::new(Some(ec.clone())),
            done: AtomicBool::new(false),
        });
        let id = arena.insert(stopper.clone());
        ec.add_component(id);
        ec.activate_component(id);
        ec.start();

        assert!(wait_until(TIMEOUT, || stopper.done.load(Ordering::Acquire)));
        assert!(!ec.is_running());
        assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Stopped));
    }

    #[test]
    fn test_stop_during_startup() {
        struct EarlyStopper(Mutex<Option<Arc<ExecutionContext>>>);

        impl ComponentProxy for EarlyStopper {
            fn on_execute(&self, _cycle: u64) -> ReturnCode {
                ReturnCode::Ok
            }

            fn on_startup(&self, _cycle: u64) -> ReturnCode {
                if let Some(ec) = self.0.lock().unwrap().take() {
                    assert_eq!(ec.stop(), ReturnCode::Ok);
                }
                ReturnCode::Ok
            }
        }

        let arena = Arc::new(ComponentArena::new());
        let ec = Arc::new(periodic(&arena, 1000.0));
        let id = arena.insert(Arc::new(EarlyStopper(Mutex::new(Some(ec.clone())))));
        ec.add_component(id);

        assert_eq!(ec.start(), ReturnCode::Ok);
        assert!(!ec.is_running());
        assert_eq!(ec.run_state(), SchedulerRunState::Stopped);
        assert_eq!(ec.tick_count(), 0);
    }

    #[test]
    fn test_restart_after_stop_from_callback() {
        #[derive(Default)]
        struct SlowStopper {
            ec: Mutex<Option<Arc<ExecutionContext>>>,
            inflight: AtomicUsize,
            max_inflight: AtomicUsize,
            executed: AtomicUsize,
            shutdowns: AtomicUsize,
        }

        impl ComponentProxy for SlowStopper {
            fn on_execute(&self, _cycle: u64) -> ReturnCode {
                let inflight = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
                self.max_inflight.fetch_max(inflight, Ordering::AcqRel);
                self.executed.fetch_add(1, Ordering::AcqRel);
                if let Some(ec) = self.ec.lock().unwrap().take() {
                    ec.stop();
                    thread::sleep(Duration::from_millis(100));
                }
                self.inflight.fetch_sub(1, Ordering::AcqRel);
                ReturnCode::Ok
            }

            fn on_shutdown(&self, _cycle: u64) -> ReturnCode {
                self.shutdowns.fetch_add(1, Ordering::AcqRel);
                ReturnCode::Ok
            }
        }

        let arena = Arc::new(ComponentArena::new());
        let ec = Arc::new(periodic(&arena, 1000.0));
        let stopper = Arc::new(SlowStopper::default());
        *stopper.ec.lock().unwrap() = Some(ec.clone());
        let id = arena.insert(stopper.clone());
        ec.add_component(id);
        ec.activate_component(id);
        ec.start();

        assert!(wait_until(TIMEOUT, || !ec.is_running()));
        // The old worker is still inside its tick
        assert_eq!(ec.start(), ReturnCode::Ok);
        assert_eq!(stopper.shutdowns.load(Ordering::Acquire), 1);
        assert!(ec.is_running());

        assert!(wait_until(TIMEOUT, || stopper.executed.load(Ordering::Acquire) >= 3));
        assert_eq!(stopper.max_inflight.load(Ordering::Acquire), 1);
        assert_eq!(ec.stop(), ReturnCode::Ok);
        assert_eq!(stopper.shutdowns.load(Ordering::Acquire), 2);
        assert_eq!(ec.run_state(), SchedulerRunState::Stopped);
    }

    #[test]
    fn test_trigger_during_tick_runs_one_more_tick() {
        struct Blocking {
            entered: Sender<()>,
            release: Receiver<()>,
        }

        impl ComponentProxy for Blocking {
            fn on_execute(&self, _cycle: u64) -> ReturnCode {
                let _ = self.entered.send(());
                let _ = self.release.recv_timeout(TIMEOUT);
                ReturnCode::Ok
            }
        }

        let (entered_tx, entered) = unbounded();
        let (release, release_rx) = unbounded();
        let arena = Arc::new(ComponentArena::new());
        let ec = triggered(&arena);
        let id = arena.insert(Arc::new(Blocking {
            entered: entered_tx,
            release: release_rx,
        }));
        ec.add_component(id);
        ec.start();
        ec.activate_component(id);
        ec.tick();
        assert!(wait_until(TIMEOUT, || ec.get_component_state(id)
            == LifecycleState::Active));

        ec.tick();
        entered.recv_timeout(TIMEOUT).unwrap();
        // Three triggers while the tick is in flight
        for _ in 0..3 {
            assert_eq!(ec.tick(), ReturnCode::Ok);
        }
        release.send(()).unwrap();
        release.send(()).unwrap();

        entered.recv_timeout(TIMEOUT).unwrap();
        assert!(entered.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(ec.stats().coalesced, 2);
        ec.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rt_preempt_park_does_not_miss_releases() {
        use crate::{config::SchedPolicy, strategy::RtPreemptStrategy};

        let arena = Arc::new(ComponentArena::new());
        let strategy = RtPreemptStrategy::with_params(
            Duration::from_millis(20),
            SchedPolicy::Other,
            0,
            0,
            false,
        );
        let ec = ExecutionContext::new("rt", Box::new(strategy), 50.0, arena.clone()).unwrap();
        let (id, recorder) = component(&arena);
        ec.add_component(id);
        ec.start();

        for round in 1..=2 {
            ec.activate_component(id);
            assert!(wait_until(TIMEOUT, || recorder.count("on_execute") >= 2 * round));
            ec.deactivate_component(id);
            assert!(wait_until(TIMEOUT, || ec.run_state() == SchedulerRunState::Parked));
            thread::sleep(Duration::from_millis(100));
        }
        ec.stop();
        assert_eq!(ec.stats().missed_releases, 0);
    }

    #[test]
    fn test_concurrent_add_remove() {
        let arena = Arc::new(ComponentArena::new());
        let ec = Arc::new(periodic(&arena, 1000.0));
        ec.start();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ec = ec.clone();
                let arena = arena.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let id = arena.insert(Arc::new(Recorder::new()));
                        assert_eq!(ec.add_component(id), ReturnCode::Ok);
                        ec.activate_component(id);
                        assert_eq!(ec.remove_component(id), ReturnCode::Ok);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(ec.get_profile().participants.is_empty());
        ec.stop();
    }

    #[test]
    fn test_drop_exits_participants() {
        let arena = Arc::new(ComponentArena::new());
        let (id, recorder) = component(&arena);
        let participant = {
            let ec = periodic(&arena, 1000.0);
            ec.add_component(id);
            ec.activate_component(id);
            ec.start();
            assert!(wait_until(TIMEOUT, || recorder.count("on_execute") > 0));
            ec.participant(id).unwrap()
        };
        assert_eq!(participant.current(), LifecycleState::Exiting);
        assert_eq!(recorder.count("on_shutdown"), 1);
    }

    #[test]
    fn test_stats() {
        let arena = Arc::new(ComponentArena::new());
        let ec = periodic(&arena, 1000.0);
        let (id, recorder) = component(&arena);
        ec.add_component(id);
        ec.activate_component(id);
        ec.start();
        assert!(wait_until(TIMEOUT, || recorder.count("on_execute") >= 10));
        ec.stop();

        let stats = ec.stats();
        assert!(stats.count >= 10);
        assert!(stats.min <= stats.max);
        assert_eq!(stats.coalesced, 0);
    }
}
