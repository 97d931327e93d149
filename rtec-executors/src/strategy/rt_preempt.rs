//!
//! The RT-Preempt Strategy runs the worker as a real-time periodic task on
//! a PREEMPT_RT Linux kernel.
//!
//! When the worker prepares, it moves itself into a real-time scheduling
//! class, optionally locks the memory of the process and pre-faults its
//! stack.  Every cycle then sleeps until an absolute release time on
//! `CLOCK_MONOTONIC` so the period does not drift with the tick's
//! execution time.
//!
//! Note: stopping an execution context running on this strategy waits for
//! the current sleep to finish, so it can take up to one period.
//!

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use nix::{
    errno::Errno,
    libc,
    sys::{
        mman::{mlockall, munlockall, MlockAllFlags},
        time::TimeSpec,
    },
    time::{clock_gettime, clock_nanosleep, ClockId, ClockNanosleepFlags},
    unistd::gettid,
};
use tracing::{debug, info, trace, warn};

use rtec_core::ExecutionKind;

use crate::{
    config::{EcConfig, SchedPolicy},
    error::{EcError, Result},
    strategy::{Cycle, Deadline, PeriodCell, WaitStrategy},
};

/// The amount of stack touched before the first cycle so the worker never
/// page-faults on its stack while ticking
const PREFAULT_STACK_SIZE: usize = 8 * 1024;

/// The worker's registration as a periodic task
#[derive(Debug)]
struct PeriodicTask {
    /// The kernel thread id of the worker
    tid: libc::pid_t,
    /// The absolute release time of the last cycle on `CLOCK_MONOTONIC`
    next_release: Duration,
    /// Release the next cycle at `next_release` instead of one period later
    release_now: bool,
    /// Whether `prepare` locked the process memory
    memory_locked: bool,
}

/// Real-time periodic scheduling on PREEMPT_RT Linux
pub struct RtPreemptStrategy {
    /// The priority of the worker inside its policy
    priority: i32,
    /// The scheduling policy of the worker
    policy: SchedPolicy,
    /// Signed offset added to every absolute wake-up time
    wait_offset_ns: i64,
    /// Whether to lock the process memory
    lock_memory: bool,
    /// The period in force
    period: PeriodCell,
    /// The registration of the worker, present between prepare and teardown
    task: Mutex<Option<PeriodicTask>>,
    /// Set to end the worker after its current sleep
    interrupted: AtomicBool,
    /// The number of releases that had already passed when the worker was
    /// ready to sleep
    missed: AtomicU64,
}

impl RtPreemptStrategy {
    /// The name this strategy is registered under
    pub const NAME: &'static str = "rt_preempt";

    /// Create a new real-time strategy from a configuration
    pub fn new(period: Duration, config: &EcConfig) -> Result<Self> {
        if config.policy.is_realtime() && !(1..=99).contains(&config.priority) {
            return Err(EcError::BadParameter(format!(
                "real-time priority {} is outside 1..=99",
                config.priority
            )));
        }
        Ok(Self::with_params(
            period,
            config.policy,
            config.priority,
            config.wait_offset_ns,
            config.lock_memory,
        ))
    }

    /// Create a new real-time strategy without validating the priority, the
    /// kernel gets the final word on it
    pub fn with_params(
        period: Duration,
        policy: SchedPolicy,
        priority: i32,
        wait_offset_ns: i64,
        lock_memory: bool,
    ) -> Self {
        Self {
            priority,
            policy,
            wait_offset_ns,
            lock_memory,
            period: PeriodCell::new(period),
            task: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            missed: AtomicU64::new(0),
        }
    }

    /// The absolute wake-up time for a release, with the offset applied
    fn wake_time(&self, release: Duration) -> Duration {
        let nanos = release.as_nanos() as i128 + self.wait_offset_ns as i128;
        Duration::from_nanos(nanos.clamp(0, u64::MAX as i128) as u64)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WaitStrategy for RtPreemptStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Periodic
    }

    fn prepare(&self, period: Duration) -> Result<()> {
        self.interrupted.store(false, Ordering::Release);

        let memory_locked = if self.lock_memory {
            mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
                .map_err(|errno| EcError::Timing(format!("mlockall failed: {}", errno)))?;
            true
        } else {
            false
        };

        let tid = gettid().as_raw();
        if let Err(err) = set_scheduler(tid, self.policy, self.priority) {
            if memory_locked {
                let _ = munlockall();
            }
            return Err(err);
        }
        prefault_stack();

        let now = monotonic_now()?;
        *self.lock_task() = Some(PeriodicTask {
            tid,
            next_release: now,
            release_now: true,
            memory_locked,
        });
        self.period.set(period);

        info!(
            tid,
            policy = ?self.policy,
            priority = self.priority,
            period_ns = period.as_nanos() as u64,
            "worker registered as periodic task"
        );
        Ok(())
    }

    fn await_next_cycle(&self, _deadline: Deadline<'_>) -> Cycle {
        let wake = {
            let mut task = self.lock_task();
            let Some(task) = task.as_mut() else {
                return Cycle::Interrupted;
            };
            if task.release_now {
                task.release_now = false;
            } else {
                task.next_release += self.period.get();
                match monotonic_now() {
                    Ok(now) if task.next_release < now => {
                        let missed = self.missed.fetch_add(1, Ordering::AcqRel) + 1;
                        trace!(missed, "release already passed, re-anchoring");
                        task.next_release = now;
                    }
                    Ok(_) => {}
                    Err(err) => warn!(%err, "could not read the monotonic clock"),
                }
            }
            self.wake_time(task.next_release)
        };

        if let Err(errno) = sleep_until(wake) {
            warn!(%errno, "clock_nanosleep failed");
        }

        if self.interrupted.load(Ordering::Acquire) {
            Cycle::Interrupted
        } else {
            Cycle::Tick
        }
    }

    fn teardown(&self) -> Result<()> {
        let Some(task) = self.lock_task().take() else {
            return Ok(());
        };
        let deregistered = set_scheduler(task.tid, SchedPolicy::Other, 0);
        if task.memory_locked {
            munlockall().map_err(|errno| EcError::Timing(format!("munlockall failed: {}", errno)))?;
        }
        debug!(tid = task.tid, "worker deregistered");
        deregistered
    }

    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn resume(&self) {
        if let Some(task) = self.lock_task().as_mut() {
            match monotonic_now() {
                Ok(now) => {
                    task.next_release = now;
                    task.release_now = true;
                }
                Err(err) => warn!(%err, "could not re-anchor after parking"),
            }
        }
    }

    fn missed_releases(&self) -> u64 {
        self.missed.load(Ordering::Acquire)
    }

    fn period(&self) -> Duration {
        self.period.get()
    }

    fn reconfigure(&self, period: Duration) -> Result<()> {
        let mut task = self.lock_task();
        if let Some(task) = task.as_mut() {
            set_scheduler(task.tid, SchedPolicy::Other, 0)?;
            if let Err(err) = set_scheduler(task.tid, self.policy, self.priority) {
                warn!(tid = task.tid, %err, "re-registration failed, worker left best-effort");
                return Err(err);
            }
            task.next_release = monotonic_now()?;
            debug!(tid = task.tid, period_ns = period.as_nanos() as u64, "worker re-registered");
        }
        self.period.set(period);
        Ok(())
    }
}

/// Move a thread into a scheduling policy
fn set_scheduler(tid: libc::pid_t, policy: SchedPolicy, priority: i32) -> Result<()> {
    let (raw_policy, priority) = match policy {
        SchedPolicy::Fifo => (libc::SCHED_FIFO, priority),
        SchedPolicy::RoundRobin => (libc::SCHED_RR, priority),
        SchedPolicy::Other => (libc::SCHED_OTHER, 0),
    };
    // SAFETY: sched_param is a plain C struct for which all zeroes is valid
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;
    // SAFETY: `param` outlives the call and the kernel only reads it
    let ret = unsafe { libc::sched_setscheduler(tid, raw_policy, &param) };
    if ret == -1 {
        return Err(EcError::Timing(format!(
            "sched_setscheduler({:?}, {}) failed: {}",
            policy,
            priority,
            Errno::last()
        )));
    }
    Ok(())
}

/// The current time on `CLOCK_MONOTONIC`
fn monotonic_now() -> Result<Duration> {
    let now = clock_gettime(ClockId::CLOCK_MONOTONIC)
        .map_err(|errno| EcError::Timing(format!("clock_gettime failed: {}", errno)))?;
    Ok(Duration::new(now.tv_sec() as u64, now.tv_nsec() as u32))
}

/// Sleep until an absolute time on `CLOCK_MONOTONIC`, resuming the sleep
/// when a signal interrupts it
fn sleep_until(wake: Duration) -> std::result::Result<(), Errno> {
    let wake = TimeSpec::from(wake);
    loop {
        match clock_nanosleep(
            ClockId::CLOCK_MONOTONIC,
            ClockNanosleepFlags::TIMER_ABSTIME,
            &wake,
        ) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno),
        }
    }
}

/// Touch the stack the worker is going to use
fn prefault_stack() {
    let stack = [0u8; PREFAULT_STACK_SIZE];
    std::hint::black_box(&stack);
}
