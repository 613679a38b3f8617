//! CPU-time budget enforcement for sandbox dispatches (§4.B, §5).
//!
//! A POSIX virtual-time alarm (`ITIMER_VIRTUAL`, which only ticks while the
//! process is scheduled on CPU, not during I/O wait) bounds a single
//! dispatch. The signal handler cannot close over Rust state, so the two
//! pieces of cross-call state it needs are process-wide atomics — the one
//! unavoidable pair of bare globals in this crate (§9).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Per-call CPU budget before the first alarm fires.
#[cfg(debug_assertions)]
pub const PCALL_BUDGET_SECS: f64 = 5.0;
#[cfg(not(debug_assertions))]
pub const PCALL_BUDGET_SECS: f64 = 0.5;

/// Re-arm interval after the first expiry: if the script still hasn't
/// yielded by the time this elapses again, it is an unstoppable runaway.
#[cfg(debug_assertions)]
pub const RUNAWAY_BUDGET_SECS: f64 = 10.0;
#[cfg(not(debug_assertions))]
pub const RUNAWAY_BUDGET_SECS: f64 = 1.0;

static ALARM_FIRED: AtomicBool = AtomicBool::new(false);
static EXPIRY_COUNT: AtomicU32 = AtomicU32::new(0);

extern "C" fn on_alarm(_signum: libc::c_int) {
    ALARM_FIRED.store(true, Ordering::SeqCst);
    let previous = EXPIRY_COUNT.fetch_add(1, Ordering::SeqCst);
    if previous >= 1 {
        // Second expiry inside the same dispatch: the interpreter refused
        // to yield at the first interrupt. Per §7 this is fatal.
        std::process::abort();
    }
}

/// Installs the `SIGVTALRM` handler. Idempotent; call once at startup.
pub fn install_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_alarm as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;
        libc::sigaction(libc::SIGVTALRM, &action, std::ptr::null_mut());
    }
}

/// Arms the virtual-time alarm for the duration of a single dispatch. Drop
/// disarms it, restoring any previously running timer.
pub struct ArmedAlarm {
    previous: libc::itimerval,
}

impl ArmedAlarm {
    #[must_use]
    pub fn arm() -> Self {
        ALARM_FIRED.store(false, Ordering::SeqCst);
        EXPIRY_COUNT.store(0, Ordering::SeqCst);

        let deadline = libc::itimerval {
            it_interval: secs_to_timeval(RUNAWAY_BUDGET_SECS),
            it_value: secs_to_timeval(PCALL_BUDGET_SECS),
        };
        let mut previous: libc::itimerval = unsafe { std::mem::zeroed() };
        unsafe {
            libc::setitimer(libc::ITIMER_VIRTUAL, &deadline, &mut previous);
        }
        Self { previous }
    }
}

impl Drop for ArmedAlarm {
    fn drop(&mut self) {
        unsafe {
            libc::setitimer(libc::ITIMER_VIRTUAL, &self.previous, std::ptr::null_mut());
        }
    }
}

fn secs_to_timeval(secs: f64) -> libc::timeval {
    libc::timeval {
        tv_sec: secs.trunc() as libc::time_t,
        tv_usec: (secs.fract() * 1_000_000.0) as libc::suseconds_t,
    }
}

/// Whether the alarm fired at least once during the dispatch this
/// [`ArmedAlarm`] guarded. Read after the guarded body returns.
#[must_use]
pub fn alarm_fired() -> bool {
    ALARM_FIRED.load(Ordering::SeqCst)
}
