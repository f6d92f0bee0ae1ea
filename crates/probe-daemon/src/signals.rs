//! Unix signal handling.
//!
//! SIGTERM and SIGINT request shutdown. SIGUSR1 is an external trigger:
//! each delivery becomes one rising edge on the probe's trigger line.
//!
//! The handlers only touch static atomics. A poll thread turns the flags
//! into [`SignalState`] updates and runs the trigger callback, so no probe
//! code ever runs in signal context.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
static TRIGGER_PENDING: AtomicU32 = AtomicU32::new(0);

/// Signals the daemon reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM or SIGINT.
    Terminate,
    /// SIGUSR1.
    Trigger,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Trigger => write!(f, "SIGUSR1"),
        }
    }
}

/// State shared between the poll thread and the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    triggers: AtomicU32,
    signal_count: AtomicU32,
}

impl SignalState {
    /// Create a fresh state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Acquire)
    }

    /// Request shutdown from any thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Release);
    }

    /// Trigger signals converted so far.
    pub fn triggers(&self) -> u32 {
        self.triggers.load(Ordering::Relaxed)
    }

    /// Signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        if kind == SignalKind::Trigger {
            self.triggers.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Handle on the installed signal handlers.
#[derive(Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl std::fmt::Debug for SignalHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalHandler")
            .field("state", &self.state)
            .finish()
    }
}

impl SignalHandler {
    /// Install the handlers and start the poll thread.
    ///
    /// `on_trigger` runs on the poll thread once per SIGUSR1.
    pub fn new(on_trigger: impl Fn() + Send + 'static) -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };

        #[cfg(unix)]
        register_unix_handlers()?;

        let state = Arc::clone(&handler.state);
        std::thread::Builder::new()
            .name("signal-poll".into())
            .spawn(move || poll_flags(&state, &on_trigger))?;

        Ok(handler)
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Request shutdown without a signal.
    pub fn request_shutdown(&self) {
        info!("shutdown requested");
        self.state.request_shutdown();
    }

    /// Shared state.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

fn poll_flags(state: &SignalState, on_trigger: &dyn Fn()) {
    loop {
        if SHUTDOWN_FLAG.swap(false, Ordering::AcqRel) {
            info!("shutdown signal received");
            state.record_signal(SignalKind::Terminate);
            state.request_shutdown();
        }
        let triggers = TRIGGER_PENDING.swap(0, Ordering::AcqRel);
        for _ in 0..triggers {
            debug!("trigger signal received");
            state.record_signal(SignalKind::Trigger);
            on_trigger();
        }
        if state.shutdown_requested() {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn register_unix_handlers() -> std::io::Result<()> {
    use std::os::raw::c_int;

    extern "C" fn on_shutdown(_: c_int) {
        SHUTDOWN_FLAG.store(true, Ordering::Release);
    }

    extern "C" fn on_trigger(_: c_int) {
        TRIGGER_PENDING.fetch_add(1, Ordering::AcqRel);
    }

    let handlers: [(c_int, extern "C" fn(c_int)); 3] = [
        (libc::SIGTERM, on_shutdown),
        (libc::SIGINT, on_shutdown),
        (libc::SIGUSR1, on_trigger),
    ];
    for (signal, handler) in handlers {
        // SAFETY: the handlers only perform atomic stores, which are
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }

    debug!("unix signal handlers registered");
    Ok(())
}
