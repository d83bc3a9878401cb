//! A set of journals swept together by periodic maintenance.
//!
//! The set runs the cheap sweeps (autocommit, autorotate) and the heavy
//! one (seal and trim) across every registered journal. Sweeps can be
//! driven manually via [`Set::process`] or from the background runner
//! started by [`Set::start_background`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::journal::{CancelToken, Clock, Journal, SystemClock};

/// How often the autocommit/autorotate sweep runs in the background.
const AUTOCOMMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// How often the seal/trim sweep runs in the background.
const AUTOSEAL_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

/// Granularity of cancellation checks while a runner sleeps.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Configuration for a journal set.
#[derive(Clone, Default)]
pub struct SetOptions {
    /// Injected clock; defaults to the system clock.
    pub clock: Option<Arc<dyn Clock>>,
    /// Whether the background runner also runs the seal/trim sweep.
    pub autoseal_enabled: bool,
    /// Pause between journals after a successful seal/trim, to spread
    /// I/O load; zero disables.
    pub autoseal_delay: Duration,
}

/// A collection of journals maintained together.
pub struct Set {
    clock: Arc<dyn Clock>,
    autoseal_enabled: bool,
    autoseal_delay: Duration,
    journals: Mutex<Vec<Arc<Journal>>>,
}

impl Set {
    /// Creates an empty set.
    #[must_use]
    pub fn new(options: SetOptions) -> Self {
        Self {
            clock: options.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            autoseal_enabled: options.autoseal_enabled,
            autoseal_delay: options.autoseal_delay,
            journals: Mutex::new(Vec::new()),
        }
    }

    /// Registers a journal.
    pub fn add(&self, journal: Arc<Journal>) {
        self.journals.lock().push(journal);
    }

    /// Removes a previously registered journal.
    pub fn remove(&self, journal: &Arc<Journal>) {
        let mut journals = self.journals.lock();
        if let Some(i) = journals.iter().position(|j| Arc::ptr_eq(j, journal)) {
            journals.remove(i);
        }
    }

    /// The currently registered journals.
    #[must_use]
    pub fn journals(&self) -> Vec<Arc<Journal>> {
        self.journals.lock().clone()
    }

    /// Runs one round of every sweep. Returns the number of actions taken.
    pub fn process(&self, cancel: &CancelToken) -> usize {
        self.autocommit(cancel) + self.autoseal(cancel)
    }

    /// Runs the autocommit and autorotate sweep over every journal.
    ///
    /// Errors are logged per journal and do not stop the sweep. Returns
    /// the number of actions taken.
    pub fn autocommit(&self, cancel: &CancelToken) -> usize {
        let journals = self.journals();
        let now = self.clock.now_ms();
        let mut actions = 0;
        for journal in journals {
            if cancel.is_cancelled() {
                return actions;
            }
            match journal.autocommit(now) {
                Ok(true) => actions += 1,
                Ok(false) => {}
                Err(err) => {
                    error!(journal = %journal, error = %err, "autocommit error");
                    continue;
                }
            }
            match journal.autorotate(now) {
                Ok(true) => {
                    debug!(journal = %journal, "autorotated");
                    actions += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    error!(journal = %journal, error = %err, "autorotate error");
                }
            }
        }
        actions
    }

    /// Runs one seal/trim round over every journal.
    ///
    /// Errors are logged per journal and do not stop the sweep. Returns
    /// the number of actions taken.
    pub fn autoseal(&self, cancel: &CancelToken) -> usize {
        let journals = self.journals();
        let mut actions = 0;
        for journal in journals {
            if cancel.is_cancelled() {
                return actions;
            }
            match journal.seal_and_trim_once(cancel) {
                Ok(n) => {
                    actions += n;
                    if n > 0 && !self.autoseal_delay.is_zero() {
                        thread::sleep(self.autoseal_delay);
                    }
                }
                Err(err) => {
                    error!(journal = %journal, error = %err, "seal/trim error");
                }
            }
        }
        actions
    }

    /// Starts background threads running the sweeps until the runner is
    /// closed or `cancel` fires.
    #[must_use]
    pub fn start_background(self: Arc<Self>, cancel: CancelToken) -> SetRunner {
        let mut handles = Vec::new();

        let set = Arc::clone(&self);
        let token = cancel.clone();
        handles.push(thread::spawn(move || {
            run_periodical(AUTOCOMMIT_SWEEP_INTERVAL, &token, |cancel| {
                set.autocommit(cancel);
            });
        }));

        if self.autoseal_enabled {
            let set = Arc::clone(&self);
            let token = cancel.clone();
            handles.push(thread::spawn(move || {
                run_periodical(AUTOSEAL_SWEEP_INTERVAL, &token, |cancel| {
                    set.autoseal(cancel);
                });
            }));
        }

        SetRunner { cancel, handles }
    }
}

/// Handle over the background sweep threads of a [`Set`].
pub struct SetRunner {
    cancel: CancelToken,
    handles: Vec<thread::JoinHandle<()>>,
}

impl SetRunner {
    /// Stops the sweeps and waits for the threads to exit.
    pub fn close(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_periodical<F>(interval: Duration, cancel: &CancelToken, mut f: F)
where
    F: FnMut(&CancelToken),
{
    loop {
        let deadline = Instant::now() + interval;
        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(SLEEP_SLICE));
        }
        if cancel.is_cancelled() {
            return;
        }
        f(cancel);
    }
}
