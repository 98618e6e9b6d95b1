use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::{thread, time};

/// A token-bucket rate limiter: at most `max_actions` admissions per
/// window of `action_window`. A thread asking for admission when the
/// bucket is empty blocks until the window resets; admission is FIFO,
/// enforced with a ticket queue since condvar wakeup order is
/// unspecified. One reset timer runs per busy period: it is started by
/// the first admission of the window and dies after performing the
/// reset, to be re-spawned by the next admission.
///
/// Measured admissions per window are accumulated into min/max/avg
/// counters, mirroring what the limiter owner wants to report at the
/// end of a run.
pub struct RateLimiter {
    max_actions: usize,
    action_window: time::Duration,
    state: Mutex<LimiterState>,
    reset_cv: Condvar,
    timer: Mutex<Option<thread::JoinHandle<()>>>,
}

struct LimiterState {
    current_actions: usize,
    action_count: u64,
    reset_count: u64,
    min_measured: u64,
    max_measured: u64,
    avg_measured: f64,
    timer_running: bool,
    open: bool,
    tickets: VecDeque<u64>,
    next_ticket: u64,
}

/// A snapshot of the counters of a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimiterStats {
    pub window_secs: f64,
    pub max_actions_per_window: usize,
    pub min_measured_actions_per_window: Option<u64>,
    pub max_measured_actions_per_window: u64,
    pub avg_measured_actions_per_window: f64,
    pub action_count: u64,
}

impl RateLimiter {
    /// Creates a new [`RateLimiter`] admitting `max_actions` per window
    /// of `action_window`. `max_actions` must be > 0.
    pub fn new(max_actions: usize, action_window: time::Duration) -> Self {
        assert!(max_actions > 0);
        Self {
            max_actions,
            action_window,
            state: Mutex::new(LimiterState {
                current_actions: 0,
                action_count: 0,
                reset_count: 0,
                min_measured: u64::MAX,
                max_measured: 0,
                avg_measured: 0.0,
                timer_running: false,
                open: false,
                tickets: VecDeque::new(),
                next_ticket: 0,
            }),
            reset_cv: Condvar::new(),
            timer: Mutex::new(None),
        }
    }

    /// Runs the given closure once the limiter admits it, blocking the
    /// calling thread until a token is available. The closure result is
    /// returned. The limiter itself never fails. The limiter is taken
    /// through an [`Arc`] since the reset timer thread needs its own
    /// handle to it.
    pub fn run<T>(self: &Arc<Self>, action: impl FnOnce() -> T) -> T {
        self.acquire();
        action()
    }

    /// Permanently opens the limiter and wakes every waiter without
    /// consuming tokens. Used when the limited resource is known dead
    /// (a blocked nameserver): its pending requests must resolve
    /// immediately instead of queueing behind a useless window.
    pub fn release_waiters(&self) {
        let mut state = self.state.lock().unwrap();
        state.open = true;
        state.tickets.clear();
        self.reset_cv.notify_all();
    }

    /// Returns a snapshot of the limiter counters.
    pub fn stats(&self) -> RateLimiterStats {
        let state = self.state.lock().unwrap();
        RateLimiterStats {
            window_secs: self.action_window.as_secs_f64(),
            max_actions_per_window: self.max_actions,
            min_measured_actions_per_window: match state.min_measured {
                u64::MAX => None,
                v => Some(v),
            },
            max_measured_actions_per_window: state.max_measured,
            avg_measured_actions_per_window: state.avg_measured,
            action_count: state.action_count,
        }
    }

    /// Waits for the in-flight reset timer, if any, to finish. Called
    /// on engine shutdown so that no limiter thread outlives the run.
    pub fn drain(&self) {
        let handle = self.timer.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Rate limiter reset timer exited with a panic.");
            }
        }
    }

    // Block until a token is granted (or the limiter has been opened).
    fn acquire(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.action_count += 1;
            return;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.tickets.push_back(ticket);

        loop {
            if state.open {
                state.action_count += 1;
                return;
            }
            let at_front = state.tickets.front() == Some(&ticket);
            if at_front && state.current_actions < self.max_actions {
                state.tickets.pop_front();
                state.current_actions += 1;
                state.action_count += 1;
                if !state.timer_running {
                    state.timer_running = true;
                    let window_start = state.action_count - 1;
                    drop(state);
                    self.start_reset_timer(window_start);
                } else {
                    drop(state);
                }
                // More tokens may be left for the next ticket in line.
                self.reset_cv.notify_all();
                return;
            }
            state = self.reset_cv.wait(state).unwrap();
        }
    }

    // Spawn the reset timer for the current busy period. Must be called
    // by the thread that flipped `timer_running`, which guarantees at
    // most one live timer: the handle slot only ever holds finished ones.
    fn start_reset_timer(self: &Arc<Self>, window_start_count: u64) {
        let previous = self.timer.lock().unwrap().take();
        if let Some(previous) = previous {
            let _ = previous.join();
        }

        let limiter = Arc::clone(self);
        let window = self.action_window;
        let handle = thread::spawn(move || {
            thread::sleep(window);
            limiter.reset(window_start_count);
        });
        *self.timer.lock().unwrap() = Some(handle);
    }

    // Perform the end-of-window bookkeeping and wake all waiters.
    fn reset(&self, window_start_count: u64) {
        let mut state = self.state.lock().unwrap();
        let measured = state.action_count - window_start_count;
        state.max_measured = state.max_measured.max(measured);
        state.min_measured = state.min_measured.min(measured);
        state.avg_measured =
            (state.reset_count as f64 * state.avg_measured + measured as f64) / (state.reset_count + 1) as f64;
        state.reset_count += 1;
        state.current_actions = 0;
        state.timer_running = false;
        self.reset_cv.notify_all();
    }
}
