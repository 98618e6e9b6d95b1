use std::sync::{Condvar, Mutex};

/// A counting semaphore used to bound the number of in-flight udp
/// requests across the whole engine. Permits are released through the
/// RAII [`SemaphoreGuard`], so every exit path of a request gives its
/// permit back.
pub struct Semaphore {
    permits: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    /// Creates a [`Semaphore`] with the given number of permits (> 0).
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0);
        Self {
            permits: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    /// Takes a permit, blocking the calling thread until one is available.
    pub fn acquire(&self) -> SemaphoreGuard {
        let mut permits = self.permits.lock().unwrap();
        while *permits == 0 {
            permits = self.released.wait(permits).unwrap();
        }
        *permits -= 1;
        SemaphoreGuard { semaphore: self }
    }
}

/// The held permit of a [`Semaphore`]. Dropping it releases the permit.
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut permits = self.semaphore.permits.lock().unwrap();
        *permits += 1;
        self.semaphore.released.notify_one();
    }
}

/// A one-shot result slot used to coalesce identical in-flight queries:
/// the first caller performs the work and publishes the result, every
/// duplicate caller waits on the latch and receives a copy. The value
/// is stored before waiters are woken, so an awakened waiter always
/// observes it.
pub struct Latch<T> {
    slot: Mutex<Option<T>>,
    filled: Condvar,
}

impl<T: Clone> Latch<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            filled: Condvar::new(),
        }
    }

    /// Publishes the result and wakes every waiter. Must be called once.
    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock().unwrap();
        assert!(slot.is_none(), "latch set twice");
        *slot = Some(value);
        self.filled.notify_all();
    }

    /// Blocks until the result is published and returns a copy of it.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            slot = self.filled.wait(slot).unwrap();
        }
        slot.as_ref().unwrap().clone()
    }
}

impl<T: Clone> Default for Latch<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::{thread, time};

    #[test]
    fn test_semaphore_bounds_concurrency() {
        let semaphore = Arc::new(Semaphore::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let semaphore = Arc::clone(&semaphore);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(thread::spawn(move || {
                let _guard = semaphore.acquire();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(time::Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_latch_delivers_to_all_waiters() {
        let latch = Arc::new(Latch::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            handles.push(thread::spawn(move || latch.wait()));
        }
        thread::sleep(time::Duration::from_millis(10));
        latch.set("done".to_string());
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "done");
        }
    }
}
