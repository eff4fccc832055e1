//! Periodic timer primitive driving the mix driver's poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Calls a callback on a fixed period from a dedicated thread, correcting
/// for drift the way the teacher's own tick loop does (measuring against
/// an absolute next-tick time rather than just sleeping `period` each time).
pub struct Timer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn start<F>(period: Duration, mut callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();

        let handle = thread::spawn(move || {
            let mut next_tick = Instant::now() + period;
            while running_thread.load(Ordering::Acquire) {
                let now = Instant::now();
                if next_tick > now {
                    thread::sleep(next_tick - now);
                }
                next_tick += period;
                if !running_thread.load(Ordering::Acquire) {
                    break;
                }
                callback();
            }
        });

        Timer {
            running,
            handle: Some(handle),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn fires_periodically() {
        let count = Arc::new(Mutex::new(0u32));
        let count_cb = count.clone();
        let timer = Timer::start(Duration::from_millis(5), move || {
            *count_cb.lock().unwrap() += 1;
        });
        thread::sleep(Duration::from_millis(40));
        drop(timer);
        assert!(*count.lock().unwrap() >= 3);
    }
}
