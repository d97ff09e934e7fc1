//! Concurrency gating primitives shared by adapters.
//!
//! The core does not pick one threading model: it hands each adapter the
//! primitive its profile needs and lets the adapter compose them around its
//! embedded runtime. `LoopThread` serves Profile A (single-threaded event
//! loop); `Reentrancy` serves Profile B (GIL-style recursive locking);
//! Profile C needs nothing beyond a plain `Mutex` around adapter state, so
//! no dedicated type is offered for it.

use std::cell::Cell;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

type Job = Box<dyn FnOnce() + Send>;

/// Owns a dedicated OS thread that drives one runtime's event loop
///. All native calls into that runtime must originate on
/// this thread; `run` enforces that by submitting a job and blocking the
/// caller on a condition variable, unless the caller already is the loop
/// thread, in which case the work runs inline rather than deadlocking on a
/// self-submitted job.
pub struct LoopThread {
    thread_id: ThreadId,
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LoopThread {
    /// Spawns the thread; `drive` is called once per submitted job and is
    /// also where the adapter should service its own event loop/job queue
    /// between jobs.
    pub fn spawn(name: impl Into<String>, mut drive: impl FnMut(Job) + Send + 'static) -> std::io::Result<Self> {
        let (sender, receiver) = channel::<Job>();
        let handle = thread::Builder::new().name(name.into()).spawn(move || {
            for job in receiver {
                drive(job);
            }
        })?;
        Ok(LoopThread {
            thread_id: handle.thread().id(),
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Runs `f` on the loop thread and blocks until it completes. Detects
    /// same-thread calls by thread-id comparison and runs inline rather than
    /// deadlocking on a condition variable the loop thread itself would
    /// have to signal.
    pub fn run<R: Send + 'static>(&self, f: impl FnOnce() -> R + Send + 'static) -> R {
        if self.is_current() {
            return f();
        }
        let pair = Arc::new((Mutex::new(None::<R>), Condvar::new()));
        let pair2 = pair.clone();
        let job: Job = Box::new(move || {
            let result = f();
            let (lock, cvar) = &*pair2;
            *lock.lock() = Some(result);
            cvar.notify_one();
        });
        {
            let sender = self.sender.lock();
            sender
                .as_ref()
                .expect("run() called after stop()")
                .send(job)
                .expect("event loop thread must outlive every caller of run()");
        }
        let (lock, cvar) = &*pair;
        let mut guard = lock.lock();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            cvar.wait(&mut guard);
        }
    }

    /// Drops the job sender so the loop thread's receive loop ends once it
    /// finishes any job already in flight, then joins it. Idempotent: a
    /// second call, or one made from the loop thread itself (which cannot
    /// join itself), is a no-op. Per Profile A's shutdown rule, the adapter
    /// calls this from its own `destroy` before releasing runtime state.
    pub fn stop(&self) {
        self.sender.lock().take();
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

thread_local! {
    static GIL_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// A reentrancy guard for Profile B: the outermost `enter()` on a thread is the one that
/// should actually acquire the adapter's lock; nested calls on the same
/// thread just increment the depth counter.
pub struct ReentrancyGuard {
    outermost: bool,
}

impl ReentrancyGuard {
    pub fn enter() -> Self {
        let outermost = GIL_DEPTH.with(|depth| {
            let d = depth.get();
            depth.set(d + 1);
            d == 0
        });
        ReentrancyGuard { outermost }
    }

    pub fn is_outermost(&self) -> bool {
        self.outermost
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        GIL_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// A queue of deferred native-release closures, used by both Profile A
/// (event loop not on the calling thread) and Profile B (owning thread not
/// holding the lock) to implement the delayed-destroy behavior required
/// when a value outlives convenient access to its originating thread.
#[derive(Default)]
pub struct DelayedDestroyQueue {
    jobs: Mutex<Vec<Job>>,
}

impl DelayedDestroyQueue {
    pub fn push(&self, job: Job) {
        self.jobs.lock().push(job);
    }

    /// Runs and clears every pending job; called on the adapter's next
    /// loop tick or lock acquisition.
    pub fn drain(&self) {
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs {
            job();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn loop_thread_runs_foreign_calls_and_inline_calls() {
        let loop_thread = LoopThread::spawn("test-loop", |job| job()).unwrap();
        let result = loop_thread.run(|| 1 + 1);
        assert_eq!(result, 2);
    }

    #[test]
    fn stop_joins_the_thread_and_is_idempotent() {
        let loop_thread = LoopThread::spawn("test-loop-stop", |job| job()).unwrap();
        loop_thread.run(|| ());
        loop_thread.stop();
        loop_thread.stop();
    }

    #[test]
    fn reentrancy_guard_tracks_outermost() {
        let outer = ReentrancyGuard::enter();
        assert!(outer.is_outermost());
        {
            let inner = ReentrancyGuard::enter();
            assert!(!inner.is_outermost());
        }
        drop(outer);
    }

    #[test]
    fn delayed_destroy_queue_drains_in_order() {
        let queue = DelayedDestroyQueue::default();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let counter = counter.clone();
            queue.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        queue.drain();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }
}
