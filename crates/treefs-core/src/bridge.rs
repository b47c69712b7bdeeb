//! Synchronous calls into asynchronous work
//!
//! A [`Bridge`] owns one dedicated worker thread. [`Bridge::invoke`] hands the
//! worker a unit of work and blocks the calling thread until that work calls
//! its [`Resume`] callback. The callback may run before the work returns, or
//! much later from any other thread (an async runtime, an event loop, a
//! completion port), which lets asynchronous backends be used from plain
//! blocking code.
//!
//! Work must resume exactly once. `Resume` is consumed by the call, so a
//! second call does not compile; never calling it leaves the invoking thread
//! blocked forever. Calling `invoke` on a bridge from inside work running on
//! that same bridge deadlocks.

use std::fmt;
use std::io;
use std::mem;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Condvar, Mutex, RawMutex};
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::error::FsResult;

type Work = Box<dyn FnOnce(Resume) + Send + 'static>;

enum Job {
    Run(Work),
    Shutdown,
}

/// Where the single outstanding unit of work is in its lifecycle
enum Phase {
    Idle,
    Posted(Job),
    Executing,
    Finished,
}

impl Phase {
    fn take_posted(&mut self) -> Option<Job> {
        match mem::replace(self, Phase::Executing) {
            Phase::Posted(job) => Some(job),
            other => {
                *self = other;
                None
            }
        }
    }
}

struct BridgeState {
    phase: Phase,
    quit: bool,
}

struct Shared {
    state: Arc<Mutex<BridgeState>>,
    condition: Condvar,
}

enum Step {
    Dispatched,
    Quit,
}

/// One-shot completion callback handed to bridged work.
///
/// Holds the worker's lock on the bridge state from the moment the work was
/// picked up. [`Resume::resume`] releases it explicitly, possibly on a
/// different thread than the one that took it.
pub struct Resume {
    hold: Option<ArcMutexGuard<RawMutex, BridgeState>>,
    shared: Arc<Shared>,
    rearm: Sender<()>,
}

impl Resume {
    /// Signal that the work is finished and wake the invoking thread.
    pub fn resume(mut self) {
        let Some(mut hold) = self.hold.take() else {
            return;
        };
        hold.phase = Phase::Finished;
        drop(hold);
        self.shared.condition.notify_all();

        // Queue the next wait cycle rather than running it here, so the
        // worker only looks for more work once this call stack has unwound.
        if self.rearm.send(()).is_err() {
            debug!("bridge worker already gone; nothing to re-arm");
        }
    }

    fn mark_quit(&mut self) {
        if let Some(hold) = self.hold.as_mut() {
            hold.quit = true;
        }
    }
}

impl Drop for Resume {
    fn drop(&mut self) {
        if self.hold.is_some() {
            warn!("bridge work dropped its resume callback; the invoking thread stays blocked");
        }
    }
}

impl fmt::Debug for Resume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resume")
            .field("pending", &self.hold.is_some())
            .finish()
    }
}

/// Completion callback for [`Bridge::call`] that carries a result back.
pub struct Completion<R> {
    slot: Arc<Mutex<Option<R>>>,
    resume: Option<Resume>,
}

impl<R> Completion<R> {
    pub fn complete(mut self, value: R) {
        *self.slot.lock() = Some(value);
        if let Some(resume) = self.resume.take() {
            resume.resume();
        }
    }
}

impl<R> Drop for Completion<R> {
    fn drop(&mut self) {
        // Unlike a bare Resume, an abandoned Completion still wakes the
        // caller, which then sees no value.
        if let Some(resume) = self.resume.take() {
            debug!("bridge completion dropped without a value");
            resume.resume();
        }
    }
}

/// Runs work on a dedicated thread while the caller blocks for its completion
pub struct Bridge {
    name: String,
    shared: Arc<Shared>,
    invoke_lock: Mutex<()>,
    worker: Option<JoinHandle<()>>,
}

impl Bridge {
    pub fn new() -> FsResult<Self> {
        Self::with_config(&BridgeConfig::default())
    }

    /// Spawn the worker thread. It parks until the first `invoke`.
    pub fn with_config(config: &BridgeConfig) -> FsResult<Self> {
        let shared = Arc::new(Shared {
            state: Arc::new(Mutex::new(BridgeState {
                phase: Phase::Idle,
                quit: false,
            })),
            condition: Condvar::new(),
        });

        let mut builder = thread::Builder::new().name(config.thread_name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker_shared = Arc::clone(&shared);
        let worker = builder.spawn(move || worker_main(worker_shared))?;
        debug!("Started bridge worker '{}'", config.thread_name);

        Ok(Self {
            name: config.thread_name.clone(),
            shared,
            invoke_lock: Mutex::new(()),
            worker: Some(worker),
        })
    }

    /// Run `work` on the worker thread and block until it calls `resume`.
    ///
    /// Safe to call from many threads; calls are served one at a time.
    pub fn invoke<F>(&self, work: F)
    where
        F: FnOnce(Resume) + Send + 'static,
    {
        self.post(Job::Run(Box::new(work)));
    }

    /// Like [`Bridge::invoke`], but returns the value passed to
    /// [`Completion::complete`], or `None` if the completion was dropped.
    pub fn call<R, F>(&self, work: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(Completion<R>) + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(None));
        let result = Arc::clone(&slot);
        self.invoke(move |resume| {
            work(Completion {
                slot: result,
                resume: Some(resume),
            })
        });
        let value = slot.lock().take();
        value
    }

    fn post(&self, job: Job) {
        let _serial = self.invoke_lock.lock();

        let mut state = self.shared.state.lock();
        state.phase = Phase::Posted(job);
        self.shared.condition.notify_all();
        while !matches!(state.phase, Phase::Finished) {
            self.shared.condition.wait(&mut state);
        }
        state.phase = Phase::Idle;
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if !worker.is_finished() {
            self.post(Job::Shutdown);
        }
        if worker.join().is_err() {
            warn!("bridge worker '{}' panicked", self.name);
        } else {
            debug!("Stopped bridge worker '{}'", self.name);
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge").field("name", &self.name).finish()
    }
}

/// Worker event loop. Each turn waits for one job and dispatches it; the
/// next turn starts when the job's `Resume` pushes a re-arm token.
fn worker_main(shared: Arc<Shared>) {
    let (rearm_tx, rearm_rx): (Sender<()>, Receiver<()>) = mpsc::channel();
    loop {
        match wait_and_dispatch(&shared, &rearm_tx) {
            Step::Quit => break,
            Step::Dispatched => {}
        }
        if rearm_rx.recv().is_err() {
            break;
        }
    }
    trace!("bridge worker loop exited");
}

fn wait_and_dispatch(shared: &Arc<Shared>, rearm: &Sender<()>) -> Step {
    let job = {
        let mut state = shared.state.lock();
        loop {
            if state.quit {
                return Step::Quit;
            }
            if let Some(job) = state.phase.take_posted() {
                break job;
            }
            shared.condition.wait(&mut state);
        }
    };

    // The phase is already Executing, so the invoking thread keeps waiting
    // even if it wakes between these two acquisitions.
    let hold = shared.state.lock_arc();
    let mut resume = Resume {
        hold: Some(hold),
        shared: Arc::clone(shared),
        rearm: rearm.clone(),
    };

    match job {
        Job::Run(work) => work(resume),
        Job::Shutdown => {
            resume.mark_quit();
            resume.resume();
        }
    }
    Step::Dispatched
}

/// Error for a bridged operation whose completion was dropped unfulfilled
pub(crate) fn abandoned() -> io::Error {
    io::Error::new(io::ErrorKind::Interrupted, "bridged operation abandoned")
}
