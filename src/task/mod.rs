// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::error;

use crate::guard;

/// A callback delivered back to the owning module, run against its state.
pub type TaskCallback<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Why a work body did not produce a result.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task cancelled before completion")]
    Cancelled,
}

/// Offloads blocking work onto worker threads and funnels the completion
/// callbacks back into the owning module's event loop.
///
/// One engine per owner task. Every submission increments the pending
/// counter; the counter drops only after the callback has run, which is
/// what lets [`TaskEngine::close`] guarantee a full drain on shutdown.
pub struct TaskEngine<S> {
    handle: TaskHandle<S>,
    cb_rx: mpsc::Receiver<TaskCallback<S>>,
}

impl<S: 'static> TaskEngine<S> {
    /// Create an engine whose callback channel holds up to `len` completed
    /// callbacks awaiting the owner.
    pub fn new(len: usize) -> Self {
        let (cb_tx, cb_rx) = mpsc::channel(len.max(1));
        Self {
            handle: TaskHandle {
                cb_tx,
                pending: Arc::new(AtomicUsize::new(0)),
            },
            cb_rx,
        }
    }

    /// A cheap submission handle, safe to store inside the owner's state so
    /// handlers can offload work.
    pub fn handle(&self) -> TaskHandle<S> {
        self.handle.clone()
    }

    /// Run `work` on a worker thread; once it finishes (or fails), deliver
    /// `cb` into the owner's callback channel.
    ///
    /// Work bodies submitted here may complete in any order.
    pub fn go<R, W, C>(&self, work: W, cb: C)
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut S, Result<R, TaskError>) + Send + 'static,
    {
        self.handle.go(work, cb);
    }

    /// Receive the next completed callback. Intended for the owner's event
    /// loop.
    pub async fn recv(&mut self) -> Option<TaskCallback<S>> {
        self.cb_rx.recv().await
    }

    /// Run one completed callback under the panic guard and settle its
    /// pending slot.
    pub fn run_cb(&mut self, state: &mut S, cb: TaskCallback<S>) {
        let _ = guard::catch(&"task callback", || cb(state));
        self.handle.pending.fetch_sub(1, Ordering::SeqCst);
    }

    /// Submissions whose callbacks have not yet run.
    pub fn pending(&self) -> usize {
        self.handle.pending.load(Ordering::SeqCst)
    }

    /// Keep draining callbacks until every started submission has settled.
    pub async fn close(&mut self, state: &mut S) {
        while self.handle.pending.load(Ordering::SeqCst) > 0 {
            match self.cb_rx.recv().await {
                Some(cb) => self.run_cb(state, cb),
                None => break,
            }
        }
    }

    /// A context whose submissions execute strictly in submission order.
    pub fn linear_context(&self) -> LinearContext<S> {
        self.handle.linear_context()
    }
}

/// Cloneable submission side of a [`TaskEngine`].
pub struct TaskHandle<S> {
    cb_tx: mpsc::Sender<TaskCallback<S>>,
    pending: Arc<AtomicUsize>,
}

impl<S> Clone for TaskHandle<S> {
    fn clone(&self) -> Self {
        Self {
            cb_tx: self.cb_tx.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<S: 'static> TaskHandle<S> {
    /// See [`TaskEngine::go`].
    pub fn go<R, W, C>(&self, work: W, cb: C)
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut S, Result<R, TaskError>) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let tx = self.cb_tx.clone();
        tokio::spawn(async move {
            let res = run_blocking(work).await;
            let cb: TaskCallback<S> = Box::new(move |s| cb(s, res));
            let _ = tx.send(cb).await;
        });
    }

    /// A context whose submissions execute strictly in submission order.
    pub fn linear_context(&self) -> LinearContext<S> {
        LinearContext {
            cb_tx: self.cb_tx.clone(),
            pending: self.pending.clone(),
            queue: Arc::new(StdMutex::new(VecDeque::new())),
            exec: Arc::new(Mutex::new(())),
        }
    }
}

type LinearJob<S> = Box<dyn FnOnce() -> TaskCallback<S> + Send>;

/// Submission-order-preserving variant of [`TaskEngine::go`].
///
/// Shares the owner's callback channel and pending counter. Each submission
/// lands in a queue; worker tasks serialise on the execution mutex and
/// always pop the oldest entry, so the k-th work body completes before the
/// (k+1)-th begins and callbacks reach the owner in the same order.
pub struct LinearContext<S> {
    cb_tx: mpsc::Sender<TaskCallback<S>>,
    pending: Arc<AtomicUsize>,
    queue: Arc<StdMutex<VecDeque<LinearJob<S>>>>,
    exec: Arc<Mutex<()>>,
}

impl<S: 'static> LinearContext<S> {
    pub fn go<R, W, C>(&self, work: W, cb: C)
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut S, Result<R, TaskError>) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);

        let job: LinearJob<S> = Box::new(move || {
            let res = match std::panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(v) => Ok(v),
                Err(payload) => {
                    let msg = guard::panic_message(payload);
                    error!("linear task failed: {msg}");
                    Err(TaskError::Panicked(msg))
                },
            };
            Box::new(move |s: &mut S| cb(s, res))
        });
        self.queue
            .lock()
            .expect("linear queue poisoned")
            .push_back(job);

        let queue = self.queue.clone();
        let exec = self.exec.clone();
        let tx = self.cb_tx.clone();
        tokio::spawn(async move {
            let _slot = exec.lock().await;
            let Some(job) = queue.lock().expect("linear queue poisoned").pop_front() else {
                return;
            };
            let cb = match tokio::task::spawn_blocking(job).await {
                Ok(cb) => cb,
                Err(e) => {
                    error!("linear task join failed: {e}");
                    Box::new(|_: &mut S| {}) as TaskCallback<S>
                },
            };
            // Delivered while still holding the execution slot, so callback
            // order matches work order.
            let _ = tx.send(cb).await;
        });
    }
}

async fn run_blocking<R: Send + 'static>(
    work: impl FnOnce() -> R + Send + 'static,
) -> Result<R, TaskError> {
    match tokio::task::spawn_blocking(work).await {
        Ok(v) => Ok(v),
        Err(e) => {
            let err = if e.is_panic() {
                TaskError::Panicked(guard::panic_message(e.into_panic()))
            } else {
                TaskError::Cancelled
            };
            error!("background task failed: {err}");
            Err(err)
        },
    }
}
