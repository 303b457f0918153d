// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    sync::{
        Arc, Mutex as StdMutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Local;
use tokio::{sync::mpsc, task::AbortHandle};

use crate::guard;

/// Cron expression parsing and next-fire computation.
pub mod cron;

pub use cron::{CronError, CronExpr};

/// Callback run on the owning module when a timer fires.
pub type TimerCallback<S> = Box<dyn FnOnce(&mut S) + Send>;

struct TimerShared<S> {
    cb: StdMutex<Option<TimerCallback<S>>>,
}

/// An armed timer travelling through the dispatcher's fire channel.
///
/// The underlying clock task does nothing but publish this object; the
/// owning module dequeues it and runs [`Timer::fire`] on its own thread.
pub struct Timer<S> {
    shared: Arc<TimerShared<S>>,
}

impl<S> Timer<S> {
    /// Run the callback, if it is still armed, under the panic guard.
    ///
    /// A timer stopped after its clock already fired reaches here with the
    /// callback gone, and this is a no-op.
    pub fn fire(self, state: &mut S) {
        let cb = self.shared.cb.lock().expect("timer slot poisoned").take();
        if let Some(cb) = cb {
            let _ = guard::catch(&"timer callback", || cb(state));
        }
    }
}

/// Owner-side handle to an armed timer.
pub struct TimerHandle<S> {
    shared: Arc<TimerShared<S>>,
    abort: AbortHandle,
}

impl<S> TimerHandle<S> {
    /// Cancel the clock and disarm the callback. Guarantees the callback
    /// will never run, even if the fire channel already holds the timer.
    /// Stopping twice is a no-op.
    pub fn stop(&self) {
        self.abort.abort();
        self.shared.cb.lock().expect("timer slot poisoned").take();
    }
}

/// One dispatcher per owner task: a bounded channel through which armed
/// timers deliver themselves on expiry.
pub struct Dispatcher<S> {
    handle: DispatcherHandle<S>,
    rx: mpsc::Receiver<Timer<S>>,
}

impl<S: 'static> Dispatcher<S> {
    pub fn new(len: usize) -> Self {
        let (tx, rx) = mpsc::channel(len.max(1));
        Self {
            handle: DispatcherHandle { tx },
            rx,
        }
    }

    /// A cheap arming handle, safe to store inside the owner's state so
    /// handlers can schedule timers.
    pub fn handle(&self) -> DispatcherHandle<S> {
        self.handle.clone()
    }

    /// Arm a one-shot timer.
    pub fn after_func(
        &self,
        d: Duration,
        cb: impl FnOnce(&mut S) + Send + 'static,
    ) -> TimerHandle<S> {
        self.handle.after_func(d, cb)
    }

    /// Receive the next expired timer. Intended for the owner's event loop.
    pub async fn recv(&mut self) -> Option<Timer<S>> {
        self.rx.recv().await
    }

    /// Schedule `cb` on a cron expression.
    pub fn cron_func(
        &self,
        expr: &str,
        cb: impl FnMut(&mut S) + Send + 'static,
    ) -> Result<CronHandle<S>, CronError> {
        self.handle.cron_func(expr, cb)
    }
}

/// Cloneable arming side of a [`Dispatcher`].
pub struct DispatcherHandle<S> {
    tx: mpsc::Sender<Timer<S>>,
}

impl<S> Clone for DispatcherHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> DispatcherHandle<S> {
    /// Arm a one-shot timer firing after `d`.
    pub fn after_func(
        &self,
        d: Duration,
        cb: impl FnOnce(&mut S) + Send + 'static,
    ) -> TimerHandle<S> {
        arm(&self.tx, d, Box::new(cb))
    }

    /// Schedule `cb` on a cron expression. The next fire is re-armed before
    /// user code runs, so the callback may stop its own cron without racing
    /// the re-arm.
    pub fn cron_func(
        &self,
        expr: &str,
        cb: impl FnMut(&mut S) + Send + 'static,
    ) -> Result<CronHandle<S>, CronError> {
        let expr = CronExpr::parse(expr)?;
        let now = Local::now().naive_local();
        let next = expr.next(now).ok_or(CronError::NoUpcomingFire)?;
        let delay = (next - now).to_std().unwrap_or_default();

        let shared = Arc::new(CronShared {
            expr,
            tx: self.tx.clone(),
            cb: StdMutex::new(Some(Box::new(cb))),
            cur: StdMutex::new(None),
            stopped: AtomicBool::new(false),
        });
        arm_cron(shared.clone(), delay);
        Ok(CronHandle { shared })
    }
}

fn arm<S: 'static>(
    tx: &mpsc::Sender<Timer<S>>,
    d: Duration,
    cb: TimerCallback<S>,
) -> TimerHandle<S> {
    let shared = Arc::new(TimerShared {
        cb: StdMutex::new(Some(cb)),
    });
    let timer = Timer {
        shared: shared.clone(),
    };
    let tx = tx.clone();
    let task = tokio::spawn(async move {
        tokio::time::sleep(d).await;
        let _ = tx.send(timer).await;
    });
    TimerHandle {
        shared,
        abort: task.abort_handle(),
    }
}

type CronCallback<S> = Box<dyn FnMut(&mut S) + Send>;

struct CronShared<S> {
    expr: CronExpr,
    tx: mpsc::Sender<Timer<S>>,
    cb: StdMutex<Option<CronCallback<S>>>,
    cur: StdMutex<Option<TimerHandle<S>>>,
    stopped: AtomicBool,
}

/// Owner-side handle to a scheduled cron job.
pub struct CronHandle<S> {
    shared: Arc<CronShared<S>>,
}

impl<S> CronHandle<S> {
    /// Stop the cron: the current timer is disarmed and no further fires
    /// are scheduled.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        if let Some(t) = self
            .shared
            .cur
            .lock()
            .expect("cron timer slot poisoned")
            .take()
        {
            t.stop();
        }
        self.shared.cb.lock().expect("cron cb slot poisoned").take();
    }
}

fn arm_cron<S: 'static>(shared: Arc<CronShared<S>>, d: Duration) {
    let st = shared.clone();
    let timer_cb: TimerCallback<S> = Box::new(move |state: &mut S| {
        if !st.stopped.load(Ordering::SeqCst) {
            let now = Local::now().naive_local();
            if let Some(next) = st.expr.next(now) {
                let delay = (next - now).to_std().unwrap_or_default();
                arm_cron(st.clone(), delay);
            }
        }

        // Take the callback out for the duration of the call: the user code
        // may stop this cron, which needs the slot lock.
        let taken = st.cb.lock().expect("cron cb slot poisoned").take();
        if let Some(mut cb) = taken {
            let _ = guard::catch(&"cron callback", || cb(state));
            if !st.stopped.load(Ordering::SeqCst) {
                let mut slot = st.cb.lock().expect("cron cb slot poisoned");
                if slot.is_none() {
                    *slot = Some(cb);
                }
            }
        }
    });
    let handle = arm(&shared.tx, d, timer_cb);
    *shared.cur.lock().expect("cron timer slot poisoned") = Some(handle);
}
