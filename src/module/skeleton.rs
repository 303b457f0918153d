// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    chanrpc::{CallId, CallInfo, CallSender, Client, Function, Server},
    task::{LinearContext, TaskCallback, TaskEngine, TaskError, TaskHandle},
    timer::{CronError, CronHandle, Dispatcher, DispatcherHandle, Timer, TimerHandle},
};

/// Channel sizing for a [`Skeleton`].
#[derive(Debug, Clone, Copy)]
pub struct SkeletonBuilder {
    /// Pending task callbacks.
    pub go_len: usize,
    /// Pending expired timers.
    pub timer_len: usize,
    /// Pending external RPC calls.
    pub server_len: usize,
    /// Pending console-command RPC calls.
    pub command_len: usize,
}

impl Default for SkeletonBuilder {
    fn default() -> Self {
        Self {
            go_len: 64,
            timer_len: 64,
            server_len: 64,
            command_len: 16,
        }
    }
}

impl SkeletonBuilder {
    pub fn build<S: 'static>(self) -> Skeleton<S> {
        Skeleton {
            server: Server::new(self.server_len),
            command_server: Server::new(self.command_len),
            engine: TaskEngine::new(self.go_len),
            dispatcher: Dispatcher::new(self.timer_len),
        }
    }
}

/// The reusable heart of a module: one serial loop multiplexing external
/// RPC calls, console-command calls, background-task callbacks and timer
/// fires. Everything it dispatches runs on the owning module's task with
/// `&mut S`, so handlers never need locks.
pub struct Skeleton<S> {
    server: Server<S>,
    command_server: Server<S>,
    engine: TaskEngine<S>,
    dispatcher: Dispatcher<S>,
}

enum Event<S> {
    Close,
    Call(CallInfo),
    Command(CallInfo),
    Task(TaskCallback<S>),
    Timer(Timer<S>),
}

impl<S: 'static> Skeleton<S> {
    /// Bind `f` on the external RPC server. Call before [`Skeleton::run`].
    pub fn register(&mut self, id: impl Into<CallId>, f: Function<S>) {
        self.server.register(id, f);
    }

    /// Bind a console command handler on the command RPC server. The
    /// console reaches it through [`Skeleton::command_sender`].
    pub fn register_command(&mut self, name: &'static str, f: Function<S>) {
        self.command_server.register(name, f);
    }

    /// Producer handle onto the external server, for processors and other
    /// modules.
    pub fn sender(&self) -> CallSender {
        self.server.sender()
    }

    /// Producer handle onto the command server, for the console.
    pub fn command_sender(&self) -> CallSender {
        self.command_server.sender()
    }

    /// Open a client against the external server.
    pub fn open(&self, async_len: usize) -> Client {
        self.server.open(async_len)
    }

    /// Offload blocking work; the callback re-enters this module's loop.
    pub fn go<R, W, C>(&self, work: W, cb: C)
    where
        R: Send + 'static,
        W: FnOnce() -> R + Send + 'static,
        C: FnOnce(&mut S, Result<R, TaskError>) + Send + 'static,
    {
        self.engine.go(work, cb);
    }

    /// Submission handle for storing inside `S`.
    pub fn task_handle(&self) -> TaskHandle<S> {
        self.engine.handle()
    }

    /// A submission-order-preserving task context.
    pub fn linear_context(&self) -> LinearContext<S> {
        self.engine.linear_context()
    }

    /// Arm a one-shot timer delivered through this module's loop.
    pub fn after_func(
        &self,
        d: Duration,
        cb: impl FnOnce(&mut S) + Send + 'static,
    ) -> TimerHandle<S> {
        self.dispatcher.after_func(d, cb)
    }

    /// Schedule a cron job delivered through this module's loop.
    pub fn cron_func(
        &self,
        expr: &str,
        cb: impl FnMut(&mut S) + Send + 'static,
    ) -> Result<CronHandle<S>, CronError> {
        self.dispatcher.cron_func(expr, cb)
    }

    /// Arming handle for storing inside `S`.
    pub fn timer_handle(&self) -> DispatcherHandle<S> {
        self.dispatcher.handle()
    }

    /// The module event loop. Dispatch is strictly serial: one call, task
    /// callback or timer at a time, in dequeue order. On close, the command
    /// server, the external server and the task engine are shut down in
    /// that order, each draining its pending work.
    pub async fn run(&mut self, state: &mut S, close: CancellationToken) {
        loop {
            let ev = tokio::select! {
                _ = close.cancelled() => Event::Close,
                Some(ci) = self.server.recv() => Event::Call(ci),
                Some(ci) = self.command_server.recv() => Event::Command(ci),
                Some(cb) = self.engine.recv() => Event::Task(cb),
                Some(t) = self.dispatcher.recv() => Event::Timer(t),
            };

            match ev {
                Event::Close => {
                    self.command_server.close().await;
                    self.server.close().await;
                    self.engine.close(state).await;
                    return;
                },
                Event::Call(ci) => self.server.exec(state, ci).await,
                Event::Command(ci) => self.command_server.exec(state, ci).await,
                Event::Task(cb) => self.engine.run_cb(state, cb),
                Event::Timer(t) => t.fire(state),
            }
        }
    }
}
