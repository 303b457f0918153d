// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::{
    chanrpc::{
        Arity, Args, CallId, CallInfo, Callback, Function, Ret, RetInfo, RpcError,
        client::{CallSender, Client},
    },
    guard,
};

/// A channel-RPC server: a function table plus a bounded call queue.
///
/// The server is single-owner. Exactly one task drains the call queue and
/// executes functions against `&mut S`; any number of clients and senders
/// may enqueue. Register every function before the owner starts draining.
pub struct Server<S> {
    functions: HashMap<CallId, Function<S>>,
    arities: Arc<DashMap<CallId, Arity>>,
    tx: mpsc::Sender<CallInfo>,
    rx: mpsc::Receiver<CallInfo>,
}

impl<S> Server<S> {
    /// Create a server whose call queue holds up to `len` pending calls.
    pub fn new(len: usize) -> Self {
        let (tx, rx) = mpsc::channel(len.max(1));
        Self {
            functions: HashMap::new(),
            arities: Arc::new(DashMap::new()),
            tx,
            rx,
        }
    }

    /// Bind `f` under `id`.
    ///
    /// Panics if `id` is already taken: a registered function is never
    /// replaced, and collisions are programming errors caught at startup.
    pub fn register(&mut self, id: impl Into<CallId>, f: Function<S>) {
        let id = id.into();
        if self.functions.contains_key(&id) {
            panic!("function {id}: already registered");
        }
        self.arities.insert(id.clone(), f.arity());
        self.functions.insert(id, f);
    }

    /// A cheap producer handle for fire-and-forget calls and for opening
    /// clients away from the owner task.
    pub fn sender(&self) -> CallSender {
        CallSender::new(self.tx.clone(), self.arities.clone())
    }

    /// Open a client whose async reply sink holds `async_len` replies.
    pub fn open(&self, async_len: usize) -> Client {
        self.sender().open(async_len)
    }

    /// Receive the next queued call. Intended for the owner's event loop.
    pub async fn recv(&mut self) -> Option<CallInfo> {
        self.rx.recv().await
    }

    /// Execute one call against the owner state and deliver its reply.
    ///
    /// A panicking function is caught here and turned into an error reply;
    /// the owner loop keeps running.
    pub async fn exec(&mut self, state: &mut S, ci: CallInfo) {
        let CallInfo {
            id,
            args,
            reply,
            cb,
        } = ci;

        let ret = match self.functions.get_mut(&id) {
            None => Err(RpcError::NotRegistered(id)),
            Some(f) => {
                let res = match f {
                    Function::NoReturn(f) => {
                        guard::catch(&id, || {
                            f(state, args);
                            Ret::None
                        })
                    },
                    Function::OneReturn(f) => guard::catch(&id, || Ret::One(f(state, args))),
                    Function::ManyReturn(f) => {
                        guard::catch(&id, || Ret::Many(f(state, args)))
                    },
                };
                res.map_err(RpcError::HandlerFailed)
            },
        };

        Self::reply(reply, cb, ret).await;
    }

    /// Close the call queue and answer every still-queued call that carries
    /// a reply sink with a `ServerClosed` error reply.
    pub async fn close(&mut self) {
        self.rx.close();
        while let Some(ci) = self.rx.recv().await {
            let CallInfo { reply, cb, .. } = ci;
            Self::reply(reply, cb, Err(RpcError::ServerClosed)).await;
        }
    }

    /// Fire-and-forget against our own queue, mirroring
    /// [`CallSender::go`].
    pub fn go(&self, id: impl Into<CallId>, args: Args) {
        self.sender().go(id, args);
    }

    async fn reply(
        reply: Option<mpsc::Sender<RetInfo>>,
        cb: Option<Callback>,
        ret: Result<Ret, RpcError>,
    ) {
        if let Some(tx) = reply {
            // A closed sink means the waiter is gone; nothing to do.
            let _ = tx.send(RetInfo { ret, cb }).await;
        }
    }
}
