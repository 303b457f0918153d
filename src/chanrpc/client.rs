// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::chanrpc::{Arg, Arity, Args, CallId, CallInfo, Callback, Ret, RetInfo, RpcError};

/// Cloneable producer handle onto a server's call queue.
///
/// Carries the shared id→arity registry so callers can validate a call
/// before enqueuing it.
#[derive(Clone)]
pub struct CallSender {
    tx: mpsc::Sender<CallInfo>,
    arities: Arc<DashMap<CallId, Arity>>,
}

impl CallSender {
    pub(crate) fn new(tx: mpsc::Sender<CallInfo>, arities: Arc<DashMap<CallId, Arity>>) -> Self {
        Self { tx, arities }
    }

    /// Fire-and-forget. Unknown ids are ignored; a full queue drops the
    /// call with a debug log line, never blocking the caller.
    pub fn go(&self, id: impl Into<CallId>, args: Args) {
        let id = id.into();
        if !self.arities.contains_key(&id) {
            debug!("go {id}: not registered, dropped");
            return;
        }
        let ci = CallInfo {
            id,
            args,
            reply: None,
            cb: None,
        };
        if let Err(TrySendError::Full(ci)) = self.tx.try_send(ci) {
            debug!("go {}: channel full, dropped", ci.id);
        }
    }

    /// Open a client bound to this server. The client belongs to one task;
    /// its async reply sink holds up to `async_len` undelivered replies.
    pub fn open(&self, async_len: usize) -> Client {
        Client::new(self.tx.clone(), self.arities.clone(), async_len)
    }

    fn check(&self, id: &CallId, want: Arity) -> Result<(), RpcError> {
        match self.arities.get(id) {
            None => Err(RpcError::NotRegistered(id.clone())),
            Some(a) if *a != want => Err(RpcError::ArityMismatch(id.clone())),
            Some(_) => Ok(()),
        }
    }
}

/// A channel-RPC client. One client per owner task; not shared.
///
/// Synchronous calls block the caller until the reply arrives through a
/// capacity-1 sink, so at most one sync call is ever outstanding. Async
/// calls enqueue without blocking and deliver replies through [`Client::cb`]
/// when the owner drains [`Client::recv_asyn`].
pub struct Client {
    sender: CallSender,
    sync_tx: mpsc::Sender<RetInfo>,
    sync_rx: mpsc::Receiver<RetInfo>,
    asyn_tx: mpsc::Sender<RetInfo>,
    asyn_rx: mpsc::Receiver<RetInfo>,
    pending_asyn: usize,
}

impl Client {
    pub(crate) fn new(
        tx: mpsc::Sender<CallInfo>,
        arities: Arc<DashMap<CallId, Arity>>,
        async_len: usize,
    ) -> Self {
        let (sync_tx, sync_rx) = mpsc::channel(1);
        let (asyn_tx, asyn_rx) = mpsc::channel(async_len.max(1));
        Self {
            sender: CallSender::new(tx, arities),
            sync_tx,
            sync_rx,
            asyn_tx,
            asyn_rx,
            pending_asyn: 0,
        }
    }

    /// Synchronous call of a no-return function.
    pub async fn call0(&mut self, id: impl Into<CallId>, args: Args) -> Result<(), RpcError> {
        let ri = self.call_sync(id.into(), args, Arity::None).await?;
        ri.ret.map(|_| ())
    }

    /// Synchronous call of a single-return function.
    pub async fn call1(
        &mut self,
        id: impl Into<CallId>,
        args: Args,
    ) -> Result<Arg, RpcError> {
        let id = id.into();
        let ri = self.call_sync(id, args, Arity::One).await?;
        match ri.ret? {
            Ret::One(v) => Ok(v),
            _ => Err(RpcError::ReplyShape),
        }
    }

    /// Synchronous call of a multi-return function.
    pub async fn calln(&mut self, id: impl Into<CallId>, args: Args) -> Result<Args, RpcError> {
        let id = id.into();
        let ri = self.call_sync(id, args, Arity::Many).await?;
        match ri.ret? {
            Ret::Many(vs) => Ok(vs),
            _ => Err(RpcError::ReplyShape),
        }
    }

    /// Asynchronous call. Never blocks: validation failures and a full call
    /// queue invoke `cb` inline with the error. On success the pending
    /// counter grows by one until the matching reply passes through
    /// [`Client::cb`].
    pub fn asyn_call(&mut self, id: impl Into<CallId>, args: Args, cb: Callback) {
        let id = id.into();
        if let Err(e) = self.sender.check(&id, cb.arity()) {
            cb.run(Err(e));
            return;
        }

        let ci = CallInfo {
            id,
            args,
            reply: Some(self.asyn_tx.clone()),
            cb: Some(cb),
        };
        match self.sender.tx.try_send(ci) {
            Ok(()) => self.pending_asyn += 1,
            Err(TrySendError::Full(ci)) => {
                if let Some(cb) = ci.cb {
                    cb.run(Err(RpcError::ChannelFull));
                }
            },
            Err(TrySendError::Closed(ci)) => {
                if let Some(cb) = ci.cb {
                    cb.run(Err(RpcError::ServerClosed));
                }
            },
        }
    }

    /// Fire-and-forget through this client's server.
    pub fn go(&self, id: impl Into<CallId>, args: Args) {
        self.sender.go(id, args);
    }

    /// Receive the next async reply. Pair each received reply with a
    /// [`Client::cb`] call.
    pub async fn recv_asyn(&mut self) -> Option<RetInfo> {
        self.asyn_rx.recv().await
    }

    /// Run the user callback carried by an async reply.
    pub fn cb(&mut self, ri: RetInfo) {
        if let Some(cb) = ri.cb {
            cb.run(ri.ret);
        }
        self.pending_asyn = self.pending_asyn.saturating_sub(1);
    }

    /// Outstanding async replies not yet delivered to their callbacks.
    pub fn pending_async(&self) -> usize {
        self.pending_asyn
    }

    /// Drain every outstanding async reply, running its callback.
    pub async fn close(&mut self) {
        while self.pending_asyn > 0 {
            match self.asyn_rx.recv().await {
                Some(ri) => self.cb(ri),
                None => break,
            }
        }
    }

    async fn call_sync(
        &mut self,
        id: CallId,
        args: Args,
        want: Arity,
    ) -> Result<RetInfo, RpcError> {
        self.sender.check(&id, want)?;
        let ci = CallInfo {
            id,
            args,
            reply: Some(self.sync_tx.clone()),
            cb: None,
        };
        self.sender
            .tx
            .send(ci)
            .await
            .map_err(|_| RpcError::ServerClosed)?;
        self.sync_rx.recv().await.ok_or(RpcError::ServerClosed)
    }
}
