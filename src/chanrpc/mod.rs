// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::{Any, TypeId},
    borrow::Cow,
    fmt,
};

use thiserror::Error;
use tokio::sync::mpsc;

/// In-process RPC server.
pub mod server;

/// In-process RPC client handles.
pub mod client;

pub use client::{CallSender, Client};
pub use server::Server;

/// A single opaque argument or return value travelling through a call.
pub type Arg = Box<dyn Any + Send>;

/// The argument list of a call.
pub type Args = Vec<Arg>;

/// Identifier a function is registered under: either a plain name or a
/// message type token (used by the processors when routing inbound
/// messages).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum CallId {
    Name(Cow<'static, str>),
    Type(TypeId),
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallId::Name(n) => write!(f, "{n}"),
            CallId::Type(t) => write!(f, "{t:?}"),
        }
    }
}

impl From<&'static str> for CallId {
    fn from(n: &'static str) -> Self {
        CallId::Name(Cow::Borrowed(n))
    }
}

impl From<String> for CallId {
    fn from(n: String) -> Self {
        CallId::Name(Cow::Owned(n))
    }
}

impl From<TypeId> for CallId {
    fn from(t: TypeId) -> Self {
        CallId::Type(t)
    }
}

/// Return shape of a registered function.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arity {
    None,
    One,
    Many,
}

/// A function bound in a server. Only the server's owner task ever invokes
/// it; `&mut S` is the owning module's state.
pub enum Function<S> {
    NoReturn(Box<dyn FnMut(&mut S, Args) + Send>),
    OneReturn(Box<dyn FnMut(&mut S, Args) -> Arg + Send>),
    ManyReturn(Box<dyn FnMut(&mut S, Args) -> Args + Send>),
}

impl<S> Function<S> {
    pub fn no_ret(f: impl FnMut(&mut S, Args) + Send + 'static) -> Self {
        Function::NoReturn(Box::new(f))
    }

    pub fn one_ret(f: impl FnMut(&mut S, Args) -> Arg + Send + 'static) -> Self {
        Function::OneReturn(Box::new(f))
    }

    pub fn many_ret(f: impl FnMut(&mut S, Args) -> Args + Send + 'static) -> Self {
        Function::ManyReturn(Box::new(f))
    }

    pub fn arity(&self) -> Arity {
        match self {
            Function::NoReturn(_) => Arity::None,
            Function::OneReturn(_) => Arity::One,
            Function::ManyReturn(_) => Arity::Many,
        }
    }
}

/// Value returned by a function, shaped by its arity.
pub enum Ret {
    None,
    One(Arg),
    Many(Args),
}

/// Completion callback of an async call. The shape must match the arity of
/// the called function; mismatches are rejected before the call is sent.
pub enum Callback {
    ErrOnly(Box<dyn FnOnce(Option<RpcError>) + Send>),
    ValueErr(Box<dyn FnOnce(Result<Arg, RpcError>) + Send>),
    ValuesErr(Box<dyn FnOnce(Result<Args, RpcError>) + Send>),
}

impl Callback {
    pub fn err_only(f: impl FnOnce(Option<RpcError>) + Send + 'static) -> Self {
        Callback::ErrOnly(Box::new(f))
    }

    pub fn value_err(f: impl FnOnce(Result<Arg, RpcError>) + Send + 'static) -> Self {
        Callback::ValueErr(Box::new(f))
    }

    pub fn values_err(f: impl FnOnce(Result<Args, RpcError>) + Send + 'static) -> Self {
        Callback::ValuesErr(Box::new(f))
    }

    pub fn arity(&self) -> Arity {
        match self {
            Callback::ErrOnly(_) => Arity::None,
            Callback::ValueErr(_) => Arity::One,
            Callback::ValuesErr(_) => Arity::Many,
        }
    }

    /// Feed a reply into the user callback, adapting the reply shape to the
    /// callback shape.
    pub(crate) fn run(self, ret: Result<Ret, RpcError>) {
        match self {
            Callback::ErrOnly(f) => f(ret.err()),
            Callback::ValueErr(f) => f(ret.and_then(|r| match r {
                Ret::One(v) => Ok(v),
                _ => Err(RpcError::ReplyShape),
            })),
            Callback::ValuesErr(f) => f(ret.and_then(|r| match r {
                Ret::Many(vs) => Ok(vs),
                _ => Err(RpcError::ReplyShape),
            })),
        }
    }
}

/// Errors surfaced by channel-RPC calls.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("function {0}: not registered")]
    NotRegistered(CallId),
    #[error("function {0}: return arity mismatch")]
    ArityMismatch(CallId),
    #[error("chanrpc channel full")]
    ChannelFull,
    #[error("chanrpc server closed")]
    ServerClosed,
    #[error("handler failed: {0}")]
    HandlerFailed(String),
    #[error("reply shape does not match callback")]
    ReplyShape,
}

/// One queued invocation. `reply` is absent for fire-and-forget calls; `cb`
/// travels to the server and comes back attached to the reply so the client
/// knows which user callback to run.
pub struct CallInfo {
    pub(crate) id: CallId,
    pub(crate) args: Args,
    pub(crate) reply: Option<mpsc::Sender<RetInfo>>,
    pub(crate) cb: Option<Callback>,
}

/// One reply, delivered to the sync or async reply sink of the caller.
pub struct RetInfo {
    pub(crate) ret: Result<Ret, RpcError>,
    pub(crate) cb: Option<Callback>,
}
