// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::any::{Any, TypeId};

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::chanrpc::CallId;

/// Named (JSON-enveloped) processor.
pub mod json;

/// Numeric (2-byte-tagged binary) processor.
pub mod binary;

pub use binary::BinaryProcessor;
pub use json::JsonProcessor;

/// A wire message: a plain named struct both ends can serialise.
pub trait Message: Serialize + DeserializeOwned + Clone + Any + Send {}

impl<T: Serialize + DeserializeOwned + Clone + Any + Send> Message for T {}

/// Connection-scoped context delivered alongside each routed message,
/// usually the connection's agent handle.
pub type UserData = std::sync::Arc<dyn Any + Send + Sync>;

/// The RPC id a routed message is dispatched under: modules register their
/// message functions with this.
pub fn msg_id<M: 'static>() -> CallId {
    CallId::Type(TypeId::of::<M>())
}

/// Errors surfaced while decoding, encoding or routing messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message {0} not registered")]
    NotRegistered(String),
    #[error("message id {0} not registered")]
    UnknownTag(u16),
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// In-thread handler bound to a message type; invoked with `[msg,
/// user_data]` on the connection's own task.
pub type MsgHandler = std::sync::Arc<dyn Fn(crate::chanrpc::Args) + Send + Sync>;

pub(crate) type CloneMsg =
    Box<dyn Fn(&dyn Any) -> Option<Box<dyn Any + Send>> + Send + Sync>;

/// Codec plus router: translates between frame payloads and typed messages
/// and hands each inbound message to its bound handler and/or RPC server.
pub trait Processor: Send + Sync {
    /// Decode a frame payload into a registered message.
    fn unmarshal(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, CodecError>;

    /// Encode a registered message into ordered frame parts.
    fn marshal(&self, msg: &dyn Any) -> Result<Vec<Bytes>, CodecError>;

    /// Dispatch a decoded message: the in-thread handler (if bound) runs
    /// inline with `[msg, user_data]`, and the bound RPC server (if any)
    /// receives a fire-and-forget call under [`msg_id`].
    fn route(&self, msg: Box<dyn Any + Send>, user_data: UserData) -> Result<(), CodecError>;
}

/// The simple (unqualified) name of a message type; the named processor
/// keys its wire envelope by this.
pub(crate) fn simple_name<M>() -> &'static str {
    let full = std::any::type_name::<M>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Shared handler/router dispatch: when both are bound, the handler runs on
/// a copy and the router receives the original.
pub(crate) fn dispatch(
    name: &str,
    clone_msg: &CloneMsg,
    handler: Option<&MsgHandler>,
    router: Option<&crate::chanrpc::CallSender>,
    tid: TypeId,
    msg: Box<dyn Any + Send>,
    user_data: UserData,
) -> Result<(), CodecError> {
    use crate::chanrpc::Arg;

    match (handler, router) {
        (Some(h), Some(r)) => {
            let copy = clone_msg(&*msg)
                .ok_or_else(|| CodecError::Malformed(format!("{name}: clone failed")))?;
            h(vec![copy, Box::new(user_data.clone()) as Arg]);
            r.go(tid, vec![msg, Box::new(user_data) as Arg]);
        },
        (Some(h), None) => h(vec![msg, Box::new(user_data) as Arg]),
        (None, Some(r)) => r.go(tid, vec![msg, Box::new(user_data) as Arg]),
        (None, None) => {},
    }
    Ok(())
}
