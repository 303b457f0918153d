// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use bytes::Bytes;
use serde_json::Value;

use crate::{
    chanrpc::{Args, CallSender},
    codec::{CloneMsg, CodecError, Message, MsgHandler, Processor, UserData, dispatch,
            simple_name},
};

type Decode = Box<dyn Fn(Value) -> Result<Box<dyn Any + Send>, CodecError> + Send + Sync>;
type Encode = Box<dyn Fn(&dyn Any) -> Result<Value, CodecError> + Send + Sync>;

struct MsgInfo {
    name: &'static str,
    decode: Decode,
    encode: Encode,
    clone_msg: CloneMsg,
    router: Option<CallSender>,
    handler: Option<MsgHandler>,
}

/// Named message processor: the wire format envelopes each payload under
/// the message type's simple name, `{"Name": {...}}`, exactly one key.
///
/// Register every message (and bind routers/handlers) before the processor
/// starts serving connections.
#[derive(Default)]
pub struct JsonProcessor {
    entries: HashMap<&'static str, MsgInfo>,
    names: HashMap<TypeId, &'static str>,
}

impl JsonProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` under its simple type name.
    ///
    /// Panics on duplicates: message registration is startup wiring and a
    /// collision is a programming error.
    pub fn register<M: Message>(&mut self) {
        let name = simple_name::<M>();
        if self.entries.contains_key(name) {
            panic!("message {name} is already registered");
        }

        self.names.insert(TypeId::of::<M>(), name);
        self.entries.insert(
            name,
            MsgInfo {
                name,
                decode: Box::new(|v| {
                    serde_json::from_value::<M>(v)
                        .map(|m| Box::new(m) as Box<dyn Any + Send>)
                        .map_err(|e| CodecError::Malformed(e.to_string()))
                }),
                encode: Box::new(|m| {
                    let m = m
                        .downcast_ref::<M>()
                        .ok_or_else(|| CodecError::Malformed("type mismatch".into()))?;
                    serde_json::to_value(m).map_err(|e| CodecError::Malformed(e.to_string()))
                }),
                clone_msg: Box::new(|m| {
                    m.downcast_ref::<M>()
                        .map(|m| Box::new(m.clone()) as Box<dyn Any + Send>)
                }),
                router: None,
                handler: None,
            },
        );
    }

    /// Bind the RPC server that receives routed `M` messages.
    pub fn set_router<M: Message>(&mut self, router: CallSender) {
        self.info_mut::<M>().router = Some(router);
    }

    /// Bind the in-thread handler for `M`.
    pub fn set_handler<M: Message>(&mut self, handler: impl Fn(Args) + Send + Sync + 'static) {
        self.info_mut::<M>().handler = Some(Arc::new(handler));
    }

    fn info_mut<M: Message>(&mut self) -> &mut MsgInfo {
        let name = simple_name::<M>();
        match self.entries.get_mut(name) {
            Some(info) => info,
            None => panic!("message {name} not registered"),
        }
    }
}

impl Processor for JsonProcessor {
    fn unmarshal(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let Value::Object(map) = value else {
            return Err(CodecError::Malformed("top-level object required".into()));
        };
        if map.len() != 1 {
            return Err(CodecError::Malformed(
                "exactly one message key expected".into(),
            ));
        }
        let (name, payload) = map
            .into_iter()
            .next()
            .ok_or_else(|| CodecError::Malformed("empty envelope".into()))?;

        let info = self
            .entries
            .get(name.as_str())
            .ok_or(CodecError::NotRegistered(name))?;
        (info.decode)(payload)
    }

    fn marshal(&self, msg: &dyn Any) -> Result<Vec<Bytes>, CodecError> {
        let info = self.info_of(msg.type_id())?;

        let payload = (info.encode)(msg)?;
        let mut envelope = serde_json::Map::with_capacity(1);
        envelope.insert(info.name.to_string(), payload);

        let data = serde_json::to_vec(&Value::Object(envelope))
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(vec![Bytes::from(data)])
    }

    fn route(&self, msg: Box<dyn Any + Send>, user_data: UserData) -> Result<(), CodecError> {
        let tid = (*msg).type_id();
        let info = self.info_of(tid)?;
        dispatch(
            info.name,
            &info.clone_msg,
            info.handler.as_ref(),
            info.router.as_ref(),
            tid,
            msg,
            user_data,
        )
    }
}

impl JsonProcessor {
    fn info_of(&self, tid: TypeId) -> Result<&MsgInfo, CodecError> {
        let name = self
            .names
            .get(&tid)
            .ok_or_else(|| CodecError::NotRegistered("unknown type".into()))?;
        self.entries
            .get(name)
            .ok_or_else(|| CodecError::NotRegistered((*name).to_string()))
    }
}
