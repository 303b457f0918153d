// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use bytes::Bytes;

use crate::{
    chanrpc::{Args, CallSender},
    codec::{CloneMsg, CodecError, Message, MsgHandler, Processor, UserData, dispatch,
            simple_name},
};

// ------------------------
// | tag | binary message |
// ------------------------

type Decode = Box<dyn Fn(&[u8]) -> Result<Box<dyn Any + Send>, CodecError> + Send + Sync>;
type Encode = Box<dyn Fn(&dyn Any) -> Result<Vec<u8>, CodecError> + Send + Sync>;

struct MsgInfo {
    name: &'static str,
    decode: Decode,
    encode: Encode,
    clone_msg: CloneMsg,
    router: Option<CallSender>,
    handler: Option<MsgHandler>,
}

/// Numeric message processor: each message type gets an auto-incrementing
/// 16-bit tag in registration order; the wire format is the 2-byte tag
/// (byte order configurable) followed by the bincode payload.
pub struct BinaryProcessor {
    little_endian: bool,
    entries: Vec<MsgInfo>,
    tags: HashMap<TypeId, u16>,
}

impl Default for BinaryProcessor {
    fn default() -> Self {
        Self::new(false)
    }
}

impl BinaryProcessor {
    pub fn new(little_endian: bool) -> Self {
        Self {
            little_endian,
            entries: Vec::new(),
            tags: HashMap::new(),
        }
    }

    /// Register `M`, assigning it the next tag.
    ///
    /// Panics on duplicates and on tag-space exhaustion: registration is
    /// startup wiring.
    pub fn register<M: Message>(&mut self) {
        let name = simple_name::<M>();
        if self.tags.contains_key(&TypeId::of::<M>()) {
            panic!("message {name} is already registered");
        }
        if self.entries.len() >= u16::MAX as usize {
            panic!("too many binary messages (max = {})", u16::MAX);
        }

        self.tags
            .insert(TypeId::of::<M>(), self.entries.len() as u16);
        self.entries.push(MsgInfo {
            name,
            decode: Box::new(|data| {
                bincode::deserialize::<M>(data)
                    .map(|m| Box::new(m) as Box<dyn Any + Send>)
                    .map_err(|e| CodecError::Malformed(e.to_string()))
            }),
            encode: Box::new(|m| {
                let m = m
                    .downcast_ref::<M>()
                    .ok_or_else(|| CodecError::Malformed("type mismatch".into()))?;
                bincode::serialize(m).map_err(|e| CodecError::Malformed(e.to_string()))
            }),
            clone_msg: Box::new(|m| {
                m.downcast_ref::<M>()
                    .map(|m| Box::new(m.clone()) as Box<dyn Any + Send>)
            }),
            router: None,
            handler: None,
        });
    }

    /// Bind the RPC server that receives routed `M` messages.
    pub fn set_router<M: Message>(&mut self, router: CallSender) {
        self.info_mut::<M>().router = Some(router);
    }

    /// Bind the in-thread handler for `M`.
    pub fn set_handler<M: Message>(&mut self, handler: impl Fn(Args) + Send + Sync + 'static) {
        self.info_mut::<M>().handler = Some(Arc::new(handler));
    }

    /// The tag assigned to `M`, if registered.
    pub fn tag_of<M: 'static>(&self) -> Option<u16> {
        self.tags.get(&TypeId::of::<M>()).copied()
    }

    fn info_mut<M: Message>(&mut self) -> &mut MsgInfo {
        let name = simple_name::<M>();
        let Some(tag) = self.tags.get(&TypeId::of::<M>()) else {
            panic!("message {name} not registered");
        };
        &mut self.entries[*tag as usize]
    }

    fn tag_bytes(&self, tag: u16) -> [u8; 2] {
        if self.little_endian {
            tag.to_le_bytes()
        } else {
            tag.to_be_bytes()
        }
    }
}

impl Processor for BinaryProcessor {
    fn unmarshal(&self, data: &[u8]) -> Result<Box<dyn Any + Send>, CodecError> {
        if data.len() < 2 {
            return Err(CodecError::Malformed("binary data too short".into()));
        }

        let tag = if self.little_endian {
            u16::from_le_bytes([data[0], data[1]])
        } else {
            u16::from_be_bytes([data[0], data[1]])
        };

        let info = self
            .entries
            .get(tag as usize)
            .ok_or(CodecError::UnknownTag(tag))?;
        (info.decode)(&data[2..])
    }

    fn marshal(&self, msg: &dyn Any) -> Result<Vec<Bytes>, CodecError> {
        let tag = *self
            .tags
            .get(&msg.type_id())
            .ok_or_else(|| CodecError::NotRegistered("unknown type".into()))?;
        let info = &self.entries[tag as usize];

        let payload = (info.encode)(msg)?;
        Ok(vec![
            Bytes::copy_from_slice(&self.tag_bytes(tag)),
            Bytes::from(payload),
        ])
    }

    fn route(&self, msg: Box<dyn Any + Send>, user_data: UserData) -> Result<(), CodecError> {
        let tid = (*msg).type_id();
        let tag = *self
            .tags
            .get(&tid)
            .ok_or_else(|| CodecError::NotRegistered("unknown type".into()))?;
        let info = &self.entries[tag as usize];
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
