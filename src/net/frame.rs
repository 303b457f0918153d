// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

// --------------
// | len | data |
// --------------

/// Width of the length prefix in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenWidth {
    U8,
    U16,
    U32,
}

impl LenWidth {
    pub fn bytes(self) -> usize {
        match self {
            LenWidth::U8 => 1,
            LenWidth::U16 => 2,
            LenWidth::U32 => 4,
        }
    }

    /// Largest payload length the prefix can represent.
    pub fn max_representable(self) -> u32 {
        match self {
            LenWidth::U8 => u8::MAX as u32,
            LenWidth::U16 => u16::MAX as u32,
            LenWidth::U32 => u32::MAX,
        }
    }
}

/// Errors surfaced while framing or unframing a message.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("message too long ({len} > {max})")]
    TooLong { len: u64, max: u32 },
    #[error("message too short ({len} < {min})")]
    TooShort { len: u64, min: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration for the `[len][payload]` framing on a stream connection.
///
/// Both bounds are clamped at construction to what the prefix width can
/// represent, so a decoded length never silently overflows.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    width: LenWidth,
    little_endian: bool,
    min_len: u32,
    max_len: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(LenWidth::U16, false, 1, 4096)
    }
}

impl FrameCodec {
    pub fn new(width: LenWidth, little_endian: bool, min_len: u32, max_len: u32) -> Self {
        let cap = width.max_representable();
        Self {
            width,
            little_endian,
            min_len: min_len.min(cap),
            max_len: max_len.min(cap),
        }
    }

    pub fn min_len(&self) -> u32 {
        self.min_len
    }

    pub fn max_len(&self) -> u32 {
        self.max_len
    }

    /// Read one frame: the length prefix, the guards, then exactly that
    /// many payload bytes. Any short read is fatal for the frame.
    pub async fn read<R>(&self, r: &mut R) -> Result<Bytes, FrameError>
    where R: AsyncRead + Unpin {
        let mut prefix = [0u8; 4];
        let n = self.width.bytes();
        r.read_exact(&mut prefix[..n]).await?;

        let len = match (self.width, self.little_endian) {
            (LenWidth::U8, _) => prefix[0] as u32,
            (LenWidth::U16, true) => u16::from_le_bytes([prefix[0], prefix[1]]) as u32,
            (LenWidth::U16, false) => u16::from_be_bytes([prefix[0], prefix[1]]) as u32,
            (LenWidth::U32, true) => u32::from_le_bytes(prefix),
            (LenWidth::U32, false) => u32::from_be_bytes(prefix),
        };

        self.check_len(len as u64)?;

        let mut data = vec![0u8; len as usize];
        r.read_exact(&mut data).await?;
        Ok(data.into())
    }

    /// Assemble one frame out of ordered parts: the summed length prefix
    /// followed by each part, in a single buffer ready for the write queue.
    pub fn encode(&self, parts: &[Bytes]) -> Result<Bytes, FrameError> {
        let len: u64 = parts.iter().map(|p| p.len() as u64).sum();
        self.check_len(len)?;

        let mut buf = BytesMut::with_capacity(self.width.bytes() + len as usize);
        match (self.width, self.little_endian) {
            (LenWidth::U8, _) => buf.put_u8(len as u8),
            (LenWidth::U16, true) => buf.put_u16_le(len as u16),
            (LenWidth::U16, false) => buf.put_u16(len as u16),
            (LenWidth::U32, true) => buf.put_u32_le(len as u32),
            (LenWidth::U32, false) => buf.put_u32(len as u32),
        }
        for p in parts {
            buf.extend_from_slice(p);
        }
        Ok(buf.freeze())
    }

    fn check_len(&self, len: u64) -> Result<(), FrameError> {
        if len > self.max_len as u64 {
            return Err(FrameError::TooLong {
                len,
                max: self.max_len,
            });
        }
        if len < self.min_len as u64 {
            return Err(FrameError::TooShort {
                len,
                min: self.min_len,
            });
        }
        Ok(())
    }
}
