// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

#![allow(clippy::module_inception)]

/// Length-prefixed frame codec.
pub mod frame;

/// Owning TCP connection wrapper with a bounded write queue.
pub mod conn;

/// Accepting TCP server with per-connection agents.
pub mod server;

pub use conn::TcpConn;
pub use frame::{FrameCodec, FrameError, LenWidth};
pub use server::{ConnAgent, TcpServer};
