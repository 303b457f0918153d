// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf, tcp::OwnedWriteHalf},
    sync::{Mutex, mpsc, mpsc::error::TrySendError},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::net::frame::{FrameCodec, FrameError};

struct WriteState {
    closed: bool,
    tx: mpsc::Sender<Bytes>,
}

/// Owning wrapper around an accepted socket.
///
/// A dedicated writer task drains the bounded write queue onto the socket.
/// Writers never block on a slow peer: if the queue is full the connection
/// is destroyed instead, on the grounds that back-pressure must not reach a
/// module's event loop. An empty buffer is the graceful-close sentinel; the
/// writer flushes everything queued before it and then closes the socket.
pub struct TcpConn {
    reader: Mutex<BufReader<OwnedReadHalf>>,
    write: StdMutex<WriteState>,
    /// Force-close now: the writer aborts mid-queue and resets the socket.
    kill: CancellationToken,
    /// Cancelled by the writer once the socket is gone; readers observe it.
    done: CancellationToken,
    codec: FrameCodec,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl TcpConn {
    /// Wrap an established stream. `pending_write_num` bounds the write
    /// queue; the writer task starts immediately.
    pub fn new(stream: TcpStream, pending_write_num: usize, codec: FrameCodec) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let local_addr = stream.local_addr().ok();
        let (r, w) = stream.into_split();
        let (tx, rx) = mpsc::channel(pending_write_num.max(1));

        let conn = Arc::new(Self {
            reader: Mutex::new(BufReader::new(r)),
            write: StdMutex::new(WriteState { closed: false, tx }),
            kill: CancellationToken::new(),
            done: CancellationToken::new(),
            codec,
            peer_addr,
            local_addr,
        });

        tokio::spawn(write_loop(
            w,
            rx,
            conn.kill.clone(),
            conn.done.clone(),
        ));

        conn
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.write.lock().expect("write state poisoned").closed
    }

    /// Queue `b` for sending. A no-op once closed or for empty buffers. If
    /// the queue is at capacity the connection is destroyed and `b` is
    /// dropped.
    pub fn write(&self, b: Bytes) {
        let mut st = self.write.lock().expect("write state poisoned");
        if st.closed || b.is_empty() {
            return;
        }
        match st.tx.try_send(b) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                debug!("close conn: write queue full");
                st.closed = true;
                self.kill.cancel();
            },
            Err(TrySendError::Closed(_)) => st.closed = true,
        }
    }

    /// Graceful close: everything already queued is still written, then the
    /// socket closes. Closing twice is a no-op.
    pub fn close(&self) {
        let mut st = self.write.lock().expect("write state poisoned");
        if st.closed {
            return;
        }
        st.closed = true;
        if st.tx.try_send(Bytes::new()).is_err() {
            self.kill.cancel();
        }
    }

    /// Immediate forced close: queued buffers are dropped and the socket is
    /// reset rather than lingering.
    pub fn destroy(&self) {
        let mut st = self.write.lock().expect("write state poisoned");
        if st.closed {
            return;
        }
        st.closed = true;
        self.kill.cancel();
    }

    /// Read one framed message.
    pub async fn read_msg(&self) -> Result<Bytes, FrameError> {
        let mut r = self.reader.lock().await;
        tokio::select! {
            _ = self.done.cancelled() => Err(FrameError::Io(closed_err())),
            res = self.codec.read(&mut *r) => res,
        }
    }

    /// Frame `parts` and queue the result.
    pub fn write_msg(&self, parts: &[Bytes]) -> Result<(), FrameError> {
        let framed = self.codec.encode(parts)?;
        self.write(framed);
        Ok(())
    }

    /// Raw read pass-through, for agents that frame their own input.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;

        let mut r = self.reader.lock().await;
        tokio::select! {
            _ = self.done.cancelled() => Err(closed_err()),
            res = r.read(buf) => res,
        }
    }

    /// Read one `\n`-terminated line, for line-oriented agents such as the
    /// console. Returns the number of bytes read, 0 at EOF.
    pub async fn read_line(&self, buf: &mut String) -> io::Result<usize> {
        let mut r = self.reader.lock().await;
        tokio::select! {
            _ = self.done.cancelled() => Err(closed_err()),
            res = r.read_line(buf) => res,
        }
    }
}

fn closed_err() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "connection closed")
}

async fn write_loop(
    mut w: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    kill: CancellationToken,
    done: CancellationToken,
) {
    loop {
        let b = tokio::select! {
            _ = kill.cancelled() => None,
            b = rx.recv() => b,
        };
        // None covers the kill token, a dropped connection and the closed
        // queue alike; an empty buffer is the graceful-close sentinel.
        let Some(b) = b else { break };
        if b.is_empty() {
            break;
        }

        let ok = tokio::select! {
            _ = kill.cancelled() => false,
            res = w.write_all(&b) => res.is_ok(),
        };
        if !ok {
            break;
        }
    }

    if kill.is_cancelled() {
        // Reset instead of lingering on data the peer never drained.
        let _ = w.as_ref().set_linger(Some(Duration::ZERO));
    }
    drop(w);
    done.cancel();
}
