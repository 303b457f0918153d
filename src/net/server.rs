// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use tokio::net::TcpListener;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info};

use crate::net::{conn::TcpConn, frame::FrameCodec};

/// Per-connection behaviour driven by the server: `run` is the connection's
/// whole read life, `on_close` runs after it returns and before the
/// connection is forgotten.
#[async_trait]
pub trait ConnAgent: Send {
    async fn run(&mut self);

    async fn on_close(&mut self) {}
}

/// Factory producing an agent for each accepted connection.
pub type AgentFactory = Arc<dyn Fn(Arc<TcpConn>) -> Box<dyn ConnAgent> + Send + Sync>;

type ConnSet = Arc<StdMutex<HashMap<u64, Arc<TcpConn>>>>;

/// Accepting TCP server.
///
/// Accepted sockets above `max_conn_num` are closed on the spot. Each kept
/// connection gets an agent from the factory and a task that runs it to
/// completion; `close` stops accepting, force-closes every live connection
/// and waits for all agent tasks to finish their cleanup.
pub struct TcpServer {
    addr: String,
    max_conn_num: usize,
    pending_write_num: usize,
    codec: FrameCodec,
    conns: ConnSet,
    tracker: TaskTracker,
    close: CancellationToken,
    bound: OnceCell<std::net::SocketAddr>,
}

impl TcpServer {
    pub fn new(
        addr: impl Into<String>,
        max_conn_num: usize,
        pending_write_num: usize,
        codec: FrameCodec,
    ) -> Self {
        let max_conn_num = if max_conn_num == 0 {
            info!("invalid max_conn_num, reset to 100");
            100
        } else {
            max_conn_num
        };
        let pending_write_num = if pending_write_num == 0 {
            info!("invalid pending_write_num, reset to 100");
            100
        } else {
            pending_write_num
        };

        Self {
            addr: addr.into(),
            max_conn_num,
            pending_write_num,
            codec,
            conns: Arc::new(StdMutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
            close: CancellationToken::new(),
            bound: OnceCell::new(),
        }
    }

    /// Bind the listener and start the accept loop on its own task.
    /// Returns the bound address (useful when the port was 0).
    pub async fn start(&self, new_agent: AgentFactory) -> io::Result<std::net::SocketAddr> {
        let listener = TcpListener::bind(&self.addr).await?;
        let local = listener.local_addr()?;
        let _ = self.bound.set(local);
        info!("listening on {local}");

        tokio::spawn(accept_loop(
            listener,
            self.max_conn_num,
            self.pending_write_num,
            self.codec,
            self.conns.clone(),
            self.tracker.clone(),
            self.close.clone(),
            new_agent,
        ));
        Ok(local)
    }

    /// The address the listener actually bound, once started.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.bound.get().copied()
    }

    /// Live connection count.
    pub fn conn_count(&self) -> usize {
        self.conns.lock().expect("conn set poisoned").len()
    }

    /// Stop accepting, tear down every live connection and wait for all
    /// per-connection tasks to run their cleanup.
    pub async fn close(&self) {
        self.close.cancel();

        let live: Vec<Arc<TcpConn>> = {
            let mut conns = self.conns.lock().expect("conn set poisoned");
            conns.drain().map(|(_, c)| c).collect()
        };
        for conn in live {
            conn.destroy();
        }

        self.tracker.close();
        self.tracker.wait().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    listener: TcpListener,
    max_conn_num: usize,
    pending_write_num: usize,
    codec: FrameCodec,
    conns: ConnSet,
    tracker: TaskTracker,
    close: CancellationToken,
    new_agent: AgentFactory,
) {
    let mut next_id: u64 = 0;
    loop {
        let socket = tokio::select! {
            _ = close.cancelled() => return,
            res = listener.accept() => match res {
                Ok((socket, _)) => socket,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                },
            },
        };

        let conn = {
            let mut set = conns.lock().expect("conn set poisoned");
            if set.len() >= max_conn_num {
                debug!("too many connections");
                drop(socket);
                continue;
            }
            let conn = TcpConn::new(socket, pending_write_num, codec);
            next_id += 1;
            set.insert(next_id, conn.clone());
            conn
        };

        let mut agent = new_agent(conn.clone());
        let conns = conns.clone();
        let id = next_id;
        tracker.spawn(async move {
            agent.run().await;
            conn.close();
            conns.lock().expect("conn set poisoned").remove(&id);
            agent.on_close().await;
        });
    }
}
