// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    any::Any,
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    chanrpc::{Arg, CallSender},
    codec::{Processor, UserData},
    module::Module,
    net::{ConnAgent, FrameCodec, TcpConn, TcpServer},
};

/// Per-connection behavioural object handed to message handlers as the
/// call's user data.
///
/// Cheap to clone through its `Arc`; safe to stash inside module state for
/// writing to the client later.
pub struct Agent {
    conn: Arc<TcpConn>,
    processor: Arc<dyn Processor>,
    user_data: StdMutex<Option<UserData>>,
}

impl Agent {
    /// Encode `msg` with the gate's processor and queue it on the
    /// connection. Failures are logged, not returned: by the time a handler
    /// answers, the peer may legitimately be gone.
    pub fn write_msg(&self, msg: &dyn Any) {
        match self.processor.marshal(msg) {
            Ok(parts) => {
                if let Err(e) = self.conn.write_msg(&parts) {
                    error!("write message error: {e}");
                }
            },
            Err(e) => error!("marshal message error: {e}"),
        }
    }

    /// Close the underlying connection gracefully.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn user_data(&self) -> Option<UserData> {
        self.user_data.lock().expect("user data poisoned").clone()
    }

    pub fn set_user_data(&self, data: UserData) {
        *self.user_data.lock().expect("user data poisoned") = Some(data);
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.conn.peer_addr()
    }
}

/// Recover the [`Agent`] from a routed call's user-data argument.
pub fn agent_arg(arg: &Arg) -> Option<Arc<Agent>> {
    arg.downcast_ref::<UserData>()
        .and_then(|ud| ud.clone().downcast::<Agent>().ok())
}

/// The gate module: a framed TCP server whose connections unmarshal and
/// route messages through a processor.
///
/// When `agent_rpc` is wired, the owning game module is told about every
/// connection: `NewAgent` (fire-and-forget) on accept and `CloseAgent`
/// (synchronous, so the module settles the player before the slot is
/// reused) on disconnect.
pub struct Gate {
    pub addr: String,
    pub max_conn_num: usize,
    pub pending_write_num: usize,
    pub codec: FrameCodec,
    pub processor: Arc<dyn Processor>,
    pub agent_rpc: Option<CallSender>,
}

#[async_trait]
impl Module for Gate {
    async fn run(&mut self, close: CancellationToken) {
        let server = TcpServer::new(
            self.addr.clone(),
            self.max_conn_num,
            self.pending_write_num,
            self.codec,
        );

        let processor = self.processor.clone();
        let agent_rpc = self.agent_rpc.clone();
        let factory = move |conn: Arc<TcpConn>| -> Box<dyn ConnAgent> {
            let agent = Arc::new(Agent {
                conn,
                processor: processor.clone(),
                user_data: StdMutex::new(None),
            });

            if let Some(rpc) = &agent_rpc {
                let ud: UserData = agent.clone();
                rpc.go("NewAgent", vec![Box::new(ud) as Arg]);
            }

            Box::new(GateConnAgent {
                agent,
                agent_rpc: agent_rpc.clone(),
            })
        };

        if let Err(e) = server.start(Arc::new(factory)).await {
            error!("gate listen failed: {e}");
            return;
        }

        close.cancelled().await;
        server.close().await;
    }
}

struct GateConnAgent {
    agent: Arc<Agent>,
    agent_rpc: Option<CallSender>,
}

#[async_trait]
impl ConnAgent for GateConnAgent {
    async fn run(&mut self) {
        loop {
            let data = match self.agent.conn.read_msg().await {
                Ok(d) => d,
                Err(e) => {
                    debug!("read message error: {e}");
                    break;
                },
            };

            let msg = match self.agent.processor.unmarshal(&data) {
                Ok(m) => m,
                Err(e) => {
                    debug!("unmarshal message error: {e}");
                    break;
                },
            };

            let ud: UserData = self.agent.clone();
            if let Err(e) = self.agent.processor.route(msg, ud) {
                debug!("route message error: {e}");
                break;
            }
        }
    }

    async fn on_close(&mut self) {
        if let Some(rpc) = &self.agent_rpc {
            let ud: UserData = self.agent.clone();
            let mut client = rpc.open(1);
            if let Err(e) = client.call0("CloseAgent", vec![Box::new(ud) as Arg]).await {
                error!("chanrpc error: {e}");
            }
        }
    }
}
