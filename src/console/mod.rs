// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    chanrpc::{Arg, Args, CallSender},
    module::Module,
    net::{ConnAgent, FrameCodec, TcpConn, TcpServer},
};

/// A user command: dispatched through the owning module's command-RPC
/// server as `call1(name, args…) -> String`.
struct Command {
    name: String,
    help: String,
    server: CallSender,
}

impl Command {
    async fn run(&self, args: &[&str]) -> String {
        let call_args: Args = args
            .iter()
            .map(|a| Box::new((*a).to_string()) as Arg)
            .collect();

        let mut client = self.server.open(1);
        match client.call1(self.name.clone(), call_args).await {
            Err(e) => e.to_string(),
            Ok(ret) => match ret.downcast::<String>() {
                Ok(s) => *s,
                Err(_) => "invalid output type".to_string(),
            },
        }
    }
}

/// Line-oriented TCP console.
///
/// Commands are `name arg1 … argn`, one per line. `help` and `quit` are
/// built in; everything else must be registered before the console module
/// starts. A port of 0 disables the console entirely.
pub struct Console {
    port: u16,
    prompt: String,
    commands: Vec<Command>,
}

impl Console {
    pub fn new(port: u16, prompt: impl Into<String>) -> Self {
        Self {
            port,
            prompt: prompt.into(),
            commands: Vec::new(),
        }
    }

    /// Register a command backed by a module's command-RPC server. The
    /// handler must already be bound under `name` on that server.
    ///
    /// Panics on duplicate names (including the built-ins): command wiring
    /// is startup code.
    pub fn command(
        mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        server: CallSender,
    ) -> Self {
        let name = name.into();
        if name == "help" || name == "quit" || self.commands.iter().any(|c| c.name == name) {
            panic!("command {name} is already registered");
        }
        self.commands.push(Command {
            name,
            help: help.into(),
            server,
        });
        self
    }
}

#[async_trait]
impl Module for Console {
    async fn run(&mut self, close: CancellationToken) {
        if self.port == 0 {
            close.cancelled().await;
            return;
        }

        let server = TcpServer::new(
            format!("localhost:{}", self.port),
            usize::MAX,
            100,
            FrameCodec::default(),
        );

        let commands = Arc::new(std::mem::take(&mut self.commands));
        let prompt = self.prompt.clone();
        let factory = move |conn: Arc<TcpConn>| -> Box<dyn ConnAgent> {
            Box::new(ConsoleAgent {
                conn,
                commands: commands.clone(),
                prompt: prompt.clone(),
            })
        };

        if let Err(e) = server.start(Arc::new(factory)).await {
            error!("console listen failed: {e}");
            return;
        }

        close.cancelled().await;
        server.close().await;
    }
}

struct ConsoleAgent {
    conn: Arc<TcpConn>,
    commands: Arc<Vec<Command>>,
    prompt: String,
}

#[async_trait]
impl ConnAgent for ConsoleAgent {
    async fn run(&mut self) {
        loop {
            if !self.prompt.is_empty() {
                self.conn.write(Bytes::from(self.prompt.clone()));
            }

            let mut line = String::new();
            match self.conn.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {},
            }
            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            let args: Vec<&str> = line.split_whitespace().collect();
            let Some(&name) = args.first() else { continue };
            if name == "quit" {
                break;
            }

            let output = if name == "help" {
                self.help_text()
            } else {
                match self.commands.iter().find(|c| c.name == name) {
                    Some(c) => c.run(&args[1..]).await,
                    None => "command not found, try `help` for help".to_string(),
                }
            };
            if !output.is_empty() {
                self.conn.write(Bytes::from(output + "\r\n"));
            }
        }
    }
}

impl ConsoleAgent {
    fn help_text(&self) -> String {
        let mut out = String::from("Commands:\r\n");
        for c in self.commands.iter() {
            out.push_str(&c.name);
            out.push_str(" - ");
            out.push_str(&c.help);
            out.push_str("\r\n");
        }
        out.push_str("help - this help text\r\n");
        out.push_str("quit - exit console");
        out
    }
}
