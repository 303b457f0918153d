// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use frond::{
    app,
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    chanrpc::{Arg, Args, Function},
    codec::{JsonProcessor, msg_id},
    console::Console,
    gate::{self, Gate},
    module::{App, Module, Skeleton},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Demo wire message: the client says hello, the server greets back.
#[derive(Serialize, Deserialize, Clone, Debug)]
struct Hello {
    name: String,
}

#[derive(Default)]
struct GameState {
    greeted: u64,
}

/// Minimal game-style module: counts greetings and answers each one.
struct Game {
    skeleton: Skeleton<GameState>,
    state: GameState,
}

impl Game {
    fn new(cfg: &Config) -> Self {
        let mut skeleton = cfg.channels.skeleton().build::<GameState>();

        skeleton.register(
            msg_id::<Hello>(),
            Function::no_ret(|state: &mut GameState, mut args: Args| {
                let Some(ud) = args.pop() else { return };
                let Some(msg) = args.pop() else { return };
                let Ok(hello) = msg.downcast::<Hello>() else {
                    return;
                };
                let Some(agent) = gate::agent_arg(&ud) else {
                    return;
                };

                state.greeted += 1;
                agent.write_msg(&Hello {
                    name: format!("hello, {}", hello.name),
                });
            }),
        );

        skeleton.register_command(
            "status",
            Function::one_ret(|state: &mut GameState, _args: Args| {
                Box::new(format!("greeted {} players", state.greeted)) as Arg
            }),
        );

        Self {
            skeleton,
            state: GameState::default(),
        }
    }
}

#[async_trait]
impl Module for Game {
    fn on_init(&mut self) {
        info!("game module ready");
    }

    async fn run(&mut self, close: CancellationToken) {
        self.skeleton.run(&mut self.state, close).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logger("demos/config_logger.yaml")?;

    let cfg = resolve_config_path("demos/config.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    let game = Game::new(&cfg);

    let mut processor = JsonProcessor::new();
    processor.register::<Hello>();
    processor.set_router::<Hello>(game.skeleton.sender());

    let gate = Gate {
        addr: cfg.gate.addr.clone(),
        max_conn_num: cfg.gate.max_conn_num,
        pending_write_num: cfg.gate.pending_write_num,
        codec: cfg.gate.frame.codec()?,
        processor: Arc::new(processor),
        agent_rpc: None,
    };

    let console = Console::new(cfg.console.port, cfg.console.prompt.clone()).command(
        "status",
        "greeting totals",
        game.skeleton.command_sender(),
    );

    let mut app = App::new();
    app.register("game", Box::new(game));
    app.register("gate", Box::new(gate));
    app.register("console", Box::new(console));

    app::serve(&mut app).await
}
