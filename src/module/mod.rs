// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::guard;

/// Serial event loop pre-wired over RPC, tasks and timers.
pub mod skeleton;

pub use skeleton::{Skeleton, SkeletonBuilder};

/// An application module: a unit of state owned by exactly one task.
///
/// `on_init` runs on the registering task before any module task starts;
/// `run` is the module's whole life and must return promptly once `close`
/// is cancelled; `on_destroy` runs after `run` has returned.
#[async_trait]
pub trait Module: Send {
    fn on_init(&mut self) {}

    async fn run(&mut self, close: CancellationToken);

    fn on_destroy(&mut self) {}
}

struct Registered {
    name: &'static str,
    module: Option<Box<dyn Module>>,
    close: CancellationToken,
    task: Option<JoinHandle<Box<dyn Module>>>,
}

/// Ordered module registry: init in registration order, destroy in reverse.
///
/// Later-registered modules may depend on earlier ones, so teardown walks
/// the list backwards and fully stops each module (close signal, then join)
/// before touching the one before it.
#[derive(Default)]
pub struct App {
    mods: Vec<Registered>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module. Call before [`App::init`].
    pub fn register(&mut self, name: &'static str, module: Box<dyn Module>) {
        self.mods.push(Registered {
            name,
            module: Some(module),
            close: CancellationToken::new(),
            task: None,
        });
    }

    /// Initialise every module in registration order, then start each one
    /// on its own task.
    pub fn init(&mut self) {
        for m in &mut self.mods {
            if let Some(module) = m.module.as_mut() {
                module.on_init();
            }
        }

        for m in &mut self.mods {
            let Some(mut module) = m.module.take() else {
                continue;
            };
            let close = m.close.clone();
            m.task = Some(tokio::spawn(async move {
                module.run(close).await;
                module
            }));
        }
    }

    /// Stop every module in reverse registration order: signal close, wait
    /// for its `run` to return, then call `on_destroy`.
    pub async fn destroy(&mut self) {
        for m in self.mods.iter_mut().rev() {
            m.close.cancel();
            let Some(task) = m.task.take() else {
                continue;
            };
            match task.await {
                Ok(mut module) => {
                    let name = m.name;
                    let _ = guard::catch(&format_args!("destroy {name}"), || {
                        module.on_destroy()
                    });
                    info!("module {name} stopped");
                },
                Err(e) => error!("module {} task failed: {e}", m.name),
            }
        }
        self.mods.clear();
    }
}
