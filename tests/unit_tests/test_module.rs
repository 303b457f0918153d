// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use frond::module::{App, Module};
use tokio_util::sync::CancellationToken;

type EventLog = Arc<Mutex<Vec<String>>>;

struct Probe {
    tag: &'static str,
    log: EventLog,
}

impl Probe {
    fn push(&self, what: &str) {
        self.log.lock().unwrap().push(format!("{} {}", what, self.tag));
    }
}

#[async_trait]
impl Module for Probe {
    fn on_init(&mut self) {
        self.push("init");
    }

    async fn run(&mut self, close: CancellationToken) {
        close.cancelled().await;
        self.push("run-done");
    }

    fn on_destroy(&mut self) {
        self.push("destroy");
    }
}

#[tokio::test]
async fn init_in_order_destroy_in_reverse() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut app = App::new();
    for tag in ["a", "b", "c"] {
        app.register(
            tag,
            Box::new(Probe {
                tag,
                log: log.clone(),
            }),
        );
    }

    app.init();
    app.destroy().await;

    let events = log.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            "init a",
            "init b",
            "init c",
            "run-done c",
            "destroy c",
            "run-done b",
            "destroy b",
            "run-done a",
            "destroy a",
        ]
    );
}

struct Grenade;

#[async_trait]
impl Module for Grenade {
    async fn run(&mut self, close: CancellationToken) {
        close.cancelled().await;
    }

    fn on_destroy(&mut self) {
        panic!("destroy hook exploded");
    }
}

#[tokio::test]
async fn panicking_destroy_hook_does_not_stop_teardown() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut app = App::new();
    app.register(
        "first",
        Box::new(Probe {
            tag: "first",
            log: log.clone(),
        }),
    );
    app.register("grenade", Box::new(Grenade));

    app.init();
    app.destroy().await;

    let events = log.lock().unwrap().clone();
    assert!(events.contains(&"destroy first".to_string()));
}
