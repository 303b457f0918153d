// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use frond::task::{TaskEngine, TaskError};

type Log = Vec<String>;

async fn drain(engine: &mut TaskEngine<Log>, state: &mut Log, n: usize) {
    for _ in 0..n {
        let cb = engine.recv().await.unwrap();
        engine.run_cb(state, cb);
    }
}

#[tokio::test]
async fn default_engine_completes_out_of_order() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(8);
    let mut state = Log::new();

    engine.go(
        || {
            std::thread::sleep(Duration::from_millis(300));
            "1"
        },
        |s, r| s.push(r.unwrap().to_string()),
    );
    engine.go(|| "2", |s, r| s.push(r.unwrap().to_string()));

    drain(&mut engine, &mut state, 2).await;
    assert_eq!(state, vec!["2", "1"]);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn linear_context_preserves_submission_order() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(8);
    let ctx = engine.linear_context();
    let mut state = Log::new();

    ctx.go(
        || {
            std::thread::sleep(Duration::from_millis(300));
            "1"
        },
        |s, r| s.push(r.unwrap().to_string()),
    );
    ctx.go(|| "2", |s, r| s.push(r.unwrap().to_string()));

    drain(&mut engine, &mut state, 2).await;
    assert_eq!(state, vec!["1", "2"]);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn close_drains_every_pending_callback() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(8);
    let mut state = Log::new();

    for i in 0..3 {
        engine.go(
            move || {
                std::thread::sleep(Duration::from_millis(50));
                i
            },
            |s, r| s.push(format!("done {}", r.unwrap())),
        );
    }
    assert_eq!(engine.pending(), 3);

    engine.close(&mut state).await;
    assert_eq!(engine.pending(), 0);
    assert_eq!(state.len(), 3);
}

#[tokio::test]
async fn panicking_work_still_reaches_its_callback() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(4);
    let mut state = Log::new();

    engine.go(
        || -> u32 { panic!("worker died") },
        |s, r| match r {
            Err(TaskError::Panicked(msg)) => s.push(format!("failed: {msg}")),
            Err(e) => s.push(format!("unexpected: {e}")),
            Ok(_) => s.push("unexpected success".into()),
        },
    );

    drain(&mut engine, &mut state, 1).await;
    assert_eq!(state, vec!["failed: worker died"]);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn panicking_callback_does_not_kill_the_owner() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(4);
    let mut state = Log::new();

    engine.go(|| 1, |_s, _r| panic!("callback died"));
    engine.go(|| 2, |s, r| s.push(format!("ok {}", r.unwrap())));

    engine.close(&mut state).await;
    assert_eq!(state, vec!["ok 2"]);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn linear_callbacks_run_in_submission_order_too() {
    let mut engine: TaskEngine<Log> = TaskEngine::new(8);
    let ctx = engine.linear_context();
    let mut state = Log::new();

    for i in 0..5 {
        ctx.go(move || i, |s, r| s.push(r.unwrap().to_string()));
    }

    drain(&mut engine, &mut state, 5).await;
    assert_eq!(state, vec!["0", "1", "2", "3", "4"]);
}
