// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use frond::{
    chanrpc::{Arg, Args, Function},
    module::{Skeleton, SkeletonBuilder},
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

type Log = Vec<String>;

fn new_skeleton() -> Skeleton<Log> {
    let mut skeleton = SkeletonBuilder::default().build::<Log>();
    skeleton.register(
        "append",
        Function::no_ret(|s: &mut Log, args: Args| {
            let text = args[0].downcast_ref::<String>().unwrap();
            s.push(text.clone());
        }),
    );
    skeleton.register(
        "count",
        Function::one_ret(|s: &mut Log, _args| Box::new(s.len()) as Arg),
    );
    skeleton
}

#[tokio::test]
async fn serial_loop_multiplexes_rpc_tasks_and_timers() {
    let mut skeleton = new_skeleton();
    let sender = skeleton.sender();

    skeleton.after_func(Duration::from_millis(30), |s: &mut Log| {
        s.push("timer".to_string());
    });
    skeleton.go(
        || 7,
        |s: &mut Log, r| s.push(format!("task {}", r.unwrap())),
    );

    let close = CancellationToken::new();
    let cl = close.clone();
    let owner = tokio::spawn(async move {
        let mut state = Log::new();
        skeleton.run(&mut state, cl).await;
        state
    });

    let mut client = sender.open(4);
    client
        .call0("append", vec![Box::new("hello".to_string()) as Arg])
        .await
        .unwrap();
    let n = client.call1("count", vec![]).await.unwrap();
    assert!(*n.downcast_ref::<usize>().unwrap() >= 1);

    sleep(Duration::from_millis(200)).await;
    close.cancel();
    let state = owner.await.unwrap();

    assert!(state.contains(&"hello".to_string()));
    assert!(state.contains(&"timer".to_string()));
    assert!(state.contains(&"task 7".to_string()));
}

#[tokio::test]
async fn command_server_answers_through_its_own_queue() {
    let mut skeleton = SkeletonBuilder::default().build::<Log>();
    skeleton.register_command(
        "ping",
        Function::one_ret(|_s, _args| Box::new("pong".to_string()) as Arg),
    );
    let commands = skeleton.command_sender();

    let close = CancellationToken::new();
    let cl = close.clone();
    let owner = tokio::spawn(async move {
        let mut state = Log::new();
        skeleton.run(&mut state, cl).await;
        state
    });

    let mut client = commands.open(1);
    let ret = client.call1("ping", vec![]).await.unwrap();
    assert_eq!(ret.downcast_ref::<String>(), Some(&"pong".to_string()));

    close.cancel();
    owner.await.unwrap();
}

#[tokio::test]
async fn close_drains_outstanding_task_callbacks() {
    let skeleton = new_skeleton();
    skeleton.go(
        || {
            std::thread::sleep(Duration::from_millis(150));
            "slow"
        },
        |s: &mut Log, r| s.push(format!("drained {}", r.unwrap())),
    );

    let close = CancellationToken::new();
    let cl = close.clone();
    let mut skeleton = skeleton;
    let owner = tokio::spawn(async move {
        let mut state = Log::new();
        skeleton.run(&mut state, cl).await;
        state
    });

    // Close immediately: the in-flight task must still settle before the
    // loop returns.
    close.cancel();
    let state = owner.await.unwrap();
    assert_eq!(state, vec!["drained slow"]);
}

#[tokio::test]
async fn linear_submissions_keep_order_under_the_loop() {
    let skeleton = new_skeleton();
    let ctx = skeleton.linear_context();
    for i in 0..4 {
        ctx.go(
            move || {
                if i == 0 {
                    std::thread::sleep(Duration::from_millis(100));
                }
                i
            },
            |s: &mut Log, r| s.push(r.unwrap().to_string()),
        );
    }

    let close = CancellationToken::new();
    let cl = close.clone();
    let mut skeleton = skeleton;
    let owner = tokio::spawn(async move {
        let mut state = Log::new();
        skeleton.run(&mut state, cl).await;
        state
    });

    sleep(Duration::from_millis(400)).await;
    close.cancel();
    let state = owner.await.unwrap();
    assert_eq!(state, vec!["0", "1", "2", "3"]);
}
