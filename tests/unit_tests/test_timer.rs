// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use frond::timer::Dispatcher;
use tokio::time::{sleep, timeout};

type Log = Vec<&'static str>;

#[tokio::test]
async fn timer_fires_once() {
    let mut disp: Dispatcher<Log> = Dispatcher::new(8);
    let mut state = Log::new();

    let _t = disp.after_func(Duration::from_millis(20), |s| s.push("fired"));

    let timer = timeout(Duration::from_secs(1), disp.recv())
        .await
        .expect("timer never fired")
        .unwrap();
    timer.fire(&mut state);
    assert_eq!(state, vec!["fired"]);
}

#[tokio::test]
async fn stop_prevents_delivery() {
    let mut disp: Dispatcher<Log> = Dispatcher::new(8);
    let mut state = Log::new();

    let t = disp.after_func(Duration::from_millis(50), |s| s.push("fired"));
    t.stop();
    t.stop(); // stopping twice is a no-op

    // Whether or not the clock task already published, the callback is gone.
    if let Ok(Some(timer)) = timeout(Duration::from_millis(200), disp.recv()).await {
        timer.fire(&mut state);
    }
    assert!(state.is_empty());
}

#[tokio::test]
async fn stop_after_publish_is_a_no_op_fire() {
    let mut disp: Dispatcher<Log> = Dispatcher::new(8);
    let mut state = Log::new();

    let t = disp.after_func(Duration::from_millis(10), |s| s.push("fired"));
    // Let the clock publish the timer into the fire channel first.
    sleep(Duration::from_millis(100)).await;
    t.stop();

    let timer = timeout(Duration::from_secs(1), disp.recv())
        .await
        .expect("timer object should have been published")
        .unwrap();
    timer.fire(&mut state);
    assert!(state.is_empty());
}

#[tokio::test]
async fn panicking_timer_callback_is_contained() {
    let mut disp: Dispatcher<Log> = Dispatcher::new(8);
    let mut state = Log::new();

    let _t = disp.after_func(Duration::from_millis(10), |_s| panic!("timer cb died"));
    let _u = disp.after_func(Duration::from_millis(30), |s| s.push("second"));

    for _ in 0..2 {
        let timer = timeout(Duration::from_secs(1), disp.recv())
            .await
            .expect("timer never fired")
            .unwrap();
        timer.fire(&mut state);
    }
    assert_eq!(state, vec!["second"]);
}

#[tokio::test]
async fn cron_fires_and_stops() {
    let mut disp: Dispatcher<Log> = Dispatcher::new(8);
    let mut state = Log::new();

    // Every second, seconds field enabled.
    let cron = disp
        .cron_func("* * * * * *", |s| s.push("tick"))
        .expect("valid cron");

    let timer = timeout(Duration::from_secs(3), disp.recv())
        .await
        .expect("cron never fired")
        .unwrap();
    timer.fire(&mut state);
    assert_eq!(state, vec!["tick"]);

    cron.stop();
    // The re-arm from the first fire is disarmed by stop; a published timer
    // object may still surface, but it must not run the callback.
    if let Ok(Some(timer)) = timeout(Duration::from_millis(1500), disp.recv()).await {
        timer.fire(&mut state);
    }
    assert_eq!(state, vec!["tick"]);
}

#[tokio::test]
async fn cron_callback_may_stop_its_own_cron() {
    let mut disp: Dispatcher<Vec<&'static str>> = Dispatcher::new(8);
    let mut state = Vec::new();

    let cron = disp
        .cron_func("* * * * * *", |s: &mut Vec<&'static str>| s.push("tick"))
        .expect("valid cron");

    let timer = timeout(Duration::from_secs(3), disp.recv())
        .await
        .expect("cron never fired")
        .unwrap();
    // Stop from within the fire turn: the re-arm already happened, but the
    // stop disarms it before it can deliver.
    timer.fire(&mut state);
    cron.stop();

    if let Ok(Some(timer)) = timeout(Duration::from_millis(1500), disp.recv()).await {
        timer.fire(&mut state);
    }
    assert_eq!(state, vec!["tick"]);
}

#[tokio::test]
async fn invalid_cron_is_rejected() {
    let disp: Dispatcher<Log> = Dispatcher::new(8);
    assert!(disp.cron_func("not a cron", |_s| {}).is_err());
    assert!(disp.cron_func("* * * *", |_s| {}).is_err());
}
