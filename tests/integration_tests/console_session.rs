// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use async_trait::async_trait;
use frond::{
    chanrpc::{Arg, Function},
    console::Console,
    module::{App, Module, Skeleton, SkeletonBuilder},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

const CONSOLE_PORT: u16 = 35632;

struct Backend {
    skeleton: Skeleton<u64>,
    state: u64,
}

#[async_trait]
impl Module for Backend {
    async fn run(&mut self, close: CancellationToken) {
        self.skeleton.run(&mut self.state, close).await;
    }
}

async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
    let mut collected = String::new();
    let deadline = Duration::from_secs(3);
    timeout(deadline, async {
        let mut buf = [0u8; 512];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "console hung up while waiting for {needle:?}");
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
            if collected.contains(needle) {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}, got {collected:?}"));
    collected
}

#[tokio::test]
async fn console_serves_help_and_user_commands() {
    let mut skeleton = SkeletonBuilder::default().build::<u64>();
    skeleton.register_command(
        "uptime",
        Function::one_ret(|ticks: &mut u64, _args| {
            *ticks += 1;
            Box::new(format!("{ticks} ticks")) as Arg
        }),
    );

    let console = Console::new(CONSOLE_PORT, "# ").command(
        "uptime",
        "server tick counter",
        skeleton.command_sender(),
    );

    let backend = Backend { skeleton, state: 0 };

    let mut app = App::new();
    app.register("backend", Box::new(backend));
    app.register("console", Box::new(console));
    app.init();
    sleep(Duration::from_millis(150)).await;

    let mut stream = TcpStream::connect(("localhost", CONSOLE_PORT)).await.unwrap();
    read_until(&mut stream, "# ").await;

    stream.write_all(b"help\n").await.unwrap();
    let help = read_until(&mut stream, "quit - exit console").await;
    assert!(help.contains("uptime - server tick counter"));
    assert!(help.contains("help - this help text"));

    stream.write_all(b"uptime\n").await.unwrap();
    read_until(&mut stream, "1 ticks").await;

    stream.write_all(b"nosuch\n").await.unwrap();
    read_until(&mut stream, "command not found").await;

    // Blank lines are ignored, quit hangs up.
    stream.write_all(b"\n").await.unwrap();
    stream.write_all(b"quit\n").await.unwrap();

    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(3), async {
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break 0,
                Ok(_) => continue, // drain trailing prompt bytes
            }
        }
    })
    .await
    .expect("quit did not close the session");
    assert_eq!(n, 0);

    app.destroy().await;
}
