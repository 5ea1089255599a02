// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

mod common;
use common::{Error, Server};

#[test]
fn test_broker_serves_a_subscriber_and_a_publisher_concurrently() -> Result<(), Error> {
    let mut broker = Server::start("mqttsuite-broker", &["--bind", "127.0.0.1:18981"])?;
    sleep(Duration::from_millis(500));

    let mut subscriber = Server::start(
        "mqtt-sub",
        &["--host", "127.0.0.1", "--port", "18981", "--client-id", "tester-sub", "--topic", "tests/multi/#"],
    )?;
    sleep(Duration::from_millis(500));

    let status = Command::new("../target/release/mqtt-pub")
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            "18981",
            "--client-id",
            "tester-pub",
            "--topic",
            "tests/multi/one",
            "--message",
            "concurrent",
        ])
        .status()?;
    assert!(status.success());

    subscriber.terminate()?;
    broker.terminate()?;
    Ok(())
}
