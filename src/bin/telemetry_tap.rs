// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Subscribe to a running backend and print every telemetry frame.
//!
//! Useful for checking the wire framing and watching the channels without
//! an operator client. Frames are length-prefixed JSON; this tool reads the
//! 4-byte big-endian prefix, then the body, and prints a one-line summary
//! per frame.

use clap::Parser;
use std::error::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use aqua_regulator::telemetry::TelemetryFrame;

/// Frame tap for the telemetry publisher
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Publisher address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Publisher port
    #[clap(long, default_value = "5555")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let target = format!("{}:{}", args.address, args.port);
    println!("Connecting to telemetry publisher at {target}");

    let mut stream = TcpStream::connect(&target).await?;

    loop {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await?;
        let body_len = u32::from_be_bytes(header) as usize;

        let mut body = vec![0u8; body_len];
        stream.read_exact(&mut body).await?;

        let frame: TelemetryFrame = serde_json::from_slice(&body)?;
        println!(
            "{} snapshot={} {} readings ({})",
            frame.channel.name(),
            frame.snapshot,
            frame.readings.len(),
            frame.correlation_id
        );
    }
}
