//! Line-oriented JSON console on the UART.
//!
//! A reader thread forwards one command object per line to the control loop.
//! A writer thread drains the response channel, one object per line.

use crate::controller::{CommandChannel, ResponseChannel};
use crate::protocol::{parse_command, Response};
use log::{info, warn};
use std::io::{ErrorKind, Read, Write};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const MAX_LINE_LEN: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn spawn(
    commands: &'static CommandChannel,
    responses: &'static ResponseChannel,
) -> anyhow::Result<(JoinHandle<()>, JoinHandle<()>)> {
    let reader = thread::Builder::new()
        .name("serial-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || read_loop(commands, responses))?;
    let writer = thread::Builder::new()
        .name("serial-tx".into())
        .stack_size(8 * 1024)
        .spawn(move || write_loop(responses))?;
    info!("📡 Serial JSON console ready");
    Ok((reader, writer))
}

fn read_loop(commands: &'static CommandChannel, responses: &'static ResponseChannel) {
    let mut stdin = std::io::stdin();
    let mut line: Vec<u8> = Vec::with_capacity(256);
    let mut chunk = [0u8; 64];

    loop {
        let n = match stdin.read(&mut chunk) {
            Ok(0) => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                warn!("Serial read failed: {}", e);
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        for &byte in &chunk[..n] {
            match byte {
                b'\n' | b'\r' => {
                    if !line.is_empty() {
                        dispatch(&line, commands, responses);
                        line.clear();
                    }
                }
                _ if line.len() >= MAX_LINE_LEN => {
                    warn!("Serial line exceeds {} bytes, discarding", MAX_LINE_LEN);
                    line.clear();
                }
                _ => line.push(byte),
            }
        }
    }
}

fn dispatch(line: &[u8], commands: &'static CommandChannel, responses: &'static ResponseChannel) {
    let text = String::from_utf8_lossy(line);
    let reply = match parse_command(&text) {
        Ok(cmd) => {
            if commands.try_send(cmd).is_ok() {
                return;
            }
            warn!("Command queue full, dropping command");
            Response::CommandError {
                reason: "busy".to_string(),
            }
        }
        Err(e) => Response::CommandError { reason: e.reason() },
    };
    if let Err(_) = responses.try_send(reply) {
        warn!("Response channel full, dropping command error");
    }
}

fn write_loop(responses: &'static ResponseChannel) {
    loop {
        let mut wrote = false;
        let mut out = std::io::stdout().lock();
        while let Ok(response) = responses.try_receive() {
            if writeln!(out, "{}", response.to_json()).is_err() {
                warn!("Failed to write response to serial console");
            }
            wrote = true;
        }
        if wrote && out.flush().is_err() {
            warn!("Failed to flush serial console");
        }
        drop(out);
        thread::sleep(POLL_INTERVAL);
    }
}
