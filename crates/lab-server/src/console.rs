//! Interactive operator console.
//!
//! Reads commands from stdin while the server runs. Commands operate on
//! the same registry and measurement holder as the RPC surface, so an
//! operator and remote clients always see the same state. EOF or `exit`
//! ends the console, which the daemon treats as a shutdown request.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::measurement::{LoopState, Measurements};
use crate::registry::DeviceRegistry;

/// What the console loop should do after one command.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Reply(String),
    Exit,
}

const HELP: &str = "commands:
  list                 registered devices
  del <name>           remove a device
  restart <name>...    restart one or more devices
  restart_all          restart every device
  measure              show the current measurement
  start | stop         control the current measurement
  exit                 shut the server down";

/// Run the console until EOF or `exit`.
pub async fn run(registry: Arc<DeviceRegistry>, measurements: Arc<Measurements>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match dispatch(&line, &registry, &measurements).await {
                Outcome::Reply(reply) => {
                    if !reply.is_empty() {
                        println!("{reply}");
                    }
                }
                Outcome::Exit => break,
            },
            Ok(None) => {
                debug!("console stdin closed");
                break;
            }
            Err(err) => {
                debug!(%err, "console read failed");
                break;
            }
        }
    }
}

async fn dispatch(
    line: &str,
    registry: &Arc<DeviceRegistry>,
    measurements: &Arc<Measurements>,
) -> Outcome {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Outcome::Reply(String::new());
    };
    let args: Vec<&str> = words.collect();
    match (command, args.as_slice()) {
        ("help", _) => Outcome::Reply(HELP.to_string()),
        ("exit", _) | ("quit", _) => Outcome::Exit,
        ("list", _) => {
            let specs = registry.list().await;
            if specs.is_empty() {
                return Outcome::Reply("no devices registered".to_string());
            }
            let lines: Vec<String> = specs
                .iter()
                .map(|s| format!("{}  [{}]", s.name, s.driver_type))
                .collect();
            Outcome::Reply(lines.join("\n"))
        }
        ("del", [name]) => match registry.remove(name).await {
            Ok(()) => Outcome::Reply(format!("removed {name}")),
            Err(err) => Outcome::Reply(format!("error: {err}")),
        },
        ("del", _) => Outcome::Reply("usage: del <name>".to_string()),
        ("restart", []) => Outcome::Reply("usage: restart <name>...".to_string()),
        ("restart", names) => {
            let mut replies = Vec::new();
            for name in names {
                match registry.restart(name).await {
                    Ok(()) => replies.push(format!("restarted {name}")),
                    Err(err) => replies.push(format!("error: {err}")),
                }
            }
            Outcome::Reply(replies.join("\n"))
        }
        ("restart_all", _) => {
            let mut replies = Vec::new();
            for name in registry.names().await {
                match registry.restart(&name).await {
                    Ok(()) => replies.push(format!("restarted {name}")),
                    Err(err) => replies.push(format!("error: {err}")),
                }
            }
            if replies.is_empty() {
                replies.push("no devices registered".to_string());
            }
            Outcome::Reply(replies.join("\n"))
        }
        ("measure", _) => match measurements.current().await {
            Some(m) => Outcome::Reply(format!(
                "{}  devices={:?}  running={}  ticks={}",
                m.name(),
                m.devices(),
                m.state().await == LoopState::Running,
                m.ticks()
            )),
            None => Outcome::Reply("no measurement prepared".to_string()),
        },
        ("start", _) => match measurements.current().await {
            Some(m) => {
                if m.start().await {
                    Outcome::Reply(format!("started {}", m.name()))
                } else {
                    Outcome::Reply(format!("{} already running", m.name()))
                }
            }
            None => Outcome::Reply("no measurement prepared".to_string()),
        },
        ("stop", _) => match measurements.current().await {
            Some(m) => {
                if m.stop().await {
                    Outcome::Reply(format!("stopped {}", m.name()))
                } else {
                    Outcome::Reply(format!("{} not running", m.name()))
                }
            }
            None => Outcome::Reply("no measurement prepared".to_string()),
        },
        _ => Outcome::Reply(format!("unknown command '{command}', try help")),
    }
}
