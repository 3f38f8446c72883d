//! Command-line front end - valkey-cli style access through sentinels
//!
//! Runs one command given on the command line, an interactive REPL, or a
//! watch loop that prints client events as failovers happen.

use std::fmt::Write as _;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::sentinel::{ClientEvent, SentinelClient};
use crate::utils::RespValue;

/// Run a single command and print its reply
pub async fn run_cli_command(client: &SentinelClient, command_args: &[String]) -> anyhow::Result<()> {
    let response = client
        .command(command_args)
        .await
        .map_err(|e| anyhow::anyhow!("Command failed: {}", e))?;
    print!("{}", format_response(&response));
    Ok(())
}

/// Run the Read-Eval-Print Loop
pub async fn run_repl(client: &SentinelClient, name: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = io::stdout();

    eprintln!("Type 'help' for available commands, 'quit' or Ctrl-D to exit.\n");

    loop {
        match client.current_address() {
            Some(address) => print!("{}({})> ", name, address),
            None => print!("{}({})> ", name, client.state()),
        }
        stdout.flush()?;

        let Some(line) = lines.next_line().await? else {
            // EOF (Ctrl-D)
            println!();
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.to_lowercase().as_str() {
            "quit" | "exit" => break,
            "help" => {
                print_help();
                continue;
            }
            "sentinels" => {
                for sentinel in client.sentinels() {
                    println!("{}", sentinel);
                }
                continue;
            }
            _ => {}
        }

        let args = parse_command_line(line);
        if args.is_empty() {
            continue;
        }

        match client.command(&args).await {
            Ok(response) => print!("{}", format_response(&response)),
            Err(e) => {
                eprintln!("(error) {}", e);
                if client.state().is_terminal() {
                    break;
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Print client events until Ctrl-C or the client ends
pub async fn run_watch(client: &SentinelClient) -> anyhow::Result<()> {
    let mut events = client.subscribe();

    if let Err(e) = client.connect().await {
        return Err(anyhow::anyhow!("Connection failed: {}", e));
    }
    if let Some(address) = client.current_address() {
        println!("connected {}", address);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::End) => {
                    println!("end");
                    break;
                }
                Ok(event) => println!("{}", describe_event(&event)),
                Err(RecvError::Lagged(n)) => warn!("Missed {} client events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}

fn describe_event(event: &ClientEvent) -> String {
    match event {
        ClientEvent::Connecting => "connecting".to_string(),
        ClientEvent::Connected(address) => format!("connected {}", address),
        ClientEvent::Reconnecting => "reconnecting".to_string(),
        ClientEvent::SentinelsUpdated(list) => {
            let names: Vec<String> = list.iter().map(|s| s.to_string()).collect();
            format!("sentinels {}", names.join(" "))
        }
        ClientEvent::Error(e) => format!("error {}", e),
        ClientEvent::End => "end".to_string(),
    }
}

/// Parse a command line into arguments, handling quotes
fn parse_command_line(line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for ch in line.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match (ch, quote) {
            ('\\', q) if q != Some('\'') => escape_next = true,
            ('\'' | '"', None) => quote = Some(ch),
            (c, Some(q)) if c == q => quote = None,
            (' ' | '\t', None) => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Render a reply the way valkey-cli does
fn format_response(resp: &RespValue) -> String {
    let mut out = String::new();
    write_response(&mut out, resp, 0);
    out
}

fn write_response(out: &mut String, resp: &RespValue, indent: usize) {
    let prefix = "  ".repeat(indent);

    match resp {
        RespValue::Array(items) if items.is_empty() => {
            let _ = writeln!(out, "{}(empty array)", prefix);
        }
        RespValue::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let _ = write!(out, "{}{}) ", prefix, i + 1);
                match item {
                    RespValue::Array(_) => {
                        out.push('\n');
                        write_response(out, item, indent + 1);
                    }
                    other => {
                        let _ = writeln!(out, "{}", scalar(other));
                    }
                }
            }
        }
        // Multi-line bulk replies such as INFO are printed raw
        RespValue::BulkString(data) if data.contains(&b'\n') => {
            for line in String::from_utf8_lossy(data).lines() {
                let _ = writeln!(out, "{}{}", prefix, line);
            }
        }
        other => {
            let _ = writeln!(out, "{}{}", prefix, scalar(other));
        }
    }
}

fn scalar(resp: &RespValue) -> String {
    match resp {
        RespValue::SimpleString(s) => s.clone(),
        RespValue::Error(e) => format!("(error) {}", e),
        RespValue::Integer(n) => format!("(integer) {}", n),
        RespValue::BulkString(data) => match std::str::from_utf8(data) {
            Ok(s) => format!("\"{}\"", s),
            Err(_) => format!("(binary) {} bytes", data.len()),
        },
        RespValue::Null => "(nil)".to_string(),
        RespValue::Array(items) => format!("(array) {} items", items.len()),
    }
}

fn print_help() {
    println!(
        r#"
valkey-sentinel-cli
===================

Commands are sent to the node the sentinels currently report.
The connection follows failovers; commands typed during a failover
are queued and sent once the new node is verified.

Built-in commands:
  help       Show this help message
  sentinels  List known sentinels
  quit       Exit (or use Ctrl-D)
  exit       Exit

Example commands:
  PING                 Check connection
  SET key value        Set a key
  GET key              Get a key
  INFO replication     Show the node's role

Tip: Use quotes for values with spaces: SET key "hello world"
"#
    );
}
