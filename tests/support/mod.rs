//! Loopback RESP servers standing in for sentinels and data nodes

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use valkey_sentinel_client::utils::{RespDecoder, RespValue};
use valkey_sentinel_client::ClientEvent;

/// Reply for one command; `None` drops the connection
pub type Handler = Arc<dyn Fn(&[String]) -> Option<RespValue> + Send + Sync>;

pub struct MockServer {
    port: u16,
    handler: Arc<Mutex<Handler>>,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
    silent: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Option<RespValue> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handler: Arc<Mutex<Handler>> = Arc::new(Mutex::new(Arc::new(handler)));
        let commands = Arc::new(Mutex::new(Vec::new()));
        let silent = Arc::new(AtomicBool::new(false));
        let tasks: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept = {
            let handler = Arc::clone(&handler);
            let commands = Arc::clone(&commands);
            let silent = Arc::clone(&silent);
            let tasks = Arc::clone(&tasks);
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let conn = tokio::spawn(serve_connection(
                        socket,
                        Arc::clone(&handler),
                        Arc::clone(&commands),
                        Arc::clone(&silent),
                    ));
                    tasks.lock().push(conn);
                }
            })
        };
        tasks.lock().push(accept);

        Self {
            port,
            handler,
            commands,
            silent,
            tasks,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replace the handler for commands received from now on
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&[String]) -> Option<RespValue> + Send + Sync + 'static,
    {
        *self.handler.lock() = Arc::new(handler);
    }

    /// Keep connections open but stop replying
    pub fn go_silent(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    /// Every command received so far, in arrival order
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }

    /// Stop listening and close every open connection
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Arc<Mutex<Handler>>,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
    silent: Arc<AtomicBool>,
) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        loop {
            let args = match RespDecoder::decode(&mut buf) {
                Ok(Some(value)) => command_args(&value),
                Ok(None) => break,
                Err(_) => return,
            };
            commands.lock().push(args.clone());
            if silent.load(Ordering::SeqCst) {
                continue;
            }

            let current = handler.lock().clone();
            let Some(reply) = current(args.as_slice()) else {
                return;
            };
            let mut out = Vec::new();
            encode(&reply, &mut out);
            if socket.write_all(&out).await.is_err() {
                return;
            }
        }

        match socket.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn command_args(value: &RespValue) -> Vec<String> {
    value
        .as_array()
        .unwrap_or_default()
        .iter()
        .map(|arg| arg.as_str().unwrap_or_default().to_string())
        .collect()
}

pub fn encode(value: &RespValue, out: &mut Vec<u8>) {
    match value {
        RespValue::SimpleString(s) => out.extend_from_slice(format!("+{}\r\n", s).as_bytes()),
        RespValue::Error(e) => out.extend_from_slice(format!("-{}\r\n", e).as_bytes()),
        RespValue::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
        RespValue::BulkString(data) => {
            out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
            out.extend_from_slice(data);
            out.extend_from_slice(b"\r\n");
        }
        RespValue::Null => out.extend_from_slice(b"$-1\r\n"),
        RespValue::Array(items) => {
            out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
            for item in items {
                encode(item, out);
            }
        }
    }
}

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(s.as_bytes().to_vec())
}

pub fn ok() -> RespValue {
    RespValue::SimpleString("OK".to_string())
}

fn flat_map(pairs: &[(&str, String)]) -> RespValue {
    RespValue::Array(
        pairs
            .iter()
            .flat_map(|(k, v)| [bulk(k), bulk(v)])
            .collect(),
    )
}

/// get-master-addr-by-name answer
pub fn master_addr(host: &str, port: u16) -> RespValue {
    RespValue::Array(vec![bulk(host), bulk(&port.to_string())])
}

/// One SENTINEL slaves entry on 127.0.0.1
pub fn replica_entry(port: u16, flags: &str) -> RespValue {
    flat_map(&[
        ("name", format!("127.0.0.1:{}", port)),
        ("ip", "127.0.0.1".to_string()),
        ("port", port.to_string()),
        ("flags", flags.to_string()),
    ])
}

/// One SENTINEL sentinels entry on 127.0.0.1
pub fn sentinel_entry(port: u16) -> RespValue {
    flat_map(&[
        ("ip", "127.0.0.1".to_string()),
        ("port", port.to_string()),
        ("flags", "sentinel".to_string()),
    ])
}

fn is_sentinel_command(args: &[String], sub: &str) -> bool {
    args.len() >= 2
        && args[0].eq_ignore_ascii_case("SENTINEL")
        && args[1].eq_ignore_ascii_case(sub)
}

/// Sentinel answering with a fixed master and no peers
pub async fn sentinel_for(master_port: u16) -> MockServer {
    MockServer::start(move |args: &[String]| {
        if is_sentinel_command(args, "get-master-addr-by-name") {
            Some(master_addr("127.0.0.1", master_port))
        } else if is_sentinel_command(args, "sentinels") {
            Some(RespValue::Array(Vec::new()))
        } else {
            Some(ok())
        }
    })
    .await
}

/// Sentinel answering each SENTINEL subcommand through `answer`
pub async fn sentinel_with<F>(answer: F) -> MockServer
where
    F: Fn(&str) -> RespValue + Send + Sync + 'static,
{
    MockServer::start(move |args: &[String]| {
        if args.len() >= 2 && args[0].eq_ignore_ascii_case("SENTINEL") {
            Some(answer(&args[1].to_ascii_lowercase()))
        } else {
            Some(ok())
        }
    })
    .await
}

/// Data node reporting `role` in INFO replication
pub async fn data_node(role: &'static str) -> MockServer {
    MockServer::start(move |args: &[String]| {
        let reply = match args.first().map(|c| c.to_ascii_uppercase()).as_deref() {
            Some("INFO") => bulk(&format!("# Replication\r\nrole:{}\r\nconnected_slaves:0\r\n", role)),
            Some("PING") => RespValue::SimpleString("PONG".to_string()),
            Some("GET") => bulk("bar"),
            _ => ok(),
        };
        Some(reply)
    })
    .await
}

/// A loopback port with nothing listening on it
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Receive events until one matches, failing after two seconds
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for client event")
}

/// Receive events until `End`, returning everything seen
pub async fn collect_until_end(events: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(ClientEvent::End) => {
                    seen.push(ClientEvent::End);
                    return;
                }
                Ok(event) => seen.push(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
    .await
    .expect("timed out waiting for End");
    seen
}
