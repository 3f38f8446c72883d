//! Sentinel-managed client handle and its connection task
//!
//! A single task owns the resolver, the retry state, the command queue and
//! the data connection. Handles talk to it over an unbounded channel with a
//! oneshot reply per request, which keeps commands in submission order.
//!
//! While connected the task waits on caller requests and on the data
//! connection closing at the same time. When the connection is lost the
//! command in flight goes back to the front of the queue and a new
//! resolution starts. Queued commands are flushed in order once a node is
//! verified.

use std::collections::VecDeque;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::client::RawConnection;
use crate::config::{SentinelOptions, ServerAddress};
use crate::sentinel::endpoint::SentinelEndpoint;
use crate::sentinel::resolver::{CycleOutcome, SentinelResolver};
use crate::sentinel::retry::{RetryController, RetryDecision, RetryState};
use crate::sentinel::status::{ClientEvent, ConnectionState, SharedStatus};
use crate::utils::{ClientError, ConnectionError, RespValue, Result};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct PendingCommand {
    args: Vec<Vec<u8>>,
    reply: oneshot::Sender<Result<RespValue>>,
}

enum Request {
    Connect(oneshot::Sender<Result<()>>),
    Command(PendingCommand),
    Disconnect(oneshot::Sender<()>),
}

/// Handle to a sentinel-managed connection
///
/// Cheap to clone. The connection task stops once `disconnect` is called
/// or every handle has been dropped.
#[derive(Clone)]
pub struct SentinelClient {
    requests: mpsc::UnboundedSender<Request>,
    events: broadcast::Sender<ClientEvent>,
    status: SharedStatus,
}

impl SentinelClient {
    /// Validate `options` and start the connection task on the current
    /// tokio runtime. Resolution starts right away unless `lazy_connect`
    /// is set.
    pub fn new(options: SentinelOptions) -> Result<Self> {
        options.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            ClientError::Config("SentinelClient must be created inside a tokio runtime".to_string())
        })?;

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let initial = if options.lazy_connect {
            ConnectionState::Idle
        } else {
            ConnectionState::ResolvingCandidate
        };
        let status = SharedStatus::new(initial, Vec::new());
        let resolver = SentinelResolver::new(&options, status.clone(), event_tx.clone());
        status.set_sentinels(resolver.endpoints().as_slice().to_vec());

        let task = ConnectionTask {
            requests: request_rx,
            resolver,
            retry: RetryController::new(options.retry_strategy.clone()),
            backlog: Backlog::default(),
            status: status.clone(),
            events: event_tx.clone(),
        };
        runtime.spawn(task.run(options.lazy_connect));

        Ok(Self {
            requests: request_tx,
            events: event_tx,
            status,
        })
    }

    /// Wait until a verified node is connected
    ///
    /// Starts resolution for lazily created clients. Returns immediately
    /// when already connected.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Connect(tx))?;
        rx.await.map_err(|_| self.status.terminal_error())?
    }

    /// Send a command and wait for its reply
    ///
    /// Server error replies come back as `Ok(RespValue::Error(..))`. Commands
    /// issued while resolving are queued and sent once connected.
    pub async fn command<A: AsRef<[u8]>>(&self, args: &[A]) -> Result<RespValue> {
        let (tx, rx) = oneshot::channel();
        self.send(Request::Command(PendingCommand {
            args: args.iter().map(|a| a.as_ref().to_vec()).collect(),
            reply: tx,
        }))?;
        rx.await.map_err(|_| self.status.terminal_error())?
    }

    pub async fn ping(&self) -> Result<RespValue> {
        self.command(&["PING"]).await
    }

    pub async fn get(&self, key: &str) -> Result<RespValue> {
        self.command(&["GET", key]).await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<RespValue> {
        self.command(&["SET", key, value]).await
    }

    /// Close the connection, fail queued commands and stop resolving
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(Request::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Subscribe to client events
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.state()
    }

    /// Address of the connected node, if any
    pub fn current_address(&self) -> Option<ServerAddress> {
        self.status.address()
    }

    /// Known sentinels, including discovered ones
    pub fn sentinels(&self) -> Vec<SentinelEndpoint> {
        self.status.sentinels()
    }

    fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| self.status.terminal_error())
    }
}

/// What to do after absorbing a request
enum Flow {
    Continue,
    Close(Option<oneshot::Sender<()>>),
}

/// Requests waiting for a connection
#[derive(Default)]
struct Backlog {
    queue: VecDeque<PendingCommand>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
}

impl Backlog {
    /// `None` means every handle was dropped
    fn absorb(&mut self, request: Option<Request>) -> Flow {
        match request {
            Some(Request::Connect(tx)) => {
                self.waiters.push(tx);
                Flow::Continue
            }
            Some(Request::Command(cmd)) => {
                self.queue.push_back(cmd);
                Flow::Continue
            }
            Some(Request::Disconnect(ack)) => Flow::Close(Some(ack)),
            None => Flow::Close(None),
        }
    }

    fn notify_connected(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail_all(&mut self, err: &ClientError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for cmd in self.queue.drain(..) {
            let _ = cmd.reply.send(Err(err.clone()));
        }
    }
}

/// How a flush of the command queue ended
enum Flush {
    Drained,
    /// Transport failed or a command timed out
    Lost,
    Close(Option<oneshot::Sender<()>>),
}

enum Phase {
    Idle,
    Resolve { reconnect: bool },
    Connected(RawConnection),
    Finished,
}

struct ConnectionTask {
    requests: mpsc::UnboundedReceiver<Request>,
    resolver: SentinelResolver,
    retry: RetryController,
    backlog: Backlog,
    status: SharedStatus,
    events: broadcast::Sender<ClientEvent>,
}

impl ConnectionTask {
    async fn run(mut self, lazy: bool) {
        let mut phase = if lazy {
            Phase::Idle
        } else {
            Phase::Resolve { reconnect: false }
        };

        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Resolve { reconnect } => self.resolve(reconnect).await,
                Phase::Connected(conn) => self.serve(conn).await,
                Phase::Finished => break,
            };
        }
        debug!("Sentinel connection task finished");
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Lazy start: any request begins resolution
    async fn idle(&mut self) -> Phase {
        let request = self.requests.recv().await;
        match self.backlog.absorb(request) {
            Flow::Continue => Phase::Resolve { reconnect: false },
            Flow::Close(ack) => self.close(ack),
        }
    }

    /// Run resolution passes until connected, given up or closed
    async fn resolve(&mut self, reconnect: bool) -> Phase {
        let mut retry_state = RetryState::default();

        if reconnect {
            self.status.set_state(ConnectionState::Reconnecting);
            self.emit(ClientEvent::Reconnecting);
        } else {
            self.status.set_state(ConnectionState::ResolvingCandidate);
            self.emit(ClientEvent::Connecting);
        }

        loop {
            let outcome = {
                let cycle = self.resolver.run_cycle(&mut retry_state);
                tokio::pin!(cycle);
                loop {
                    tokio::select! {
                        outcome = &mut cycle => break Ok(outcome),
                        request = self.requests.recv() => {
                            if let Flow::Close(ack) = self.backlog.absorb(request) {
                                break Err(ack);
                            }
                        }
                    }
                }
            };

            match outcome {
                Ok(CycleOutcome::Connected { conn, address }) => {
                    return self.on_connected(conn, address).await;
                }
                Ok(CycleOutcome::Exhausted) => {}
                // The cycle future is already dropped, aborting its I/O
                Err(ack) => return self.close(ack),
            }

            match self.retry.on_exhausted(&mut retry_state) {
                RetryDecision::RetryAfter(delay) if delay.is_zero() => {
                    tokio::task::yield_now().await;
                }
                RetryDecision::RetryAfter(delay) => {
                    let sleep = tokio::time::sleep(delay);
                    tokio::pin!(sleep);
                    loop {
                        tokio::select! {
                            _ = &mut sleep => break,
                            request = self.requests.recv() => {
                                if let Flow::Close(ack) = self.backlog.absorb(request) {
                                    return self.close(ack);
                                }
                            }
                        }
                    }
                }
                RetryDecision::GiveUp => {
                    let err = ClientError::AllSentinelsUnreachable {
                        last_error: retry_state.last_error_message(),
                    };
                    error!("{}", err);
                    self.finish(ConnectionState::Failed, err.clone());
                    self.emit(ClientEvent::Error(err));
                    self.emit(ClientEvent::End);
                    return Phase::Finished;
                }
            }
        }
    }

    async fn on_connected(&mut self, mut conn: RawConnection, address: ServerAddress) -> Phase {
        info!("Connected to {}", address);
        self.status.set_connected(address.clone());
        self.emit(ClientEvent::Connected(address));
        self.backlog.notify_connected();

        let flushed = self.flush(&mut conn).await;
        self.after_flush(conn, flushed)
    }

    /// Send queued commands in order
    ///
    /// Requests arriving while a reply is pending are absorbed, so a close
    /// never waits on the node. On transport failure the command stays at
    /// the front of the queue, except for timeouts which fail that command
    /// alone.
    async fn flush(&mut self, conn: &mut RawConnection) -> Flush {
        while let Some(cmd) = self.backlog.queue.pop_front() {
            let result = {
                let exec = conn.execute(&cmd.args);
                tokio::pin!(exec);
                loop {
                    tokio::select! {
                        result = &mut exec => break Ok(result),
                        request = self.requests.recv() => match self.backlog.absorb(request) {
                            Flow::Continue => self.backlog.notify_connected(),
                            Flow::Close(ack) => break Err(ack),
                        }
                    }
                }
            };

            match result {
                Ok(Ok(reply)) => {
                    let _ = cmd.reply.send(Ok(reply));
                }
                Ok(Err(ConnectionError::Timeout(ms))) => {
                    warn!("Command to {} timed out after {}ms", conn.address(), ms);
                    let _ = cmd.reply.send(Err(ClientError::Timeout(ms)));
                    return Flush::Lost;
                }
                Ok(Err(e)) => {
                    warn!("Connection to {} lost: {}", conn.address(), e);
                    self.backlog.queue.push_front(cmd);
                    return Flush::Lost;
                }
                // The pending reply is abandoned with the connection
                Err(ack) => {
                    let _ = cmd.reply.send(Err(ClientError::Closed));
                    return Flush::Close(ack);
                }
            }
        }
        Flush::Drained
    }

    fn after_flush(&mut self, conn: RawConnection, flushed: Flush) -> Phase {
        match flushed {
            Flush::Drained => Phase::Connected(conn),
            Flush::Lost => Phase::Resolve { reconnect: true },
            Flush::Close(ack) => {
                drop(conn);
                self.close(ack)
            }
        }
    }

    /// Serve requests until the connection drops or the client closes
    async fn serve(&mut self, mut conn: RawConnection) -> Phase {
        loop {
            let request = tokio::select! {
                request = self.requests.recv() => request,
                err = conn.closed() => {
                    warn!("Connection to {} lost: {}", conn.address(), err);
                    return Phase::Resolve { reconnect: true };
                }
            };

            if let Flow::Close(ack) = self.backlog.absorb(request) {
                conn.shutdown().await;
                return self.close(ack);
            }

            self.backlog.notify_connected();
            match self.flush(&mut conn).await {
                Flush::Drained => {}
                flushed => return self.after_flush(conn, flushed),
            }
        }
    }

    /// User-initiated or last-handle close
    fn close(&mut self, ack: Option<oneshot::Sender<()>>) -> Phase {
        info!("Sentinel client closed");
        self.finish(ConnectionState::Closed, ClientError::Closed);
        self.emit(ClientEvent::End);
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Phase::Finished
    }

    /// Enter a terminal state and fail everything still waiting
    fn finish(&mut self, state: ConnectionState, err: ClientError) {
        self.status.finish(state, err.clone());
        self.backlog.fail_all(&err);

        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            match request {
                Request::Connect(tx) => {
                    let _ = tx.send(Err(err.clone()));
                }
                Request::Command(cmd) => {
                    let _ = cmd.reply.send(Err(err.clone()));
                }
                Request::Disconnect(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }
}
