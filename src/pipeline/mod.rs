//! Command Pipeline
//!
//! A [`Pipeline`] owns one connection and lets many callers have requests in
//! flight on it at once. Replies come back in the order the requests were
//! written, so matching is a FIFO of continuations:
//!
//! ```text
//!   execute(A) ─┐                          ┌─> A's oneshot
//!   execute(B) ─┼─> [send lock] ──> socket │
//!   execute(C) ─┘     push tx onto FIFO    │   FIFO: [txA, txB, txC]
//!                                          │
//!   whoever holds the receive lock reads ──┴─> pop head, deliver
//! ```
//!
//! There is no background reader task: a caller waiting for its reply takes
//! the receive lock, decodes the next reply and hands it to the FIFO head,
//! which may belong to another caller, until its own continuation resolves.
//!
//! ## One-way mode
//!
//! [`switch_to_one_way`](Pipeline::switch_to_one_way) is used for pub/sub:
//! `execute` is refused and the caller writes with
//! [`send_direct`](Pipeline::send_direct) and reads pushes with
//! [`read_direct`](Pipeline::read_direct).
//!
//! ## Failure
//!
//! A transport or protocol error moves the pipeline to
//! [`ConnectionState::FatalError`]. The caller whose operation failed gets
//! the real error; everyone else still waiting gets
//! [`ClientError::ClosedPipeline`]. A `-ERR` reply is an ordinary
//! [`Reply::Error`] and leaves the pipeline healthy.

pub mod pubsub;
pub mod receiver;
pub mod sender;
pub mod state;

pub use pubsub::PubSubMessage;
pub use receiver::Receiver;
pub use sender::Sender;
pub use state::{ConnectionState, PipelineStats};

use crate::buffer::BufferPools;
use crate::config::Endpoint;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{Command, IntoArg, Reply};
use crate::transport;
use state::StateCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info, warn};

type Continuation = oneshot::Sender<ClientResult<Reply>>;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// One connection with ordered request/reply matching.
pub struct Pipeline {
    id: u64,
    endpoint: Endpoint,
    pools: BufferPools,
    connect_timeout: Option<Duration>,

    state: StateCell,
    one_way: AtomicBool,

    sender: Mutex<Option<Sender>>,
    receiver: Mutex<Option<Receiver>>,

    /// Continuations in the order their requests were written
    pending: std::sync::Mutex<VecDeque<Continuation>>,

    /// Flips to true when the pipeline is torn down; wakes blocked I/O
    closed: watch::Sender<bool>,

    stats: Arc<PipelineStats>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("one_way", &self.is_one_way())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Pipeline {
    /// Creates a pipeline in the `Initial` state. Call
    /// [`connect`](Pipeline::connect) before issuing commands.
    pub fn new(endpoint: Endpoint, pools: BufferPools) -> Self {
        let stats = Arc::new(PipelineStats::new());
        Self::build(endpoint, pools, stats, None, ConnectionState::Initial)
    }

    /// Creates a connected pipeline over an existing stream.
    ///
    /// Any `AsyncRead + AsyncWrite` works, e.g. `tokio::io::duplex`.
    pub fn from_stream<S>(endpoint: Endpoint, stream: S, pools: BufferPools) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let stats = Arc::new(PipelineStats::new());
        let halves = Self::halves(stream, &pools, &stats);
        Self::build(endpoint, pools, stats, Some(halves), ConnectionState::Connected)
    }

    fn build(
        endpoint: Endpoint,
        pools: BufferPools,
        stats: Arc<PipelineStats>,
        halves: Option<(Sender, Receiver)>,
        state: ConnectionState,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        let (sender, receiver) = match halves {
            Some((sender, receiver)) => (Some(sender), Some(receiver)),
            None => (None, None),
        };
        Self {
            id: NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed),
            endpoint,
            pools,
            connect_timeout: None,
            state: StateCell::new(state),
            one_way: AtomicBool::new(false),
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
            pending: std::sync::Mutex::new(VecDeque::new()),
            closed,
            stats,
        }
    }

    fn halves<S>(stream: S, pools: &BufferPools, stats: &Arc<PipelineStats>) -> (Sender, Receiver)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = transport::split(stream);
        (
            Sender::new(writer, pools.send.clone(), Arc::clone(stats)),
            Receiver::new(reader, pools.recv.clone(), Arc::clone(stats)),
        )
    }

    /// Bounds the time [`connect`](Pipeline::connect) may take.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Opens the TCP connection.
    pub async fn connect(&self) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Initial => {}
            ConnectionState::Connected | ConnectionState::Subscribed => return Ok(()),
            _ => return Err(ClientError::ClosedPipeline),
        }

        let stream = transport::connect(&self.endpoint, self.connect_timeout).await?;
        let (sender, receiver) = Self::halves(stream, &self.pools, &self.stats);

        let mut sender_slot = self.sender.lock().await;
        let mut receiver_slot = self.receiver.lock().await;
        if sender_slot.is_some() {
            // A concurrent connect won the race
            return Ok(());
        }
        if self.state.transition(ConnectionState::Connected).is_terminal() {
            return Err(ClientError::ClosedPipeline);
        }
        *sender_slot = Some(sender);
        *receiver_slot = Some(receiver);

        info!(pipeline = self.id, endpoint = %self.endpoint, "Pipeline connected");
        Ok(())
    }

    /// Sends one command and waits for its reply.
    ///
    /// Fails with [`ClientError::ClosedPipeline`] in one-way mode or after
    /// the pipeline was closed, and [`ClientError::NotConnected`] before
    /// `connect`.
    pub async fn execute(&self, command: &Command) -> ClientResult<Reply> {
        self.ensure_request_mode()?;
        let mut receivers = self
            .submit(std::slice::from_ref(command), true)
            .await?;
        match receivers.pop() {
            Some(rx) => self.await_reply(rx).await,
            None => Err(ClientError::ClosedPipeline),
        }
    }

    /// Writes every command with a single flush, then collects the replies
    /// in order.
    ///
    /// The outer error reports a failure to send; each inner result is the
    /// outcome of one command.
    pub async fn execute_batch(&self, commands: &[Command]) -> ClientResult<Vec<ClientResult<Reply>>> {
        self.ensure_request_mode()?;
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        let receivers = self.submit(commands, true).await?;
        let mut replies = Vec::with_capacity(receivers.len());
        for rx in receivers {
            replies.push(self.await_reply(rx).await);
        }
        Ok(replies)
    }

    /// Stops matching replies to requests; irreversible.
    ///
    /// Requests already in flight are still answered, their replies are
    /// consumed ahead of any pushed message by [`read_direct`](Pipeline::read_direct).
    pub async fn switch_to_one_way(&self) -> ClientResult<()> {
        // Taking the send lock orders the switch after any in-progress submit.
        let _guard = self.sender.lock().await;
        self.ensure_open()?;
        if !self.one_way.swap(true, Ordering::AcqRel) {
            debug!(pipeline = self.id, "Pipeline switched to one-way mode");
        }
        Ok(())
    }

    /// Writes a command without expecting a matched reply.
    pub async fn send_direct(&self, command: &Command) -> ClientResult<()> {
        self.ensure_one_way()?;
        self.submit(std::slice::from_ref(command), false).await?;
        Ok(())
    }

    /// Reads the next server push.
    pub async fn read_direct(&self) -> ClientResult<Reply> {
        self.ensure_one_way()?;

        let mut guard = self.receiver.lock().await;
        loop {
            let receiver = guard.as_mut().ok_or(ClientError::ClosedPipeline)?;
            let reply = match self.guarded(receiver.read_reply()).await {
                Ok(reply) => reply,
                Err(err) => {
                    drop(guard);
                    self.abort(None);
                    return Err(err);
                }
            };

            // Replies owed to requests sent before the switch come first.
            if self.pending_count() > 0 {
                self.deliver(Ok(reply));
                continue;
            }
            self.stats.reply_received(reply.is_error());
            return Ok(reply);
        }
    }

    /// Subscribes to channels, switching the pipeline to one-way mode.
    ///
    /// Confirmations and messages are then read with
    /// [`next_message`](Pipeline::next_message).
    pub async fn subscribe<I, A>(&self, channels: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.subscribe_with("SUBSCRIBE", channels).await
    }

    /// Subscribes to channel patterns, switching to one-way mode.
    pub async fn psubscribe<I, A>(&self, patterns: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        self.subscribe_with("PSUBSCRIBE", patterns).await
    }

    /// Drops channel subscriptions; with no channels, drops all of them.
    pub async fn unsubscribe<I, A>(&self, channels: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut command = Command::new("UNSUBSCRIBE");
        channels.into_iter().for_each(|c| command.push_arg(c));
        self.send_direct(&command).await
    }

    /// Drops pattern subscriptions; with no patterns, drops all of them.
    pub async fn punsubscribe<I, A>(&self, patterns: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut command = Command::new("PUNSUBSCRIBE");
        patterns.into_iter().for_each(|p| command.push_arg(p));
        self.send_direct(&command).await
    }

    /// Reads and classifies the next pushed message.
    pub async fn next_message(&self) -> ClientResult<PubSubMessage> {
        PubSubMessage::from_reply(self.read_direct().await?)
    }

    async fn subscribe_with<I, A>(&self, verb: &str, targets: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoArg,
    {
        let mut command = Command::new(verb);
        targets.into_iter().for_each(|t| command.push_arg(t));

        self.switch_to_one_way().await?;
        self.send_direct(&command).await?;
        let previous = self.state.transition(ConnectionState::Subscribed);
        if previous != ConnectionState::Subscribed {
            debug!(pipeline = self.id, "Pipeline subscribed");
        }
        Ok(())
    }

    /// Closes gracefully: sends QUIT and waits up to `timeout` for the
    /// server to acknowledge, then closes the socket either way.
    pub async fn quit(&self, timeout: Duration) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Subscribed => {}
            ConnectionState::Initial => {
                self.state.transition(ConnectionState::Disconnected);
                return Ok(());
            }
            _ => return Ok(()),
        }

        self.state.transition(ConnectionState::Quitting);
        debug!(pipeline = self.id, "Pipeline quitting");

        let result = tokio::time::timeout(timeout, self.send_quit()).await;
        self.disconnect().await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(ClientError::Timeout),
        }
    }

    async fn send_quit(&self) -> ClientResult<()> {
        let quit = Command::new("QUIT");
        if self.is_one_way() {
            // Pushes may precede the acknowledgement; there is nothing to wait for.
            return self.submit(std::slice::from_ref(&quit), false).await.map(|_| ());
        }

        let mut receivers = self.submit(std::slice::from_ref(&quit), true).await?;
        if let Some(rx) = receivers.pop() {
            self.await_reply(rx).await?.into_result()?;
        }
        Ok(())
    }

    /// Closes the connection immediately. Every pending request fails with
    /// [`ClientError::ClosedPipeline`].
    pub async fn disconnect(&self) {
        self.state.transition(ConnectionState::Disconnected);
        self.closed.send_replace(true);
        self.fail_pending();

        let sender = self.sender.lock().await.take();
        let receiver = self.receiver.lock().await.take();
        if let Some(mut sender) = sender {
            if let Err(e) = sender.shutdown().await {
                debug!(pipeline = self.id, error = %e, "Socket shutdown failed");
            }
        }
        drop(receiver);

        info!(pipeline = self.id, endpoint = %self.endpoint, "Pipeline disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_one_way(&self) -> bool {
        self.one_way.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Requests written whose replies have not been delivered yet.
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    fn ensure_open(&self) -> ClientResult<()> {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Subscribed => Ok(()),
            ConnectionState::Initial => Err(ClientError::NotConnected),
            _ => Err(ClientError::ClosedPipeline),
        }
    }

    fn ensure_request_mode(&self) -> ClientResult<()> {
        self.ensure_open()?;
        if self.is_one_way() {
            return Err(ClientError::ClosedPipeline);
        }
        Ok(())
    }

    fn ensure_one_way(&self) -> ClientResult<()> {
        if !self.is_one_way() {
            return Err(ClientError::NotOneWay);
        }
        self.ensure_open()
    }

    /// Frames and flushes `commands` under the send lock. With `matched`,
    /// one continuation per command is queued in the same critical section,
    /// so FIFO order always equals write order.
    async fn submit(
        &self,
        commands: &[Command],
        matched: bool,
    ) -> ClientResult<Vec<oneshot::Receiver<ClientResult<Reply>>>> {
        let mut guard = self.sender.lock().await;

        // Quitting is allowed through for the QUIT itself.
        match self.state() {
            ConnectionState::Quitting => {}
            _ if matched => self.ensure_request_mode()?,
            _ => self.ensure_open()?,
        }
        let sender = guard.as_mut().ok_or(ClientError::ClosedPipeline)?;

        let mut receivers = Vec::new();
        if matched {
            let mut pending = self.lock_pending();
            for _ in commands {
                let (tx, rx) = oneshot::channel();
                pending.push_back(tx);
                receivers.push(rx);
            }
        }

        let written = self
            .guarded(async {
                for command in commands {
                    sender.send(command).await?;
                }
                sender.flush().await
            })
            .await;

        match written {
            Ok(_) => Ok(receivers),
            Err(err) => {
                drop(guard);
                // Our own continuations are dropped with `receivers`; the
                // caller sees the real error directly.
                self.abort(None);
                Err(err)
            }
        }
    }

    /// Waits until `rx` resolves, reading replies for the FIFO head while
    /// holding the receive lock.
    async fn await_reply(&self, mut rx: oneshot::Receiver<ClientResult<Reply>>) -> ClientResult<Reply> {
        loop {
            if let Some(result) = poll_continuation(&mut rx) {
                return result;
            }

            let mut guard = self.receiver.lock().await;

            // Another caller may have delivered ours while we waited.
            if let Some(result) = poll_continuation(&mut rx) {
                return result;
            }

            let receiver = guard.as_mut().ok_or(ClientError::ClosedPipeline)?;
            match self.guarded(receiver.read_reply()).await {
                Ok(reply) => self.deliver(Ok(reply)),
                Err(err) => {
                    drop(guard);
                    self.abort(Some(err));
                }
            }
        }
    }

    /// Hands a decoded reply to the oldest pending continuation.
    fn deliver(&self, result: ClientResult<Reply>) {
        if let Ok(reply) = &result {
            self.stats.reply_received(reply.is_error());
        }
        match self.lock_pending().pop_front() {
            // A dropped caller's reply is discarded in order.
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(pipeline = self.id, "Reply arrived with no pending request"),
        }
    }

    /// Moves to `FatalError`. `head_error` goes to the oldest continuation;
    /// every other one gets `ClosedPipeline`.
    fn abort(&self, head_error: Option<ClientError>) {
        let previous = self.state.transition(ConnectionState::FatalError);
        if !previous.is_terminal() {
            warn!(
                pipeline = self.id,
                endpoint = %self.endpoint,
                error = ?head_error,
                "Pipeline failed"
            );
        }
        self.closed.send_replace(true);

        let mut pending = std::mem::take(&mut *self.lock_pending());
        if let Some(err) = head_error {
            match pending.pop_front() {
                Some(tx) => {
                    let _ = tx.send(Err(err));
                }
                None => debug!(pipeline = self.id, error = %err, "Failure with no pending request"),
            }
        }
        for tx in pending {
            let _ = tx.send(Err(ClientError::ClosedPipeline));
        }
    }

    fn fail_pending(&self) {
        let pending = std::mem::take(&mut *self.lock_pending());
        for tx in pending {
            let _ = tx.send(Err(ClientError::ClosedPipeline));
        }
    }

    /// Runs socket I/O until it completes or the pipeline is torn down.
    async fn guarded<T>(&self, io: impl Future<Output = ClientResult<T>>) -> ClientResult<T> {
        let closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(ClientError::ClosedPipeline);
        }
        tokio::select! {
            result = io => result,
            _ = closed_signal(closed) => Err(ClientError::ClosedPipeline),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, VecDeque<Continuation>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Resolves once the closed flag is set (or its sender is gone).
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

fn poll_continuation(rx: &mut oneshot::Receiver<ClientResult<Reply>>) -> Option<ClientResult<Reply>> {
    match rx.try_recv() {
        Ok(result) => Some(result),
        Err(oneshot::error::TryRecvError::Empty) => None,
        Err(oneshot::error::TryRecvError::Closed) => Some(Err(ClientError::ClosedPipeline)),
    }
}
