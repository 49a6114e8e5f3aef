//! Synchronous Channel (C6): one socket, one FIFO of pending commands.
//!
//! Sends the head, waits for its completion callback, times out, advances.
//! This is the engine every protocol framing layer (C7/C8/C10/C11/C12)
//! drives; it knows nothing about HCI/MGMT/ATT/SDP/AVDTP specifically —
//! only the [`Command`] and [`Socket`] traits below.
use crate::error::{Error, ErrorKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, instrument, warn};

pub mod fake;

/// What happened when inbound bytes were offered to the head command's
/// deserializer.
pub enum Progress {
    /// More bytes are needed before this command can complete.
    InProgress,
    /// The command is done; `result` is the final outcome.
    Completed(Result<(), Error>),
    /// The command must be resent (ATT range-walk, SDP continuation) —
    /// the caller re-emits `request_bytes()`.
    Resend,
    /// These bytes were not a reply to this command at all (an
    /// unsolicited notification); the channel routes them to the
    /// notification handler instead.
    NotMine,
}

/// A single in-flight protocol exchange: able to serialize itself once,
/// and to be re-offered inbound bytes until it reports completion.
pub trait Command: Send + 'static {
    /// Serializes the outbound request. An empty/invalid request should
    /// return `Err(BadRequest)`, matching §4.5's synchronous completion
    /// for structurally invalid commands.
    fn request_bytes(&mut self) -> Result<Vec<u8>, Error>;

    /// Offers inbound bytes to this command's deserializer.
    fn on_inbound(&mut self, bytes: &[u8]) -> Progress;
}

/// Unsolicited, asynchronous inbound data (ATT `HANDLE_NOTIFY`, HCI scan
/// reports) that bypasses the command queue entirely.
pub trait NotificationHandler: Send + Sync + 'static {
    fn on_notification(&self, bytes: &[u8]);
}

struct NoopNotificationHandler;
impl NotificationHandler for NoopNotificationHandler {
    fn on_notification(&self, _bytes: &[u8]) {}
}

/// Handle to a command enqueued via [`Channel::execute_cancelable`], good
/// for passing to [`Channel::revoke`] from another task.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CommandId(u64);

/// Type-erases a concrete `C` behind `Box<dyn Command>` while keeping a
/// second handle to it alive outside the queue, so [`Channel::execute`]
/// can hand the caller back the same command it enqueued — with whatever
/// response state `on_inbound` accumulated into it — instead of just a
/// bare completion signal.
struct Shared<C> {
    inner: Arc<StdMutex<C>>,
}

impl<C: Command> Command for Shared<C> {
    fn request_bytes(&mut self) -> Result<Vec<u8>, Error> {
        self.inner.lock().unwrap().request_bytes()
    }

    fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
        self.inner.lock().unwrap().on_inbound(bytes)
    }
}

/// The byte transport a [`Channel`] runs over. `bt-sock`'s raw HCI, MGMT
/// and L2CAP socket types implement this.
#[async_trait::async_trait]
pub trait Socket: Send + Sync + 'static {
    async fn send(&self, buf: &[u8]) -> std::io::Result<()>;
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;
}

struct Pending {
    id: u64,
    command: Box<dyn Command>,
    wait: Duration,
    done_tx: Option<oneshot::Sender<Result<(), Error>>>,
    /// Flips to `true` when this entry completes (normally or by timeout),
    /// so [`Channel::revoke`] can wait on an in-flight head without racing
    /// a missed wakeup: `watch` always replays its last value to a new
    /// subscriber, unlike `Notify`.
    finished_tx: watch::Sender<bool>,
}

struct Inner<S> {
    socket: S,
    queue: Mutex<VecDeque<Pending>>,
    notifications: Box<dyn NotificationHandler>,
    kick_tx: mpsc::Sender<()>,
    next_id: AtomicU64,
}

/// Owns one socket and its FIFO of pending commands. Cloning a `Channel`
/// shares the same queue and socket (it is a thin `Arc` handle).
#[derive(Clone)]
pub struct Channel<S> {
    inner: Arc<Inner<S>>,
}

impl<S: Socket> Channel<S> {
    pub fn new(socket: S) -> Self {
        Self::with_notification_handler(socket, NoopNotificationHandler)
    }

    pub fn with_notification_handler(socket: S, handler: impl NotificationHandler) -> Self {
        let (kick_tx, kick_rx) = mpsc::channel(8);
        let inner = Arc::new(Inner {
            socket,
            queue: Mutex::new(VecDeque::new()),
            notifications: Box::new(handler),
            kick_tx,
            next_id: AtomicU64::new(0),
        });
        let channel = Self { inner };
        channel.spawn_reader(kick_rx);
        channel
    }

    fn spawn_reader(&self, mut kick_rx: mpsc::Receiver<()>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    biased;
                    recv = inner.socket.recv(&mut buf) => {
                        match recv {
                            Ok(n) if n > 0 => Self::dispatch_inbound(&inner, &buf[..n]).await,
                            Ok(_) => continue,
                            Err(e) => {
                                warn!(error = %e, "channel socket recv failed");
                                return;
                            }
                        }
                    }
                    _ = kick_rx.recv() => {
                        Self::pump_head(&inner).await;
                    }
                }
            }
        });
    }

    #[instrument(level = "debug", skip_all)]
    async fn dispatch_inbound(inner: &Arc<Inner<S>>, bytes: &[u8]) {
        let mut queue = inner.queue.lock().await;
        let Some(head) = queue.front_mut() else {
            drop(queue);
            inner.notifications.on_notification(bytes);
            return;
        };
        match head.command.on_inbound(bytes) {
            Progress::InProgress => {}
            Progress::NotMine => {
                drop(queue);
                inner.notifications.on_notification(bytes);
            }
            Progress::Resend => {
                let bytes = head.command.request_bytes();
                drop(queue);
                if let Ok(bytes) = bytes {
                    debug!("resending command after continuation/range-walk response");
                    let _ = inner.socket.send(&bytes).await;
                }
            }
            Progress::Completed(result) => {
                let mut done = queue.pop_front().unwrap();
                drop(queue);
                // Drop the queue's handle to the command before waking the
                // caller, so the caller's `Arc::try_unwrap` in `execute`
                // always finds itself the sole owner.
                drop(done.command);
                if let Some(tx) = done.done_tx.take() {
                    let _ = tx.send(result);
                }
                let _ = done.finished_tx.send(true);
                Self::send_next(inner).await;
            }
        }
    }

    async fn send_next(inner: &Arc<Inner<S>>) {
        let bytes = {
            let mut queue = inner.queue.lock().await;
            match queue.front_mut() {
                Some(p) => p.command.request_bytes(),
                None => return,
            }
        };
        match bytes {
            Ok(bytes) => {
                let _ = inner.socket.send(&bytes).await;
            }
            Err(err) => {
                let mut queue = inner.queue.lock().await;
                if let Some(mut p) = queue.pop_front() {
                    drop(queue);
                    drop(p.command);
                    if let Some(tx) = p.done_tx.take() {
                        let _ = tx.send(Err(err));
                    }
                    let _ = p.finished_tx.send(true);
                    Self::send_next(inner).await;
                }
            }
        }
    }

    async fn pump_head(inner: &Arc<Inner<S>>) {
        Self::send_next(inner).await;
    }

    /// Enqueues `command`, returning its id alongside the shared handle
    /// and completion signal `execute`/`execute_cancelable` wait on.
    async fn enqueue<C: Command>(
        &self,
        wait: Duration,
        command: C,
    ) -> (CommandId, Arc<StdMutex<C>>, oneshot::Receiver<Result<(), Error>>) {
        let shared = Arc::new(StdMutex::new(command));
        let wrapper = Shared {
            inner: shared.clone(),
        };
        let (done_tx, done_rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (finished_tx, _) = watch::channel(false);
        let was_empty = {
            let mut queue = self.inner.queue.lock().await;
            let was_empty = queue.is_empty();
            queue.push_back(Pending {
                id,
                command: Box::new(wrapper),
                wait,
                done_tx: Some(done_tx),
                finished_tx,
            });
            was_empty
        };
        if was_empty {
            Self::send_next(&self.inner).await;
        }
        (CommandId(id), shared, done_rx)
    }

    async fn await_completion<C: Command>(
        &self,
        wait: Duration,
        shared: Arc<StdMutex<C>>,
        done_rx: oneshot::Receiver<Result<(), Error>>,
    ) -> Result<C, Error> {
        let outcome = match tokio::time::timeout(wait, done_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::new(ErrorKind::Unavailable)),
            Err(_) => {
                self.pop_timed_out_head().await;
                Err(Error::new(ErrorKind::TimedOut))
            }
        };
        let command = Arc::try_unwrap(shared)
            .unwrap_or_else(|_| panic!("command outlives its sole owner"))
            .into_inner()
            .unwrap();
        outcome.map(|()| command)
    }

    /// Enqueues `command`. If the queue was empty, sends immediately. If
    /// the request is structurally invalid, completes synchronously with
    /// `BadRequest` without ever touching the socket. On completion —
    /// success or failure — hands `command` back so callers can read
    /// whatever `on_inbound` accumulated into it (a response payload, a
    /// decoded handle list, ...).
    #[instrument(level = "debug", skip_all, fields(wait_ms = wait.as_millis() as u64))]
    pub async fn execute<C: Command>(&self, wait: Duration, command: C) -> Result<C, Error> {
        let (_id, shared, done_rx) = self.enqueue(wait, command).await;
        self.await_completion(wait, shared, done_rx).await
    }

    /// Like [`execute`](Self::execute), but hands back the [`CommandId`]
    /// immediately, alongside the completion future, instead of only
    /// after the command finishes — so a caller can pass the id to
    /// another task and [`revoke`](Self::revoke) it while this is still
    /// pending.
    #[instrument(level = "debug", skip_all, fields(wait_ms = wait.as_millis() as u64))]
    pub async fn execute_cancelable<C: Command>(
        &self,
        wait: Duration,
        command: C,
    ) -> (CommandId, impl std::future::Future<Output = Result<C, Error>>) {
        let (id, shared, done_rx) = self.enqueue(wait, command).await;
        let this = self.clone();
        (id, async move { this.await_completion(wait, shared, done_rx).await })
    }

    /// Cancels a pending command per §4.5: a not-yet-sent command is
    /// pulled out of the queue and completes with `AsyncAborted`
    /// immediately. The head is already in flight and can't be pulled off
    /// the wire, so revoking it instead waits for it to finish on its own
    /// (completion or timeout) without affecting the outcome the original
    /// caller of `execute`/`execute_cancelable` observes. Revoking an id
    /// that has already completed is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub async fn revoke(&self, id: CommandId) {
        enum Outcome {
            AlreadyGone,
            WaitForHead(watch::Receiver<bool>),
        }
        let outcome = {
            let mut queue = self.inner.queue.lock().await;
            match queue.iter().position(|p| p.id == id.0) {
                None => Outcome::AlreadyGone,
                Some(0) => Outcome::WaitForHead(queue[0].finished_tx.subscribe()),
                Some(pos) => {
                    let mut removed = queue.remove(pos).expect("position just found");
                    drop(queue);
                    drop(removed.command);
                    if let Some(tx) = removed.done_tx.take() {
                        let _ = tx.send(Err(Error::new(ErrorKind::AsyncAborted)));
                    }
                    let _ = removed.finished_tx.send(true);
                    return;
                }
            }
        };
        if let Outcome::WaitForHead(mut rx) = outcome {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    async fn pop_timed_out_head(&self) {
        let mut queue = self.inner.queue.lock().await;
        if let Some(mut p) = queue.pop_front() {
            drop(queue);
            drop(p.command);
            p.done_tx.take();
            let _ = p.finished_tx.send(true);
            Self::send_next(&self.inner).await;
        }
    }

    /// Reference to the underlying socket, for protocol layers that need
    /// to query socket-level state (e.g. connection info, MTU).
    pub fn socket(&self) -> &S {
        &self.inner.socket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::fake::FakeSocket;

    struct EchoOnceCommand {
        sent: bool,
        reply_tag: u8,
    }

    impl Command for EchoOnceCommand {
        fn request_bytes(&mut self) -> Result<Vec<u8>, Error> {
            if self.sent {
                return Err(Error::new(ErrorKind::BadRequest));
            }
            self.sent = true;
            Ok(vec![self.reply_tag])
        }

        fn on_inbound(&mut self, bytes: &[u8]) -> Progress {
            if bytes.first() == Some(&self.reply_tag) {
                Progress::Completed(Ok(()))
            } else {
                Progress::NotMine
            }
        }
    }

    #[tokio::test]
    async fn fifo_ordering_across_two_commands() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        let channel_a = channel.clone();
        let a = tokio::spawn(async move {
            channel_a
                .execute(
                    Duration::from_millis(500),
                    EchoOnceCommand {
                        sent: false,
                        reply_tag: 0xAA,
                    },
                )
                .await
                .unwrap();
            order_a.lock().await.push('A');
        });

        let order_b = order.clone();
        let channel_b = channel.clone();
        let b = tokio::spawn(async move {
            channel_b
                .execute(
                    Duration::from_millis(500),
                    EchoOnceCommand {
                        sent: false,
                        reply_tag: 0xBB,
                    },
                )
                .await
                .unwrap();
            order_b.lock().await.push('B');
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.deliver(&[0xAA]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        peer.deliver(&[0xBB]).await;

        a.await.unwrap();
        b.await.unwrap();
        assert_eq!(*order.lock().await, vec!['A', 'B']);
    }

    #[tokio::test]
    async fn revoke_removes_not_yet_sent_command() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);

        let channel_a = channel.clone();
        let head = tokio::spawn(async move {
            channel_a
                .execute(
                    Duration::from_millis(500),
                    EchoOnceCommand {
                        sent: false,
                        reply_tag: 0xAA,
                    },
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (id_b, fut_b) = channel
            .execute_cancelable(
                Duration::from_millis(500),
                EchoOnceCommand {
                    sent: false,
                    reply_tag: 0xBB,
                },
            )
            .await;
        channel.revoke(id_b).await;
        let result_b = fut_b.await;
        assert!(matches!(
            result_b,
            Err(Error {
                kind: ErrorKind::AsyncAborted,
                ..
            })
        ));

        peer.deliver(&[0xAA]).await;
        assert!(head.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn revoke_on_head_waits_for_its_natural_completion() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);

        let (id, fut) = channel
            .execute_cancelable(
                Duration::from_millis(500),
                EchoOnceCommand {
                    sent: false,
                    reply_tag: 0xCC,
                },
            )
            .await;

        let channel_r = channel.clone();
        let revoking = tokio::spawn(async move {
            channel_r.revoke(id).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!revoking.is_finished(), "revoke must not return before the head finishes");

        peer.deliver(&[0xCC]).await;
        revoking.await.unwrap();
        assert!(fut.await.is_ok());
    }

    #[tokio::test]
    async fn timeout_pops_head_and_advances() {
        let (socket, peer) = FakeSocket::pair();
        let channel = Channel::new(socket);
        let result = channel
            .execute(
                Duration::from_millis(20),
                EchoOnceCommand {
                    sent: false,
                    reply_tag: 0x01,
                },
            )
            .await;
        assert!(matches!(result, Err(Error { kind: ErrorKind::TimedOut, .. })));
        drop(peer);
    }
}
