//! The connection core: one transport, one dispatch loop, many callers.
//!
//! A [`Connection`] is a cheap, cloneable handle. All clones share the
//! writer, the pending-request table and the notification router. The
//! dispatch loop is the transport's only reader; it resolves pending calls
//! by id and routes notifications to turn streams by turn id.

use crate::error::{Error, Result};
use crate::jsonrpc::{
    self, JsonRpcError, JsonRpcErrorData, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    RequestId, METHOD_NOT_FOUND,
};
use crate::protocol::{methods, TurnInterruptParams};
use crate::transport::{FrameReader, FrameWriter, Transport};
use crate::turn::{Interrupt, Router, TurnShared};
use log::{debug, error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type Waiter = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct State {
    /// Set once the connection is unusable; holds the reason.
    closed: Option<String>,
    pending: HashMap<RequestId, Waiter>,
    router: Router,
}

struct Shared {
    writer: tokio::sync::Mutex<FrameWriter>,
    state: Mutex<State>,
    next_id: AtomicI64,
    request_timeout: Duration,
    shutting_down: AtomicBool,
    shutdown: Notify,
    process: Mutex<Option<Child>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

/// Shared handle to one app-server session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

impl Connection {
    /// Take ownership of `transport` and start the dispatch loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Transport, request_timeout: Duration) -> Self {
        let (reader, writer, process) = transport.into_parts();
        let inner = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(writer),
            state: Mutex::new(State::default()),
            next_id: AtomicI64::new(1),
            request_timeout,
            shutting_down: AtomicBool::new(false),
            shutdown: Notify::new(),
            process: Mutex::new(process),
            dispatch: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch_loop(inner.clone(), reader));
        *lock(&inner.dispatch) = Some(handle);
        Self { inner }
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state().closed.is_some()
    }

    /// Send a request and wait for its response, bounded by the default
    /// request timeout.
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let timeout = self.inner.request_timeout;
        self.call_until(method, params, Instant::now() + timeout, timeout)
            .await
    }

    /// Send a request and wait for its response until `deadline`.
    ///
    /// `budget` is the duration reported in the timeout error.
    pub async fn call_until<P, R>(
        &self,
        method: &str,
        params: &P,
        deadline: Instant,
        budget: Duration,
    ) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.call_value(method, params, deadline, budget).await?;
        serde_json::from_value(result).map_err(|e| Error::Protocol {
            code: None,
            message: format!("invalid {} response: {}", method, e),
            data: None,
        })
    }

    async fn call_value(
        &self,
        method: &str,
        params: Value,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Value> {
        let id = RequestId::Integer(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state();
            if let Some(reason) = &state.closed {
                return Err(Error::Transport(reason.clone()));
            }
            state.pending.insert(id.clone(), tx);
        }
        let _guard = PendingGuard {
            shared: &self.inner,
            id: id.clone(),
        };

        let request = JsonRpcRequest {
            id,
            method: method.to_string(),
            params: Some(params),
        };
        let exchange = async {
            self.inner.send(&request).await?;
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::Transport("connection closed".to_string())),
            }
        };

        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!("[CLIENT] {} timed out after {:?}", method, budget);
                Err(Error::Timeout {
                    operation: method.to_string(),
                    timeout: budget,
                })
            }
        }
    }

    /// Send a client notification.
    pub async fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<()> {
        let closed = self.inner.state().closed.clone();
        if let Some(reason) = closed {
            return Err(Error::Transport(reason));
        }
        let notification = JsonRpcNotification {
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        };
        self.inner.send(&notification).await
    }

    /// Hold early notifications for `thread_id` until the returned
    /// reservation registers the new turn or is dropped.
    pub(crate) fn begin_turn_start(&self, thread_id: &str) -> TurnStartReservation {
        self.inner.state().router.begin_start(thread_id);
        TurnStartReservation {
            connection: self.clone(),
            thread_id: thread_id.to_string(),
        }
    }

    pub(crate) fn unregister_turn(&self, turn: &Arc<TurnShared>) {
        self.inner.state().router.remove_if_same(turn);
    }

    /// Whether `turn_id` still has an open stream on this connection.
    pub fn is_turn_active(&self, turn_id: &str) -> bool {
        self.inner.state().router.is_active(turn_id)
    }

    /// End a turn's stream locally, then ask the server to interrupt it.
    pub async fn cancel_turn(&self, thread_id: &str, turn_id: &str) -> Result<()> {
        let route = self.inner.state().router.remove(turn_id);
        let Some(turn) = route else {
            return Err(Error::TurnInactive(turn_id.to_string()));
        };
        turn.interrupt(Interrupt::Cancelled);
        debug!("[CLIENT] Cancelled turn {}", turn.turn_id());

        let params = TurnInterruptParams {
            thread_id: thread_id.to_string(),
            turn_id: turn_id.to_string(),
        };
        self.call::<_, Value>(methods::TURN_INTERRUPT, &params)
            .await
            .map(|_| ())
    }

    /// Fail everything in flight, stop the dispatch loop and release the
    /// transport. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("[CLIENT] Shutting down");
        self.inner.fail_all("connection closed by client");
        self.inner.shutdown.notify_one();

        let child = lock(&self.inner.process).take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!("[CLIENT] Failed to kill app-server: {}", e);
            }
        }
        if let Err(e) = self.inner.writer.lock().await.close().await {
            debug!("[CLIENT] Error closing transport: {}", e);
        }
        let dispatch = lock(&self.inner.dispatch).take();
        if let Some(handle) = dispatch {
            if let Err(e) = handle.await {
                debug!("[CLIENT] Dispatch loop ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    /// Synchronous teardown for drop paths.
    pub(crate) fn abort(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.fail_all("connection dropped");
        self.inner.shutdown.notify_one();
        if let Some(mut child) = lock(&self.inner.process).take() {
            if let Err(e) = child.start_kill() {
                error!("Failed to kill app-server process on drop: {}", e);
            }
        }
        if let Some(handle) = lock(&self.inner.dispatch).take() {
            handle.abort();
        }
    }
}

/// The text carried into the `Transport` errors of everything still waiting.
fn failure_reason(err: &Error) -> String {
    match err {
        Error::Transport(reason) => reason.clone(),
        other => other.to_string(),
    }
}

/// Recover the data from a poisoned mutex; every critical section leaves
/// the state consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let frame = jsonrpc::encode(message)?;
        debug!("[CLIENT] Sending: {}", frame);
        let sent = self.writer.lock().await.send(&frame).await;
        if let Err(e) = &sent {
            self.fail_all(&failure_reason(e));
        }
        sent
    }

    /// Mark the connection closed and fail every waiter and open turn.
    fn fail_all(&self, reason: &str) {
        let mut state = self.state();
        if state.closed.is_none() {
            state.closed = Some(reason.to_string());
        }
        let pending = state.pending.len();
        for (_, waiter) in state.pending.drain() {
            let _ = waiter.send(Err(Error::Transport(reason.to_string())));
        }
        state.router.close_all(reason);
        if pending > 0 {
            debug!("[CLIENT] Failed {} pending request(s): {}", pending, reason);
        }
    }

    fn resolve(&self, id: &RequestId, result: Result<Value>) {
        let waiter = self.state().pending.remove(id);
        match waiter {
            // The caller may have given up already; that is fine.
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!("[CLIENT] Discarding response for unknown id={}", id),
        }
    }
}

/// Removes a pending entry on every exit path of a call.
struct PendingGuard<'a> {
    shared: &'a Shared,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.state().pending.remove(&self.id);
    }
}

/// An in-flight `turn/start` for one thread.
pub(crate) struct TurnStartReservation {
    connection: Connection,
    thread_id: String,
}

impl TurnStartReservation {
    /// Register the started turn and hand over its early events.
    pub(crate) fn register(&self, turn_id: &str) -> Result<Arc<TurnShared>> {
        let turn = Arc::new(TurnShared::new(self.thread_id.as_str(), turn_id));
        let mut state = self.connection.inner.state();
        if let Some(reason) = &state.closed {
            return Err(Error::Transport(reason.clone()));
        }
        state.router.register(turn.clone());
        Ok(turn)
    }
}

impl Drop for TurnStartReservation {
    fn drop(&mut self) {
        self.connection
            .inner
            .state()
            .router
            .end_start(&self.thread_id);
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut reader: FrameReader) {
    let reason = loop {
        let frame = tokio::select! {
            _ = shared.shutdown.notified() => break "connection closed by client".to_string(),
            frame = reader.receive() => frame,
        };
        match frame {
            Ok(Some(frame)) => dispatch_frame(&shared, &frame),
            Ok(None) => break "app-server closed the connection".to_string(),
            Err(e) => break failure_reason(&e),
        }
    };
    debug!("[CLIENT] Dispatch loop stopped: {}", reason);
    shared.fail_all(&reason);
}

fn dispatch_frame(shared: &Arc<Shared>, frame: &str) {
    debug!("[CLIENT] Received: {}", frame);
    let message = match jsonrpc::decode(frame) {
        Ok(message) => message,
        Err(e) => {
            warn!("[CLIENT] Skipping bad frame: {}", e);
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(resp) => shared.resolve(&resp.id, Ok(resp.result)),
        JsonRpcMessage::Error(err) => shared.resolve(&err.id, Err(err.error.into())),
        JsonRpcMessage::Notification(notif) => {
            let params = notif.params.unwrap_or(Value::Null);
            shared.state().router.route(notif.method, params);
        }
        JsonRpcMessage::Request(req) => {
            warn!(
                "[CLIENT] Rejecting unsupported server request {} (id={})",
                req.method, req.id
            );
            let reply = JsonRpcError {
                id: req.id,
                error: JsonRpcErrorData {
                    code: METHOD_NOT_FOUND,
                    message: format!("client does not handle {}", req.method),
                    data: None,
                },
            };
            let shared = shared.clone();
            tokio::spawn(async move {
                if let Err(e) = shared.send(&reply).await {
                    debug!("[CLIENT] Could not answer server request: {}", e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn pair() -> (Connection, tokio::io::DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (read_half, write_half) = tokio::io::split(client);
        let transport = Transport::from_io(read_half, write_half);
        (
            Connection::new(transport, Duration::from_secs(5)),
            server,
        )
    }

    #[tokio::test]
    async fn test_call_resolves_by_id() {
        let (conn, server) = pair();
        let (read, mut write) = tokio::io::split(server);

        let server_task = tokio::spawn(async move {
            let mut lines = BufReader::new(read).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(req["method"], "model/list");
            assert!(req.get("jsonrpc").is_none());
            let reply = json!({"id": req["id"], "result": {"data": []}});
            write
                .write_all(format!("{}\n", reply).as_bytes())
                .await
                .unwrap();
        });

        let result: Value = conn.call("model/list", &json!({})).await.unwrap();
        assert_eq!(result, json!({"data": []}));
        assert!(conn.inner.state().pending.is_empty());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (conn, _server) = pair();
        let deadline = Instant::now() + Duration::from_millis(30);
        let err = conn
            .call_until::<_, Value>("thread/start", &json!({}), deadline, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(conn.inner.state().pending.is_empty());
    }

    #[tokio::test]
    async fn test_eof_fails_later_calls() {
        let (conn, server) = pair();
        drop(server);

        let err = conn
            .call::<_, Value>("thread/start", &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_unknown_turn_is_inactive() {
        let (conn, _server) = pair();
        let err = conn.cancel_turn("th_1", "t_1").await.unwrap_err();
        assert!(matches!(err, Error::TurnInactive(ref id) if id == "t_1"));
    }

    #[test]
    fn test_failure_reason_is_not_rewrapped() {
        let err = Error::Transport("read failed: broken pipe".to_string());
        assert_eq!(failure_reason(&err), "read failed: broken pipe");
        assert_eq!(
            Error::Transport(failure_reason(&err)).to_string(),
            err.to_string()
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (conn, _server) = pair();
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        let err = conn
            .notify(methods::INITIALIZED, &json!({}))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
