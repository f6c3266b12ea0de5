//! Per-turn demultiplexing of server notifications.
//!
//! The connection's dispatch loop hands every notification to the
//! [`Router`], which looks up the turn id and pushes the event onto that
//! turn's queue. A [`TurnStream`] is the consuming side: it drains the queue
//! in order and turns raw notifications into [`ConversationStep`]s.

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::io::{ChatResult, ConversationStep, StepType, ThreadItem, TurnState};
use crate::protocol::{
    methods, ErrorNotification, ItemCompletedNotification, ItemDeltaNotification,
    ItemStartedNotification, TurnCompletedNotification, TurnFailedNotification,
    TurnStartedNotification, TurnStatus,
};
use log::{debug, warn};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Events held per thread while a `turn/start` for it is in flight.
pub(crate) const EARLY_EVENT_LIMIT: usize = 256;

/// A notification routed to one turn.
#[derive(Debug, Clone)]
pub(crate) struct TurnEvent {
    pub method: String,
    pub params: Value,
}

impl TurnEvent {
    fn delta_item_id(&self) -> Option<&str> {
        if !methods::is_delta(&self.method) {
            return None;
        }
        self.params.get("itemId").and_then(Value::as_str)
    }

    /// Fold a following delta for the same item and method into this one.
    fn absorb(&mut self, next: &TurnEvent) -> bool {
        let Some(item_id) = next.delta_item_id() else {
            return false;
        };
        if self.method != next.method || self.delta_item_id() != Some(item_id) {
            return false;
        }
        let Some(more) = next.params.get("delta").and_then(Value::as_str) else {
            return false;
        };
        match self.params.get_mut("delta") {
            Some(Value::String(delta)) => {
                delta.push_str(more);
                true
            }
            _ => false,
        }
    }
}

/// Why a turn stopped before its terminal notification.
#[derive(Debug, Clone)]
pub(crate) enum Interrupt {
    Cancelled,
    Closed(String),
}

#[derive(Default)]
struct TurnQueue {
    events: VecDeque<TurnEvent>,
    interrupt: Option<Interrupt>,
    /// Deltas are queued as they arrive instead of being held per item.
    include_deltas: bool,
    /// Coalesced deltas per `(item id, method)` for items still streaming.
    streaming: HashMap<(String, String), TurnEvent>,
}

impl TurnQueue {
    fn enqueue(&mut self, event: TurnEvent) {
        if let Some(item_id) = event.delta_item_id().map(str::to_string) {
            if self.include_deltas {
                let absorbed = self
                    .events
                    .iter_mut()
                    .rev()
                    .take_while(|queued| queued.delta_item_id().is_some())
                    .any(|queued| queued.absorb(&event));
                if !absorbed {
                    self.events.push_back(event);
                }
            } else {
                let key = (item_id, event.method.clone());
                match self.streaming.get_mut(&key) {
                    Some(held) => {
                        held.absorb(&event);
                    }
                    None => {
                        self.streaming.insert(key, event);
                    }
                }
            }
            return;
        }

        if event.method == methods::ITEM_COMPLETED {
            let item_id = event
                .params
                .get("item")
                .and_then(|item| item.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string);
            if let Some(item_id) = item_id {
                self.flush_item(&item_id);
            }
        }
        self.events.push_back(event);
    }

    /// Move the held deltas of one item into the queue.
    fn flush_item(&mut self, item_id: &str) {
        let mut keys: Vec<_> = self
            .streaming
            .keys()
            .filter(|(id, _)| id == item_id)
            .cloned()
            .collect();
        keys.sort();
        for key in keys {
            if let Some(held) = self.streaming.remove(&key) {
                self.events.push_back(held);
            }
        }
    }
}

/// Routing-side state of one turn: its queue and a wakeup for the consumer.
pub(crate) struct TurnShared {
    thread_id: String,
    turn_id: String,
    queue: Mutex<TurnQueue>,
    wake: Notify,
}

impl TurnShared {
    pub(crate) fn new(thread_id: impl Into<String>, turn_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turn_id: turn_id.into(),
            queue: Mutex::new(TurnQueue::default()),
            wake: Notify::new(),
        }
    }

    pub(crate) fn turn_id(&self) -> &str {
        &self.turn_id
    }

    fn lock(&self) -> MutexGuard<'_, TurnQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event.
    ///
    /// Deltas never add one queue entry per frame: until deltas are
    /// requested they are held per item and released just before that
    /// item's `item/completed`; afterwards a run of deltas for the same item
    /// collapses into one entry.
    pub(crate) fn push(&self, event: TurnEvent) {
        {
            let mut queue = self.lock();
            if queue.interrupt.is_some() {
                return;
            }
            queue.enqueue(event);
        }
        self.wake.notify_one();
    }

    /// Queue deltas as they arrive from now on, releasing any held ones.
    pub(crate) fn include_deltas(&self) {
        {
            let mut queue = self.lock();
            queue.include_deltas = true;
            let mut held: Vec<_> = queue.streaming.drain().collect();
            held.sort_by(|a, b| a.0.cmp(&b.0));
            queue.events.extend(held.into_iter().map(|(_, event)| event));
        }
        self.wake.notify_one();
    }

    /// Stop the turn. The first interrupt wins.
    pub(crate) fn interrupt(&self, interrupt: Interrupt) {
        {
            let mut queue = self.lock();
            if queue.interrupt.is_none() {
                queue.interrupt = Some(interrupt);
            }
            queue.streaming.clear();
        }
        self.wake.notify_one();
    }

    #[cfg(test)]
    fn queued(&self) -> usize {
        self.lock().events.len()
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.lock().streaming.len()
    }
}

#[derive(Default)]
struct EarlyEvents {
    starts: usize,
    events: VecDeque<(String, TurnEvent)>,
}

/// Turn id → queue table, plus the per-thread early-event buffers.
#[derive(Default)]
pub(crate) struct Router {
    turns: HashMap<String, Arc<TurnShared>>,
    starting: HashMap<String, EarlyEvents>,
}

/// `params.turnId`, else `params.turn.id`.
pub(crate) fn turn_id_of(params: &Value) -> Option<&str> {
    params
        .get("turnId")
        .and_then(Value::as_str)
        .or_else(|| params.get("turn")?.get("id")?.as_str())
}

impl Router {
    pub(crate) fn route(&mut self, method: String, params: Value) {
        let Some(turn_id) = turn_id_of(&params).map(str::to_string) else {
            debug!("[ROUTER] Ignoring {} (no turn id)", method);
            return;
        };
        let event = TurnEvent { method, params };

        if let Some(turn) = self.turns.get(&turn_id) {
            turn.push(event);
            return;
        }

        let thread_id = event.params.get("threadId").and_then(Value::as_str);
        if let Some(early) = thread_id.and_then(|t| self.starting.get_mut(t)) {
            if early.events.len() >= EARLY_EVENT_LIMIT {
                if let Some((dropped_turn, dropped)) = early.events.pop_front() {
                    warn!(
                        "[ROUTER] Early event buffer full, dropping {} for turn {}",
                        dropped.method, dropped_turn
                    );
                }
            }
            early.events.push_back((turn_id, event));
            return;
        }

        debug!(
            "[ROUTER] Dropping {} for inactive turn {}",
            event.method, turn_id
        );
    }

    pub(crate) fn begin_start(&mut self, thread_id: &str) {
        self.starting.entry(thread_id.to_string()).or_default().starts += 1;
    }

    pub(crate) fn end_start(&mut self, thread_id: &str) {
        if let Some(early) = self.starting.get_mut(thread_id) {
            early.starts = early.starts.saturating_sub(1);
            if early.starts == 0 {
                self.starting.remove(thread_id);
            }
        }
    }

    /// Register a turn, moving any early events for it into its queue.
    pub(crate) fn register(&mut self, turn: Arc<TurnShared>) {
        if let Some(early) = self.starting.get_mut(&turn.thread_id) {
            let (mine, rest): (VecDeque<_>, VecDeque<_>) = early
                .events
                .drain(..)
                .partition(|(turn_id, _)| *turn_id == turn.turn_id);
            early.events = rest;
            for (_, event) in mine {
                turn.push(event);
            }
        }
        self.turns.insert(turn.turn_id.clone(), turn);
    }

    pub(crate) fn remove(&mut self, turn_id: &str) -> Option<Arc<TurnShared>> {
        self.turns.remove(turn_id)
    }

    /// Remove `turn` only if it is still the registered route for its id.
    pub(crate) fn remove_if_same(&mut self, turn: &Arc<TurnShared>) {
        if self
            .turns
            .get(&turn.turn_id)
            .is_some_and(|current| Arc::ptr_eq(current, turn))
        {
            self.turns.remove(&turn.turn_id);
        }
    }

    pub(crate) fn is_active(&self, turn_id: &str) -> bool {
        self.turns.contains_key(turn_id)
    }

    /// End every open turn with a transport failure.
    pub(crate) fn close_all(&mut self, reason: &str) {
        for (_, turn) in self.turns.drain() {
            turn.interrupt(Interrupt::Closed(reason.to_string()));
        }
        self.starting.clear();
    }

    #[cfg(test)]
    fn early_len(&self, thread_id: &str) -> usize {
        self.starting.get(thread_id).map_or(0, |e| e.events.len())
    }
}

enum Next {
    Event(TurnEvent),
    Interrupted(Interrupt),
    TimedOut,
}

/// Ordered, finite sequence of steps for one turn.
///
/// Obtained from [`ThreadHandle::chat`](crate::ThreadHandle::chat). Steps are
/// produced lazily by [`next`](TurnStream::next); the sequence ends after the
/// turn's terminal step, on cancellation, on the turn deadline, or when the
/// connection fails. Dropping the stream unregisters the turn.
///
/// Delta steps are folded into the completed item by default; call
/// [`with_deltas`](TurnStream::with_deltas) to receive them as well.
pub struct TurnStream {
    connection: Connection,
    shared: Arc<TurnShared>,
    deadline: Instant,
    timeout: Duration,
    include_deltas: bool,
    state: TurnState,
    finished: bool,
    item_types: HashMap<String, String>,
    streamed: HashMap<String, String>,
    last_error: Option<String>,
}

impl TurnStream {
    pub(crate) fn new(
        connection: Connection,
        shared: Arc<TurnShared>,
        deadline: Instant,
        timeout: Duration,
    ) -> Self {
        Self {
            connection,
            shared,
            deadline,
            timeout,
            include_deltas: false,
            state: TurnState::Pending,
            finished: false,
            item_types: HashMap::new(),
            streamed: HashMap::new(),
            last_error: None,
        }
    }

    /// Yield delta steps as they arrive in addition to completed items.
    pub fn with_deltas(mut self) -> Self {
        self.include_deltas = true;
        self.shared.include_deltas();
        self
    }

    pub fn thread_id(&self) -> &str {
        &self.shared.thread_id
    }

    pub fn turn_id(&self) -> &str {
        &self.shared.turn_id
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Cancel this turn: the stream ends and `turn/interrupt` is sent.
    pub async fn cancel(&self) -> Result<()> {
        self.canceller().cancel().await
    }

    /// A handle that can cancel this turn from another task.
    pub fn canceller(&self) -> TurnCanceller {
        TurnCanceller {
            connection: self.connection.clone(),
            thread_id: self.shared.thread_id.clone(),
            turn_id: self.shared.turn_id.clone(),
        }
    }

    /// Get the next step, or `None` once the turn has ended.
    pub async fn next(&mut self) -> Option<Result<ConversationStep>> {
        loop {
            if self.finished {
                return None;
            }
            let event = match self.next_event().await {
                Next::Event(event) => event,
                Next::Interrupted(Interrupt::Cancelled) => {
                    self.finish(TurnState::Cancelled);
                    return None;
                }
                Next::Interrupted(Interrupt::Closed(reason)) => {
                    self.finish(TurnState::Failed);
                    return Some(Err(Error::Transport(reason)));
                }
                Next::TimedOut => {
                    self.finish(TurnState::Failed);
                    return Some(Err(Error::Timeout {
                        operation: format!("turn {}", self.shared.turn_id),
                        timeout: self.timeout,
                    }));
                }
            };
            if let Some(result) = self.handle(event) {
                return Some(result);
            }
        }
    }

    /// Drain the remaining steps into a [`ChatResult`].
    pub async fn collect(mut self) -> Result<ChatResult> {
        let mut steps = Vec::new();
        while let Some(step) = self.next().await {
            steps.push(step?);
        }
        Ok(ChatResult::from_steps(
            self.shared.thread_id.clone(),
            self.shared.turn_id.clone(),
            steps,
            self.state,
        ))
    }

    async fn next_event(&self) -> Next {
        loop {
            {
                let mut queue = self.shared.lock();
                if let Some(interrupt) = &queue.interrupt {
                    return Next::Interrupted(interrupt.clone());
                }
                if let Some(event) = queue.events.pop_front() {
                    return Next::Event(event);
                }
            }
            if tokio::time::timeout_at(self.deadline, self.shared.wake.notified())
                .await
                .is_err()
            {
                return Next::TimedOut;
            }
        }
    }

    fn handle(&mut self, event: TurnEvent) -> Option<Result<ConversationStep>> {
        let TurnEvent { method, params } = event;
        if self.state == TurnState::Pending {
            self.state = TurnState::Active;
        }

        match method.as_str() {
            m if methods::is_delta(m) => self.on_delta(m, params),
            methods::ITEM_STARTED => {
                match serde_json::from_value::<ItemStartedNotification>(params) {
                    Ok(notif) => {
                        let item = notif.item;
                        if let (Some(id), Some(kind)) = (item.id(), item.item_type()) {
                            self.item_types.insert(id.to_string(), kind.to_string());
                        }
                    }
                    Err(e) => warn!("[TURN] Malformed item/started notification: {}", e),
                }
                None
            }
            methods::ITEM_COMPLETED => self.on_item_completed(params),
            methods::TURN_COMPLETED => self.on_turn_completed(params),
            methods::TURN_FAILED => {
                let message = serde_json::from_value::<TurnFailedNotification>(params.clone())
                    .ok()
                    .and_then(|n| n.message().map(str::to_string));
                Some(Err(self.fail(message, params)))
            }
            methods::ERROR => {
                match serde_json::from_value::<ErrorNotification>(params) {
                    Ok(notif) if !notif.will_retry => self.last_error = Some(notif.message()),
                    Ok(notif) => debug!("[TURN] Server retrying after: {}", notif.message()),
                    Err(e) => warn!("[TURN] Malformed error notification: {}", e),
                }
                None
            }
            methods::TURN_STARTED => {
                match serde_json::from_value::<TurnStartedNotification>(params) {
                    Ok(notif) => debug!(
                        "[TURN] Turn {} started on {} ({:?})",
                        notif.turn.id, notif.thread_id, notif.turn.status
                    ),
                    Err(e) => warn!("[TURN] Malformed turn/started notification: {}", e),
                }
                None
            }
            other => {
                debug!("[TURN] Ignoring {} for turn {}", other, self.shared.turn_id);
                None
            }
        }
    }

    fn on_delta(&mut self, method: &str, params: Value) -> Option<Result<ConversationStep>> {
        let delta: ItemDeltaNotification = match serde_json::from_value(params.clone()) {
            Ok(d) => d,
            Err(e) => {
                warn!("[TURN] Malformed {} notification: {}", method, e);
                return None;
            }
        };
        self.streamed
            .entry(delta.item_id.clone())
            .or_default()
            .push_str(&delta.delta);

        if !self.include_deltas {
            return None;
        }
        let item_type = self
            .item_types
            .get(&delta.item_id)
            .cloned()
            .or_else(|| item_type_for_delta(method).map(str::to_string));
        Some(Ok(self.step(
            StepType::Delta,
            item_type,
            Some(delta.item_id),
            Some(delta.delta),
            None,
            params,
        )))
    }

    fn on_item_completed(&mut self, params: Value) -> Option<Result<ConversationStep>> {
        let notif: ItemCompletedNotification = match serde_json::from_value(params.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!("[TURN] Malformed item/completed notification: {}", e);
                return None;
            }
        };
        let item = notif.item;
        let item_id = item.id().map(str::to_string);
        let streamed = item_id.as_ref().and_then(|id| self.streamed.remove(id));
        if let Some(id) = &item_id {
            self.item_types.remove(id);
        }

        if matches!(item, ThreadItem::UserMessage(_)) {
            return None;
        }

        let delta_mismatch = match (streamed.as_deref(), item.streamed_text()) {
            (Some(streamed), Some(full)) => !full.starts_with(streamed),
            _ => false,
        };
        if delta_mismatch {
            warn!(
                "[TURN] Streamed deltas for item {} disagree with its completed content",
                item_id.as_deref().unwrap_or("?")
            );
        }

        let mut step = self.step(
            StepType::Completed,
            item.item_type().map(str::to_string),
            item_id,
            item.text(),
            Some(item),
            params,
        );
        step.delta_mismatch = delta_mismatch;
        Some(Ok(step))
    }

    fn on_turn_completed(&mut self, params: Value) -> Option<Result<ConversationStep>> {
        let notif: TurnCompletedNotification = match serde_json::from_value(params.clone()) {
            Ok(n) => n,
            Err(e) => {
                warn!("[TURN] Malformed turn/completed notification: {}", e);
                return None;
            }
        };
        match notif.turn.status {
            TurnStatus::Failed => {
                let message = notif.turn.error.map(|e| e.message);
                Some(Err(self.fail(message, params)))
            }
            TurnStatus::Interrupted => {
                debug!("[TURN] Turn {} interrupted", self.shared.turn_id);
                self.finish(TurnState::Cancelled);
                None
            }
            _ => {
                self.finish(TurnState::Completed);
                Some(Ok(self.step(
                    StepType::TurnCompleted,
                    None,
                    None,
                    None,
                    None,
                    params,
                )))
            }
        }
    }

    fn fail(&mut self, message: Option<String>, params: Value) -> Error {
        self.finish(TurnState::Failed);
        let message = message
            .or_else(|| self.last_error.take())
            .unwrap_or_else(|| format!("turn {} failed", self.shared.turn_id));
        Error::Protocol {
            code: None,
            message,
            data: Some(params),
        }
    }

    fn step(
        &self,
        step_type: StepType,
        item_type: Option<String>,
        item_id: Option<String>,
        text: Option<String>,
        item: Option<ThreadItem>,
        data: Value,
    ) -> ConversationStep {
        ConversationStep {
            thread_id: self.shared.thread_id.clone(),
            turn_id: self.shared.turn_id.clone(),
            step_type,
            item_type,
            item_id,
            text,
            item,
            delta_mismatch: false,
            data,
        }
    }

    fn finish(&mut self, state: TurnState) {
        self.finished = true;
        self.state = state;
        self.connection.unregister_turn(&self.shared);
    }
}

impl Drop for TurnStream {
    fn drop(&mut self) {
        if !self.finished {
            self.connection.unregister_turn(&self.shared);
        }
    }
}

fn item_type_for_delta(method: &str) -> Option<&'static str> {
    match method {
        methods::AGENT_MESSAGE_DELTA => Some("agentMessage"),
        methods::CMD_OUTPUT_DELTA => Some("commandExecution"),
        methods::FILE_CHANGE_OUTPUT_DELTA => Some("fileChange"),
        methods::REASONING_SUMMARY_DELTA | methods::REASONING_TEXT_DELTA => Some("reasoning"),
        _ => None,
    }
}

/// Cancels one turn from anywhere; cloneable and `Send`.
#[derive(Clone)]
pub struct TurnCanceller {
    connection: Connection,
    thread_id: String,
    turn_id: String,
}

impl TurnCanceller {
    /// Cancel the turn. Fails with [`Error::TurnInactive`] if it already ended.
    pub async fn cancel(&self) -> Result<()> {
        self.connection
            .cancel_turn(&self.thread_id, &self.turn_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delta(item: &str, text: &str) -> TurnEvent {
        TurnEvent {
            method: methods::AGENT_MESSAGE_DELTA.to_string(),
            params: json!({"threadId": "th_1", "turnId": "t_1", "itemId": item, "delta": text}),
        }
    }

    #[test]
    fn test_turn_id_extraction() {
        assert_eq!(turn_id_of(&json!({"turnId": "t_1"})), Some("t_1"));
        assert_eq!(turn_id_of(&json!({"turn": {"id": "t_2"}})), Some("t_2"));
        assert_eq!(turn_id_of(&json!({"threadId": "th_1"})), None);
    }

    fn completed(item: &str, text: &str) -> TurnEvent {
        TurnEvent {
            method: methods::ITEM_COMPLETED.to_string(),
            params: json!({
                "threadId": "th_1",
                "turnId": "t_1",
                "item": {"type": "agentMessage", "id": item, "text": text}
            }),
        }
    }

    #[test]
    fn test_deltas_held_until_item_completes() {
        let turn = TurnShared::new("th_1", "t_1");
        turn.push(delta("m1", "Hel"));
        turn.push(delta("m2", "!"));
        turn.push(delta("m1", "lo"));
        assert_eq!(turn.queued(), 0);
        assert_eq!(turn.held(), 2);

        turn.push(completed("m1", "Hello"));
        assert_eq!(turn.queued(), 2);
        assert_eq!(turn.held(), 1);

        let mut queue = turn.lock();
        let flushed = queue.events.pop_front().unwrap();
        assert_eq!(flushed.params["delta"], "Hello");
        assert_eq!(queue.events.pop_front().unwrap().method, methods::ITEM_COMPLETED);
    }

    #[test]
    fn test_interleaved_deltas_stay_bounded() {
        let turn = TurnShared::new("th_1", "t_1");
        for i in 0..100_000 {
            let item = if i % 2 == 0 { "m1" } else { "m2" };
            turn.push(delta(item, "x"));
        }
        assert_eq!(turn.queued(), 0);
        assert_eq!(turn.held(), 2);

        let streaming = TurnShared::new("th_1", "t_1");
        streaming.include_deltas();
        for i in 0..100_000 {
            let item = if i % 2 == 0 { "m1" } else { "m2" };
            streaming.push(delta(item, "x"));
        }
        assert_eq!(streaming.queued(), 2);
        let first = streaming.lock().events.pop_front().unwrap();
        assert_eq!(first.params["delta"].as_str().unwrap().len(), 50_000);
    }

    #[test]
    fn test_include_deltas_releases_held_deltas() {
        let turn = TurnShared::new("th_1", "t_1");
        turn.push(delta("m1", "Hel"));
        turn.include_deltas();
        assert_eq!(turn.held(), 0);
        assert_eq!(turn.queued(), 1);

        turn.push(delta("m1", "lo"));
        turn.push(delta("m2", "!"));
        turn.push(delta("m1", " again"));
        assert_eq!(turn.queued(), 2);
        let first = turn.lock().events.pop_front().unwrap();
        assert_eq!(first.params["delta"], "Hello again");

        // A non-delta event ends the run.
        turn.push(completed("m2", "!"));
        turn.push(delta("m1", "!"));
        assert_eq!(turn.queued(), 3);
    }

    #[test]
    fn test_push_after_interrupt_is_dropped() {
        let turn = TurnShared::new("th_1", "t_1");
        turn.push(delta("m1", "held"));
        turn.interrupt(Interrupt::Cancelled);
        turn.push(completed("m1", "late"));
        assert_eq!(turn.queued(), 0);
        assert_eq!(turn.held(), 0);
    }

    #[test]
    fn test_router_routes_registered_turn() {
        let mut router = Router::default();
        let turn = Arc::new(TurnShared::new("th_1", "t_1"));
        router.register(turn.clone());

        router.route(
            methods::TURN_STARTED.to_string(),
            json!({"threadId": "th_1", "turn": {"id": "t_1"}}),
        );
        router.route(
            methods::TURN_STARTED.to_string(),
            json!({"threadId": "th_1", "turn": {"id": "other"}}),
        );
        assert_eq!(turn.queued(), 1);
    }

    #[test]
    fn test_early_events_move_to_registered_turn() {
        let mut router = Router::default();
        router.begin_start("th_1");
        router.route(
            methods::TURN_STARTED.to_string(),
            json!({"threadId": "th_1", "turn": {"id": "t_1"}}),
        );
        router.route(
            methods::ITEM_STARTED.to_string(),
            json!({"threadId": "th_1", "turnId": "t_9", "item": {}}),
        );
        assert_eq!(router.early_len("th_1"), 2);

        let turn = Arc::new(TurnShared::new("th_1", "t_1"));
        router.register(turn.clone());
        assert_eq!(turn.queued(), 1);
        assert_eq!(router.early_len("th_1"), 1);

        router.end_start("th_1");
        assert_eq!(router.early_len("th_1"), 0);
    }

    #[test]
    fn test_early_buffer_is_bounded() {
        let mut router = Router::default();
        router.begin_start("th_1");
        for i in 0..(EARLY_EVENT_LIMIT + 10) {
            router.route(
                methods::ITEM_STARTED.to_string(),
                json!({"threadId": "th_1", "turnId": "t_1", "item": {"id": i.to_string()}}),
            );
        }
        assert_eq!(router.early_len("th_1"), EARLY_EVENT_LIMIT);
    }

    #[test]
    fn test_no_buffering_without_start_in_flight() {
        let mut router = Router::default();
        router.route(
            methods::TURN_STARTED.to_string(),
            json!({"threadId": "th_1", "turn": {"id": "t_1"}}),
        );
        assert_eq!(router.early_len("th_1"), 0);
    }

    #[test]
    fn test_close_all_interrupts_turns() {
        let mut router = Router::default();
        let turn = Arc::new(TurnShared::new("th_1", "t_1"));
        router.register(turn.clone());
        router.close_all("gone");

        assert!(!router.is_active("t_1"));
        assert!(matches!(
            turn.lock().interrupt,
            Some(Interrupt::Closed(ref r)) if r == "gone"
        ));
    }

    #[test]
    fn test_remove_if_same_keeps_newer_route() {
        let mut router = Router::default();
        let old = Arc::new(TurnShared::new("th_1", "t_1"));
        let new = Arc::new(TurnShared::new("th_1", "t_1"));
        router.register(old.clone());
        router.register(new.clone());
        router.remove_if_same(&old);
        assert!(router.is_active("t_1"));
        router.remove_if_same(&new);
        assert!(!router.is_active("t_1"));
    }
}
