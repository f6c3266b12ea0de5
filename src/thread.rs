//! Handles bound to one conversation thread.

use crate::connection::Connection;
use crate::error::Result;
use crate::io::{ChatResult, ThreadConfig, TurnOverrides};
use crate::protocol::{
    methods, ThreadArchiveParams, ThreadForkParams, ThreadReadParams, ThreadResponse,
    ThreadSetNameParams, ThreadUpdateDefaultsParams, TurnStartParams, TurnStartResponse,
    UserInput,
};
use crate::turn::TurnStream;
use log::debug;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A thread id plus the defaults applied to every turn started from it.
///
/// Handles are independent: [`fork`](ThreadHandle::fork) copies the
/// defaults, and [`update_defaults`](ThreadHandle::update_defaults) only
/// changes the defaults of later turns from this handle.
pub struct ThreadHandle {
    connection: Connection,
    thread_id: String,
    defaults: ThreadConfig,
    turn_timeout: Duration,
    last_turn_id: Mutex<Option<String>>,
}

impl ThreadHandle {
    pub(crate) fn new(
        connection: Connection,
        thread_id: String,
        defaults: ThreadConfig,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            connection,
            thread_id,
            defaults,
            turn_timeout,
            last_turn_id: Mutex::new(None),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn defaults(&self) -> &ThreadConfig {
        &self.defaults
    }

    pub fn turn_timeout(&self) -> Duration {
        self.turn_timeout
    }

    /// Id of the most recent turn started from this handle.
    pub fn last_turn_id(&self) -> Option<String> {
        self.last_turn_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start a turn and return its step stream.
    ///
    /// The turn timeout starts now and covers both the `turn/start` call and
    /// draining the stream.
    pub async fn chat(&self, prompt: impl Into<String>) -> Result<TurnStream> {
        self.chat_with(prompt, &TurnOverrides::default()).await
    }

    /// Like [`chat`](ThreadHandle::chat), with per-turn overrides.
    pub async fn chat_with(
        &self,
        prompt: impl Into<String>,
        overrides: &TurnOverrides,
    ) -> Result<TurnStream> {
        let deadline = Instant::now() + self.turn_timeout;
        let params = TurnStartParams::new(
            self.thread_id.as_str(),
            vec![UserInput::text(prompt)],
            &self.defaults,
            overrides,
        );

        let reservation = self.connection.begin_turn_start(&self.thread_id);
        let response: TurnStartResponse = self
            .connection
            .call_until(methods::TURN_START, &params, deadline, self.turn_timeout)
            .await?;
        let turn_id = response.turn_id()?;
        let shared = reservation.register(&turn_id)?;
        drop(reservation);

        debug!("[THREAD] Started turn {} on {}", turn_id, self.thread_id);
        *self
            .last_turn_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(turn_id);

        Ok(TurnStream::new(
            self.connection.clone(),
            shared,
            deadline,
            self.turn_timeout,
        ))
    }

    /// Run a turn to completion and return its result.
    pub async fn chat_once(&self, prompt: impl Into<String>) -> Result<ChatResult> {
        self.chat(prompt).await?.collect().await
    }

    /// Like [`chat_once`](ThreadHandle::chat_once), with per-turn overrides.
    pub async fn chat_once_with(
        &self,
        prompt: impl Into<String>,
        overrides: &TurnOverrides,
    ) -> Result<ChatResult> {
        self.chat_with(prompt, overrides).await?.collect().await
    }

    /// Fork the thread server-side. The new handle's defaults are these
    /// defaults with `overrides` applied.
    pub async fn fork(&self, overrides: ThreadConfig) -> Result<ThreadHandle> {
        let defaults = self.defaults.merged(&overrides);
        let params = ThreadForkParams {
            thread_id: self.thread_id.clone(),
            config: defaults.clone(),
        };
        let response: ThreadResponse = self.connection.call(methods::THREAD_FORK, &params).await?;
        let thread_id = response.thread_id()?;
        debug!("[THREAD] Forked {} into {}", self.thread_id, thread_id);
        Ok(ThreadHandle::new(
            self.connection.clone(),
            thread_id,
            defaults,
            self.turn_timeout,
        ))
    }

    /// Send `partial` as `thread/updateDefaults`, then merge it into the
    /// stored defaults for later turns from this handle.
    ///
    /// The stored defaults are unchanged if the server rejects the update.
    pub async fn update_defaults(&mut self, partial: ThreadConfig) -> Result<()> {
        let params = ThreadUpdateDefaultsParams {
            thread_id: self.thread_id.clone(),
            config: partial,
        };
        self.connection
            .call::<_, Value>(methods::THREAD_UPDATE_DEFAULTS, &params)
            .await?;
        self.defaults.update(params.config);
        Ok(())
    }

    pub async fn set_name(&self, name: impl Into<String>) -> Result<()> {
        let params = ThreadSetNameParams {
            thread_id: self.thread_id.clone(),
            name: name.into(),
        };
        self.connection
            .call::<_, Value>(methods::THREAD_SET_NAME, &params)
            .await
            .map(|_| ())
    }

    pub async fn archive(&self) -> Result<()> {
        let params = ThreadArchiveParams {
            thread_id: self.thread_id.clone(),
        };
        self.connection
            .call::<_, Value>(methods::THREAD_ARCHIVE, &params)
            .await
            .map(|_| ())
    }

    /// Raw `thread/read` snapshot.
    pub async fn read(&self, include_turns: bool) -> Result<Value> {
        let params = ThreadReadParams {
            thread_id: self.thread_id.clone(),
            include_turns,
        };
        self.connection.call(methods::THREAD_READ, &params).await
    }

    /// Cancel a turn started on this thread.
    ///
    /// Fails with [`Error::TurnInactive`](crate::Error::TurnInactive) if the
    /// turn already ended, timed out or was cancelled.
    pub async fn cancel(&self, turn_id: &str) -> Result<()> {
        self.connection.cancel_turn(&self.thread_id, turn_id).await
    }
}

impl std::fmt::Debug for ThreadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("thread_id", &self.thread_id)
            .field("defaults", &self.defaults)
            .field("turn_timeout", &self.turn_timeout)
            .finish()
    }
}
