//! Stratum v1 client implementation.
//!
//! Manages the connection lifecycle, protocol state, and event emission:
//! Disconnected -> Connecting -> Subscribed -> Authorized -> Mining, with
//! any error or remote close falling back to Disconnected (the caller
//! owns reconnect policy).
//!
//! Handles Stratum's interleaved message pattern where notifications can
//! arrive between request/response pairs. During setup (subscribe /
//! authorize) and share submission, notifications are processed inline
//! while waiting for the matching response.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, Transport};
use super::error::{StratumError, StratumResult};
use super::messages::{ClientCommand, ClientEvent, JobNotification, JsonRpcMessage, SubmitParams};
use crate::job::Job;
use crate::target::{decode_set_target, difficulty_to_target, target_to_difficulty};
use crate::tracing::prelude::*;
use crate::u256::U256;

/// Pool connection configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool host name or address
    pub host: String,

    /// Pool TCP port
    pub port: u16,

    /// Worker username, `wallet` or `wallet.worker`
    pub username: String,

    /// Worker password
    pub password: String,

    /// User agent string sent with mining.subscribe
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 0,
            username: String::new(),
            password: "x".to_string(),
            user_agent: concat!("verusmine/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Protocol state after successful subscription.
#[derive(Debug)]
struct ProtocolState {
    /// Decoded extranonce1 from the subscription
    extranonce1: Vec<u8>,

    /// Extranonce2 size in bytes
    extranonce2_size: usize,

    /// Current difficulty; fallback target source when the pool never
    /// sends mining.set_target
    difficulty: f64,

    /// Explicit target from mining.set_target, if any
    target: Option<U256>,
}

impl ProtocolState {
    /// Target jobs should be checked against right now.
    fn current_target(&self) -> U256 {
        self.target
            .unwrap_or_else(|| difficulty_to_target(self.difficulty))
    }
}

/// Stratum v1 client.
///
/// Owns one connection attempt: handshake, then the main event loop
/// forwarding jobs and share results through the event channel and
/// draining submit commands from the engine.
pub struct StratumV1Client {
    config: PoolConfig,

    /// Where to send events
    event_tx: mpsc::Sender<ClientEvent>,

    /// Shutdown signal
    shutdown: CancellationToken,

    /// Auto-incrementing message ID
    next_id: u64,

    /// Protocol state (filled after subscription)
    state: Option<ProtocolState>,
}

impl StratumV1Client {
    /// Create a new Stratum v1 client.
    pub fn new(
        config: PoolConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            shutdown,
            next_id: 1,
            state: None,
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn emit(&self, event: ClientEvent) -> StratumResult<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|_| StratumError::Disconnected)
    }

    /// Send a request and wait for its response.
    ///
    /// Sends the request and then loops reading messages from the
    /// connection, handling notifications along the way, until the
    /// response arrives. This handles Stratum's message interleaving.
    ///
    /// Times out after `timeout_dur` if no response is received. Responds
    /// immediately to shutdown requests.
    async fn send_request(
        &mut self,
        conn: &mut dyn Transport,
        method: &str,
        params: serde_json::Value,
        timeout_dur: Duration,
    ) -> StratumResult<JsonRpcMessage> {
        use tokio::time::timeout;

        let id = self.next_id();

        let msg = JsonRpcMessage::request(id, method, params);
        conn.write_message(&msg).await?;

        timeout(timeout_dur, async {
            loop {
                tokio::select! {
                    result = conn.read_message() => {
                        let msg = result?.ok_or(StratumError::Disconnected)?;

                        match msg {
                            JsonRpcMessage::Response { id: resp_id, .. } if resp_id == id => {
                                return Ok(msg);
                            }
                            JsonRpcMessage::Response { id: other_id, .. } => {
                                warn!(msg_id = other_id, "Received response for different request");
                            }
                            JsonRpcMessage::Request { id: None, method, params } => {
                                if let Err(e) = self.handle_notification(&method, &params).await {
                                    if matches!(e, StratumError::Disconnected) {
                                        return Err(e);
                                    }
                                    warn!(error = %e, "Error handling notification during request");
                                }
                            }
                            JsonRpcMessage::Request { id: Some(_), method, .. } => {
                                warn!(method = %method, "Server sent request while awaiting response");
                            }
                        }
                    }

                    _ = self.shutdown.cancelled() => {
                        return Err(StratumError::Disconnected);
                    }
                }
            }
        })
        .await
        .map_err(|_| StratumError::Timeout)?
    }

    /// Subscribe to mining notifications.
    ///
    /// Sends `mining.subscribe` and waits for the response containing
    /// extranonce1 and extranonce2_size, processing any interleaved
    /// notifications in order.
    async fn subscribe(&mut self, conn: &mut dyn Transport) -> StratumResult<()> {
        use serde_json::json;

        let response = self
            .send_request(
                conn,
                "mining.subscribe",
                json!([&self.config.user_agent]),
                Duration::from_secs(30),
            )
            .await?;

        match response {
            JsonRpcMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => {
                // Result is an array: [[subscriptions...], extranonce1, extranonce2_size]
                let arr = result.as_array().ok_or_else(|| {
                    StratumError::InvalidMessage("subscribe result not an array".to_string())
                })?;

                if arr.len() < 3 {
                    return Err(StratumError::InvalidMessage(
                        "subscribe result too short".to_string(),
                    ));
                }

                let extranonce1_hex = arr[1].as_str().ok_or_else(|| {
                    StratumError::InvalidMessage("extranonce1 not a string".to_string())
                })?;
                let extranonce1 = hex::decode(extranonce1_hex).map_err(|e| {
                    StratumError::InvalidMessage(format!("Invalid extranonce1: {e}"))
                })?;

                let extranonce2_size = arr[2].as_u64().ok_or_else(|| {
                    StratumError::InvalidMessage("extranonce2_size not a number".to_string())
                })? as usize;

                self.state = Some(ProtocolState {
                    extranonce1,
                    extranonce2_size,
                    difficulty: 1.0,
                    target: None,
                });

                Ok(())
            }
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => Err(StratumError::SubscriptionFailed(format!("{error:?}"))),
            _ => Err(StratumError::UnexpectedResponse(
                "Invalid subscribe response".to_string(),
            )),
        }
    }

    /// Authorize with the pool.
    ///
    /// Success is `result: true`, or a null/absent error when the pool
    /// answers with something other than a boolean result.
    async fn authorize(&mut self, conn: &mut dyn Transport) -> StratumResult<()> {
        use serde_json::json;

        let response = self
            .send_request(
                conn,
                "mining.authorize",
                json!([&self.config.username, &self.config.password]),
                Duration::from_secs(30),
            )
            .await?;

        match response {
            JsonRpcMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => {
                let authorized = result.as_bool().unwrap_or(true);
                if authorized {
                    Ok(())
                } else {
                    Err(StratumError::AuthorizationFailed(
                        "Pool returned false".to_string(),
                    ))
                }
            }
            JsonRpcMessage::Response {
                result: None,
                error: None,
                ..
            } => Ok(()),
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => Err(StratumError::AuthorizationFailed(format!("{error:?}"))),
            _ => Err(StratumError::UnexpectedResponse(
                "Invalid authorize response".to_string(),
            )),
        }
    }

    /// Submit a share to the pool.
    ///
    /// Waits for acceptance/rejection inline and emits ShareAccepted or
    /// ShareRejected based on the pool response.
    async fn submit(
        &mut self,
        conn: &mut dyn Transport,
        params: SubmitParams,
    ) -> StratumResult<bool> {
        use serde_json::Value;

        let job_id = params.job_id.clone();
        let wire = params.to_stratum_params(&self.config.username);
        let response = self
            .send_request(conn, "mining.submit", Value::Array(wire), Duration::from_secs(30))
            .await?;

        match response {
            JsonRpcMessage::Response {
                result: Some(result),
                error: None,
                ..
            } => {
                let accepted = result.as_bool().unwrap_or(false);
                if accepted {
                    self.emit(ClientEvent::ShareAccepted { job_id }).await?;
                } else {
                    self.emit(ClientEvent::ShareRejected {
                        job_id,
                        reason: "Pool returned false".to_string(),
                    })
                    .await?;
                }
                Ok(accepted)
            }
            JsonRpcMessage::Response {
                error: Some(error), ..
            } => {
                // Error format: [error_code, "error message", null]
                let reason = if let Some(arr) = error.as_array() {
                    arr.get(1)
                        .and_then(|v| v.as_str())
                        .unwrap_or("Unknown error")
                        .to_string()
                } else {
                    format!("{error:?}")
                };

                self.emit(ClientEvent::ShareRejected { job_id, reason }).await?;
                Ok(false)
            }
            _ => Err(StratumError::UnexpectedResponse(
                "Invalid submit response".to_string(),
            )),
        }
    }

    /// Handle a notification from the pool.
    async fn handle_notification(
        &mut self,
        method: &str,
        params: &serde_json::Value,
    ) -> StratumResult<()> {
        match method {
            "mining.notify" => self.handle_mining_notify(params).await?,
            "mining.set_difficulty" => self.handle_set_difficulty(params).await?,
            "mining.set_target" => self.handle_set_target(params).await?,
            "mining.set_extranonce" => self.handle_set_extranonce(params)?,
            "client.reconnect" => {
                // Pool is requesting reconnect - treat as disconnection
                return Err(StratumError::Disconnected);
            }
            _ => {
                warn!(method = %method, "Unknown notification method");
            }
        }
        Ok(())
    }

    /// Handle mining.notify: build a [`Job`] and publish it.
    ///
    /// A malformed notification is discarded without disconnecting.
    async fn handle_mining_notify(&mut self, params: &serde_json::Value) -> StratumResult<()> {
        let arr = params.as_array().ok_or_else(|| {
            StratumError::InvalidMessage("mining.notify params not an array".to_string())
        })?;

        let notif = JobNotification::from_stratum_params(arr)
            .map_err(|e| StratumError::InvalidMessage(format!("Failed to parse job: {e}")))?;

        let state = self.state.as_ref().ok_or_else(|| {
            StratumError::InvalidMessage("mining.notify before subscribe".to_string())
        })?;

        let job = Job::from_notification(
            &notif,
            &state.extranonce1,
            state.current_target(),
            state.difficulty,
        )
        .map_err(|e| StratumError::InvalidMessage(format!("Failed to build job: {e}")))?;

        self.emit(ClientEvent::NewJob(job)).await
    }

    /// Handle mining.set_difficulty: one positional numeric parameter.
    async fn handle_set_difficulty(&mut self, params: &serde_json::Value) -> StratumResult<()> {
        let arr = params.as_array().ok_or_else(|| {
            StratumError::InvalidMessage("set_difficulty params not an array".to_string())
        })?;

        let difficulty = arr
            .first()
            .and_then(|v| v.as_f64())
            .ok_or_else(|| StratumError::InvalidMessage("difficulty not a number".to_string()))?;

        if difficulty <= 0.0 {
            return Err(StratumError::InvalidMessage(format!(
                "non-positive difficulty {difficulty}"
            )));
        }

        if let Some(state) = &mut self.state {
            state.difficulty = difficulty;
        }

        self.emit(ClientEvent::DifficultyChanged(difficulty)).await
    }

    /// Handle mining.set_target: one positional 64-char hex parameter,
    /// big-endian on the wire. The difficulty mirror is derived for
    /// display only.
    async fn handle_set_target(&mut self, params: &serde_json::Value) -> StratumResult<()> {
        let arr = params.as_array().ok_or_else(|| {
            StratumError::InvalidMessage("set_target params not an array".to_string())
        })?;

        let target_hex = arr
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| StratumError::InvalidMessage("target not a string".to_string()))?;

        let target = decode_set_target(target_hex).map_err(StratumError::InvalidMessage)?;
        let difficulty = target_to_difficulty(target);

        if let Some(state) = &mut self.state {
            state.target = Some(target);
            state.difficulty = difficulty;
        }

        debug!(pool_target = %&target_hex[..16], difficulty, "Target set");
        self.emit(ClientEvent::DifficultyChanged(difficulty)).await
    }

    /// Handle mining.set_extranonce: `[extranonce1_hex, extranonce2_size]`.
    fn handle_set_extranonce(&mut self, params: &serde_json::Value) -> StratumResult<()> {
        let arr = params.as_array().ok_or_else(|| {
            StratumError::InvalidMessage("set_extranonce params not an array".to_string())
        })?;

        let extranonce1_hex = arr
            .first()
            .and_then(|v| v.as_str())
            .ok_or_else(|| StratumError::InvalidMessage("extranonce1 not a string".to_string()))?;
        let extranonce1 = hex::decode(extranonce1_hex)
            .map_err(|e| StratumError::InvalidMessage(format!("extranonce1 hex: {e}")))?;

        if let Some(state) = &mut self.state {
            info!(extranonce1 = %extranonce1_hex, "Extranonce updated");
            state.extranonce1 = extranonce1;
            if let Some(size) = arr.get(1).and_then(|v| v.as_u64()) {
                state.extranonce2_size = size as usize;
            }
        }
        Ok(())
    }

    /// Connect to the pool and run the client until disconnect or
    /// shutdown.
    pub async fn run(
        self,
        commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> StratumResult<()> {
        let conn = Connection::connect(&self.config.host, self.config.port).await?;
        self.run_with_transport(conn, commands).await
    }

    /// Run the client over a pre-established transport.
    ///
    /// Performs the Stratum handshake (subscribe, authorize), then enters
    /// the main event loop to handle notifications and submit shares.
    pub(crate) async fn run_with_transport(
        mut self,
        mut conn: impl Transport,
        commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ) -> StratumResult<()> {
        debug!("Subscribing to pool");
        self.subscribe(&mut conn).await?;

        let state = self.state.as_ref().expect("state set by subscribe");
        debug!(
            extranonce1 = %hex::encode(&state.extranonce1),
            extranonce2_size = state.extranonce2_size,
            "Subscribed"
        );

        self.emit(ClientEvent::Subscribed {
            extranonce1: state.extranonce1.clone(),
            extranonce2_size: state.extranonce2_size,
        })
        .await?;

        self.authorize(&mut conn).await?;
        debug!(username = %self.config.username, "Authorized");

        loop {
            tokio::select! {
                msg = conn.read_message() => {
                    match msg {
                        Ok(Some(msg)) => {
                            match msg {
                                JsonRpcMessage::Request { id: None, method, params } => {
                                    if let Err(e) = self.handle_notification(&method, &params).await {
                                        if matches!(e, StratumError::Disconnected) {
                                            self.emit(ClientEvent::Disconnected).await.ok();
                                            return Err(e);
                                        }
                                        // Malformed notifications (JobInvalid
                                        // included) are dropped, not fatal.
                                        warn!(error = %e, "Error handling notification");
                                    }
                                }
                                JsonRpcMessage::Response { id, .. } => {
                                    // Responses are consumed inline by submit();
                                    // anything else is a stray.
                                    debug!(msg_id = id, "Received unexpected response in main loop");
                                }
                                JsonRpcMessage::Request { id: Some(_), method, .. } => {
                                    warn!(method = %method, "Server sent request (not notification)");
                                }
                            }
                        }
                        Ok(None) => {
                            info!("Connection closed by pool");
                            self.emit(ClientEvent::Disconnected).await.ok();
                            return Err(StratumError::Disconnected);
                        }
                        Err(e) => {
                            // Protocol violations disconnect; the caller
                            // reconnects after backoff.
                            self.emit(ClientEvent::Disconnected).await.ok();
                            return Err(e);
                        }
                    }
                }

                cmd = commands.recv() => {
                    match cmd {
                        Some(ClientCommand::SubmitShare(params)) => {
                            debug!(job_id = %params.job_id, "Submitting share");
                            if let Err(e) = self.submit(&mut conn, params).await {
                                warn!(error = %e, "Failed to submit share");
                                if matches!(e, StratumError::Disconnected | StratumError::Io(_)) {
                                    self.emit(ClientEvent::Disconnected).await.ok();
                                    return Err(e);
                                }
                            }
                        }
                        None => {
                            // Engine side went away; treat as shutdown.
                            return Ok(());
                        }
                    }
                }

                _ = self.shutdown.cancelled() => {
                    self.emit(ClientEvent::Disconnected).await.ok();
                    return Ok(());
                }
            }
        }
    }
}
