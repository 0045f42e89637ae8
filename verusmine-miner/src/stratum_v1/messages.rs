//! Stratum v1 message types and JSON-RPC serialization.
//!
//! This module defines the wire format for the Verus flavour of Stratum
//! v1 using serde for JSON serialization. Messages follow the JSON-RPC
//! format with some Stratum-specific conventions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::job::{Job, SOLUTION_BODY_LEN, SOLUTION_PREFIX};

/// Events emitted by the Stratum client.
///
/// These events are sent via channel to the client consumer
/// to notify about protocol state changes and new work.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Successfully connected and subscribed to pool
    Subscribed {
        /// Extranonce1 value from subscription
        extranonce1: Vec<u8>,
        /// Extranonce2 size in bytes
        extranonce2_size: usize,
    },

    /// New mining job received from pool
    NewJob(Job),

    /// Pool pushed a new difficulty (or an explicit target, in which
    /// case this carries its difficulty equivalent)
    DifficultyChanged(f64),

    /// Share was accepted by pool
    ShareAccepted {
        /// Job ID that was accepted
        job_id: String,
    },

    /// Share was rejected by pool
    ShareRejected {
        /// Job ID that was rejected
        job_id: String,
        /// Rejection reason from pool
        reason: String,
    },

    /// Disconnected from pool
    Disconnected,

    /// Error occurred (non-fatal, client may continue)
    Error(String),
}

/// Commands sent to the Stratum client.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Submit a share to the pool
    SubmitShare(SubmitParams),
}

/// Raw `mining.notify` payload.
///
/// Verus pools send the header fields as positional hex strings:
/// `[job_id, version, prev_hash, merkle_root, final_sapling_root, ntime,
/// nbits, clean_jobs, solution_template]`. The solution template element
/// is optional; everything before it is required.
#[derive(Debug, Clone)]
pub struct JobNotification {
    /// Unique job identifier, echoed verbatim on submit
    pub job_id: String,

    /// Block version (8 hex chars)
    pub version: String,

    /// Previous block hash (64 hex chars)
    pub prev_hash: String,

    /// Merkle root (64 hex chars)
    pub merkle_root: String,

    /// Final Sapling root, Zcash heritage (64 hex chars)
    pub final_sapling_root: String,

    /// Block timestamp (8 hex chars)
    pub ntime: String,

    /// Encoded difficulty target (8 hex chars)
    pub nbits: String,

    /// If true, abandon all previous jobs
    pub clean_jobs: bool,

    /// Solution template (variable-length hex, may be empty)
    pub solution_template: String,
}

impl JobNotification {
    /// Parse from Stratum JSON array parameters.
    ///
    /// Uses manual parsing for better error context than serde tuple
    /// structs. Fewer than 8 elements is a protocol violation and the
    /// notification is discarded.
    pub fn from_stratum_params(params: &[Value]) -> Result<Self, String> {
        if params.len() < 8 {
            return Err(format!(
                "mining.notify params too short: {} elements",
                params.len()
            ));
        }

        let field = |i: usize, name: &str| -> Result<String, String> {
            params[i]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| format!("{name} not a string"))
        };

        let job_id = field(0, "job_id")?;
        let version = field(1, "version")?;
        let prev_hash = field(2, "prev_hash")?;
        let merkle_root = field(3, "merkle_root")?;
        let final_sapling_root = field(4, "final_sapling_root")?;
        let ntime = field(5, "ntime")?;
        let nbits = field(6, "nbits")?;

        let clean_jobs = match &params[7] {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true" || s == "1",
            other => return Err(format!("clean_jobs not a bool: {other}")),
        };

        let solution_template = match params.get(8) {
            Some(v) => v
                .as_str()
                .map(str::to_string)
                .ok_or("solution template not a string")?,
            None => String::new(),
        };

        Ok(Self {
            job_id,
            version,
            prev_hash,
            merkle_root,
            final_sapling_root,
            ntime,
            nbits,
            clean_jobs,
            solution_template,
        })
    }
}

/// Parameters for submitting a share to the pool.
///
/// The wire order is fixed: `[username, job_id, ntime, noncestr,
/// solution_hex]`.
#[derive(Debug, Clone)]
pub struct SubmitParams {
    /// Job ID this share is for
    pub job_id: String,

    /// Timestamp hex, echoed from the job
    pub ntime: String,

    /// The 15-byte nonce window as hashed
    pub nonce_space: [u8; 15],

    /// Decoded length of the pool's extranonce1
    pub extranonce1_len: usize,

    /// Solution body from the job (1344 bytes)
    pub solution_body: Vec<u8>,
}

impl SubmitParams {
    /// Build the positional JSON parameters for `mining.submit`.
    pub fn to_stratum_params(&self, username: &str) -> Vec<Value> {
        vec![
            Value::String(username.to_string()),
            Value::String(self.job_id.clone()),
            Value::String(self.ntime.clone()),
            Value::String(self.noncestr()),
            Value::String(self.solution_hex()),
        ]
    }

    /// The 32-byte nNonce field reconstructed from the nonce space:
    /// extranonce1 and padding at the front, the mining nonce at bytes
    /// 12..15, and the merged-mining mirror bytes at 20..23.
    fn nnonce(&self) -> [u8; 32] {
        let mut n = [0u8; 32];
        n[0..7].copy_from_slice(&self.nonce_space[0..7]);
        n[12..16].copy_from_slice(&self.nonce_space[11..15]);
        n[20..24].copy_from_slice(&self.nonce_space[7..11]);
        n
    }

    /// Hex of the nNonce tail after the extranonce1 prefix (28 bytes for
    /// the usual 4-byte extranonce1).
    pub fn noncestr(&self) -> String {
        let n = self.nnonce();
        hex::encode(&n[self.extranonce1_len.min(32)..])
    }

    /// The full solution submission: `fd4005` plus the 1344-byte body,
    /// with the nonce space overwriting the final 15 bytes (hex
    /// positions 2664..2693 of the submission string).
    pub fn solution_hex(&self) -> String {
        let mut full = Vec::with_capacity(3 + SOLUTION_BODY_LEN);
        full.extend_from_slice(&SOLUTION_PREFIX);
        full.extend_from_slice(&self.solution_body);
        full.resize(3 + SOLUTION_BODY_LEN, 0);
        let overlay = 3 + SOLUTION_BODY_LEN - 15;
        full[overlay..].copy_from_slice(&self.nonce_space);
        hex::encode(full)
    }
}

/// JSON-RPC message envelope.
///
/// Stratum uses a simplified JSON-RPC format where messages can be:
/// - Requests (have method and params, may have id)
/// - Responses (have id and result or error)
/// - Notifications (have method and params, no id)
///
/// Stratum v1 predates JSON-RPC 2.0 and uses non-standard conventions
/// (notifications carry `id: null`, errors are plain arrays, there is no
/// version field), so a lightweight custom type fits better than a
/// spec-compliant JSON-RPC library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request or notification from client or server
    Request {
        /// Message ID (null for notifications)
        id: Option<u64>,
        /// Method name (e.g., "mining.notify", "mining.subscribe")
        method: String,
        /// Method parameters
        params: Value,
    },

    /// Response to a request
    Response {
        /// Message ID matching the request
        id: u64,
        /// Result value (present on success)
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        /// Error value (present on failure)
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
}

impl JsonRpcMessage {
    /// Create a new request message.
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        JsonRpcMessage::Request {
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    /// Get the message ID if present.
    pub fn id(&self) -> Option<u64> {
        match self {
            JsonRpcMessage::Request { id, .. } => *id,
            JsonRpcMessage::Response { id, .. } => Some(*id),
        }
    }

    /// Check if this is a notification (request without ID).
    pub fn is_notification(&self) -> bool {
        matches!(self, JsonRpcMessage::Request { id: None, .. })
    }

    /// Get the method name for requests.
    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request { method, .. } => Some(method),
            JsonRpcMessage::Response { .. } => None,
        }
    }
}
