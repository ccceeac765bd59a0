//! [`RequestRecord`] and its terminal/non-terminal status (§3).

use serde::{Deserialize, Serialize};

/// Lifecycle status of a request record (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Forwarding,
    Streaming,
    Retry,
    Completed,
    Cancelled,
    Timeout,
    ConnectionTimeout,
    EofInterrupted,
    RateLimited,
    ServerError,
    StreamError,
    AuthError,
    Error,
    PartialRecovery,
}

impl RequestStatus {
    /// A terminal status is one the record may only transition into once (§3 invariant).
    pub fn is_terminal(self) -> bool {
        !matches!(self, RequestStatus::Pending | RequestStatus::Forwarding | RequestStatus::Streaming | RequestStatus::Retry)
    }
}

/// One tracked request, from entry to eviction (§3 RequestRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: u64,
    pub status: RequestStatus,
    pub endpoint_name: Option<String>,
    pub group_name: Option<String>,
    pub retry_count: u32,
    pub http_status: Option<u16>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost: Option<f64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RequestRecord {
    pub fn new(id: u64, created_at: u64) -> Self {
        Self {
            id,
            status: RequestStatus::Pending,
            endpoint_name: None,
            group_name: None,
            retry_count: 0,
            http_status: None,
            input_tokens: None,
            output_tokens: None,
            cost: None,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A copy-on-write patch applied by `record_request_update` (§4.G). Every field is
/// optional; only the `Some` fields are applied, so applying the same patch twice is
/// idempotent (§8 round-trip property).
#[derive(Debug, Clone, Default)]
pub struct RequestPatch {
    pub status: Option<RequestStatus>,
    pub endpoint_name: Option<String>,
    pub group_name: Option<String>,
    pub retry_count: Option<u32>,
    pub http_status: Option<u16>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost: Option<f64>,
}

impl RequestPatch {
    pub fn apply(&self, record: &mut RequestRecord, now: u64) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(name) = &self.endpoint_name {
            record.endpoint_name = Some(name.clone());
        }
        if let Some(name) = &self.group_name {
            record.group_name = Some(name.clone());
        }
        if let Some(count) = self.retry_count {
            record.retry_count = count;
        }
        if let Some(status) = self.http_status {
            record.http_status = Some(status);
        }
        if let Some(tokens) = self.input_tokens {
            record.input_tokens = Some(tokens);
        }
        if let Some(tokens) = self.output_tokens {
            record.output_tokens = Some(tokens);
        }
        if let Some(cost) = self.cost {
            record.cost = Some(cost);
        }
        record.updated_at = now;
    }
}
