use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One per-request record, append-only. Every completed request produces
/// exactly one of these, error paths included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    pub matched_route_id: Option<Uuid>,
    pub target_service: Option<String>,
    pub user_id: Option<String>,
    pub client_ip: String,
    /// None when dispatch never returned a response.
    pub status_code: Option<u16>,
    pub response_time_ms: f64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query filter for the log endpoint. All fields conjunctive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub method: Option<String>,
    /// Substring match on the path.
    pub path: Option<String>,
    pub target_service: Option<String>,
    pub user_id: Option<String>,
    pub status_code: Option<u16>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl LogFilter {
    pub fn matches(&self, log: &RequestLog) -> bool {
        if let Some(m) = &self.method {
            if !log.method.eq_ignore_ascii_case(m) {
                return false;
            }
        }
        if let Some(p) = &self.path {
            if !log.path.contains(p.as_str()) {
                return false;
            }
        }
        if let Some(s) = &self.target_service {
            if log.target_service.as_deref() != Some(s.as_str()) {
                return false;
            }
        }
        if let Some(u) = &self.user_id {
            if log.user_id.as_deref() != Some(u.as_str()) {
                return false;
            }
        }
        if let Some(code) = self.status_code {
            if log.status_code != Some(code) {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if log.created_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if log.created_at > end {
                return false;
            }
        }
        true
    }
}
