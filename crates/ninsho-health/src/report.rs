//! Caller-facing shape of a single probe.

use ninsho_core::RouteStatus;
use serde::{Deserialize, Serialize};

use crate::classify::{Classification, HealthState, Reason};

/// Result of testing one backend, as returned to management callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `true` for `UP` and `DEGRADED`.
    pub success: bool,
    /// Legacy status string.
    pub status: RouteStatus,
    /// Coarse state.
    pub state: HealthState,
    /// Matching branch of the decision tree.
    pub reason: Reason,
    /// Human-readable detail.
    pub detail: String,
    /// HTTP status, when a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// HTTP stage duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
    /// Same as `detail`; present only when the probe failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Classification> for HealthReport {
    fn from(c: &Classification) -> Self {
        let success = c.is_success();
        Self {
            success,
            status: c.legacy_status(),
            state: c.state,
            reason: c.reason,
            detail: c.detail.clone(),
            status_code: c.http_status,
            response_time: c.duration_ms,
            error: (!success).then(|| c.detail.clone()),
        }
    }
}
