use crate::model::MetricKind;
use thiserror::Error;

/// Failure at the Prometheus HTTP layer. Classified so the metric service
/// can decide between retry, split and fail-fast.
#[derive(Debug, Error)]
pub enum PromError {
    #[error("Invalid Prometheus URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Backend rejected query as too large: {0}")]
    RangeTooLarge(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl PromError {
    /// Transient failures worth retrying: connect/read errors, 5xx, 408, 429.
    pub fn is_transient(&self) -> bool {
        match self {
            PromError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            PromError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// 401/403 abort the whole cluster rather than the slot.
    pub fn is_auth(&self) -> bool {
        matches!(self, PromError::Status { status: 401 | 403, .. })
    }

    /// Oversized-range rejections are handled by splitting, not retrying.
    pub fn is_range_too_large(&self) -> bool {
        match self {
            PromError::RangeTooLarge(_) => true,
            PromError::Status { status, body } => {
                *status == 413
                    || ((*status == 400 || *status == 422)
                        && body.contains("too many samples"))
            }
            _ => false,
        }
    }
}

/// The error taxonomy the scan pipeline distinguishes.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Retries exhausted or the backend returned a semantic failure. The
    /// current slot's metric kind becomes empty with a warning.
    #[error("Metric backend error: {0}")]
    Backend(String),

    /// 401/403 from kube or Prometheus. Aborts the current cluster only.
    #[error("Authorization failed for cluster {cluster}: {message}")]
    Auth { cluster: String, message: String },

    /// Fewer samples than `points_required`.
    #[error("Not enough data: {got} of {required} points")]
    InsufficientData { got: usize, required: usize },

    /// The active dialect cannot express this metric kind.
    #[error("Metric kind {0} is not supported by the active backend dialect")]
    UnsupportedMetric(MetricKind),

    /// Strategy raised or produced a malformed result.
    #[error("Strategy failed: {0}")]
    Strategy(String),

    /// Kubernetes API failure that is not an auth problem.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn from_prom(cluster: &str, err: PromError) -> Self {
        if err.is_auth() {
            ScanError::Auth {
                cluster: cluster.to_string(),
                message: err.to_string(),
            }
        } else {
            ScanError::Backend(err.to_string())
        }
    }

    /// Whether this error dooms the whole cluster rather than one slot.
    pub fn is_cluster_fatal(&self) -> bool {
        match self {
            ScanError::Auth { .. } | ScanError::Cancelled => true,
            ScanError::Kube(kube::Error::Api(resp)) => resp.code == 401 || resp.code == 403,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PromError::Status { status: 503, body: String::new() }.is_transient());
        assert!(PromError::Status { status: 429, body: String::new() }.is_transient());
        assert!(PromError::Status { status: 408, body: String::new() }.is_transient());
        assert!(!PromError::Status { status: 404, body: String::new() }.is_transient());
        assert!(!PromError::QueryFailed("bad expr".to_string()).is_transient());
    }

    #[test]
    fn test_auth_classification() {
        assert!(PromError::Status { status: 401, body: String::new() }.is_auth());
        assert!(PromError::Status { status: 403, body: String::new() }.is_auth());
        assert!(!PromError::Status { status: 500, body: String::new() }.is_auth());
    }

    #[test]
    fn test_range_too_large_classification() {
        assert!(PromError::Status { status: 413, body: String::new() }.is_range_too_large());
        assert!(PromError::Status {
            status: 422,
            body: "query processing would load too many samples".to_string()
        }
        .is_range_too_large());
        assert!(!PromError::Status { status: 422, body: "parse error".to_string() }
            .is_range_too_large());
    }

    #[test]
    fn test_cluster_fatal() {
        let auth = ScanError::Auth { cluster: "c".to_string(), message: "403".to_string() };
        assert!(auth.is_cluster_fatal());
        assert!(!ScanError::Backend("boom".to_string()).is_cluster_fatal());
        assert!(ScanError::Cancelled.is_cluster_fatal());
    }
}
