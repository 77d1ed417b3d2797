//! The remote API collaborator.
//!
//! Resources never talk HTTP themselves. The provider hands every request body
//! to an [`ApiClient`] and flattens whatever comes back, so tests can swap in
//! [`crate::testing::FakeApiClient`] and production code can wrap a real
//! Azure Resource Manager client.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ReconcileError;

/// Get, put and delete resources addressed by their ARM id.
///
/// Implementations map a missing resource to [`ReconcileError::NotFound`] and
/// any other failure with [`error_for_status`] or an equivalent mapping.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Fetch the resource body.
    async fn get(&self, id: &str) -> Result<serde_json::Value, ReconcileError>;

    /// Create or replace the resource, returning the stored body.
    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ReconcileError>;

    /// Delete the resource.
    async fn delete(&self, id: &str) -> Result<(), ReconcileError>;
}

#[async_trait]
impl<T: ApiClient + ?Sized> ApiClient for Arc<T> {
    async fn get(&self, id: &str) -> Result<serde_json::Value, ReconcileError> {
        (**self).get(id).await
    }

    async fn put(
        &self,
        id: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ReconcileError> {
        (**self).put(id, body).await
    }

    async fn delete(&self, id: &str) -> Result<(), ReconcileError> {
        (**self).delete(id).await
    }
}

/// Map an HTTP status from the management API to an error.
///
/// Throttling and server-side outages are transient; everything else is
/// permanent.
pub fn error_for_status(status: u16, id: &str, message: &str) -> ReconcileError {
    let detail = if message.is_empty() {
        id.to_string()
    } else {
        format!("{}: {}", id, message)
    };
    match status {
        404 => ReconcileError::NotFound(id.to_string()),
        409 => ReconcileError::AlreadyExists(id.to_string()),
        401 | 403 => ReconcileError::PermissionDenied(detail),
        408 => ReconcileError::DeadlineExceeded(detail),
        429 => ReconcileError::ResourceExhausted(detail),
        500 | 502 | 503 | 504 => ReconcileError::Unavailable(detail),
        _ => ReconcileError::Remote(format!("status {} for {}", status, detail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_for_status() {
        let id = "/subscriptions/x/providers/Microsoft.Consumption/budgets/b";
        assert!(matches!(
            error_for_status(404, id, ""),
            ReconcileError::NotFound(ref found) if found == id
        ));
        assert!(matches!(
            error_for_status(409, id, ""),
            ReconcileError::AlreadyExists(_)
        ));
        assert!(matches!(
            error_for_status(403, id, "forbidden"),
            ReconcileError::PermissionDenied(_)
        ));
        assert!(error_for_status(429, id, "slow down").is_retryable());
        assert!(error_for_status(503, id, "").is_retryable());

        let err = error_for_status(400, id, "bad request");
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            format!("Remote error: status 400 for {}: bad request", id)
        );
    }
}
