//! Route definitions for the status server.

use axum::{extract::State, routing::get, Json, Router};

use crate::core::serializer::{QueueStats, UserSerializer};

/// Create the full app router.
pub fn create_app_router(serializer: UserSerializer) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/queue", get(queue_stats))
        .with_state(serializer)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Current per-user queue statistics.
async fn queue_stats(State(serializer): State<UserSerializer>) -> Json<QueueStats> {
    Json(serializer.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::processor::TaskProcessor;
    use crate::core::serializer::QueueLimits;
    use crate::core::task::Task;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Idle;

    #[async_trait::async_trait]
    impl TaskProcessor for Idle {
        async fn process(&self, _task: Task) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn app() -> Router {
        create_app_router(UserSerializer::new(Arc::new(Idle), QueueLimits::default()))
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let response = app()
            .oneshot(Request::builder().uri("/api/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let stats: QueueStats = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats, QueueStats::default());
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = app()
            .oneshot(Request::builder().uri("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
