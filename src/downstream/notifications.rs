//! Notifications service client.

use http::StatusCode;

use crate::call::classify::HttpClassifier;
use crate::call::context::CallContext;
use crate::call::error::CallError;
use crate::downstream::types::NotificationRequest;
use crate::downstream::{invalid_request, Downstream};
use crate::http::request::DownstreamRequest;

#[derive(Debug, Clone)]
pub struct NotificationClient {
    downstream: Downstream,
}

impl NotificationClient {
    pub fn new(downstream: Downstream) -> Self {
        Self { downstream }
    }

    /// Create a notification. Only `201 Created` counts as success.
    pub async fn create(
        &self,
        ctx: &CallContext,
        token: impl AsRef<[u8]>,
        notification: &NotificationRequest,
    ) -> Result<(), CallError> {
        let request = DownstreamRequest::post("/api/notifications/create")
            .json(notification)
            .map_err(invalid_request)?
            .authorization(token)
            .map_err(invalid_request)?;
        let classifier = HttpClassifier::discard_body().expect_status(StatusCode::CREATED);
        self.downstream.call(ctx, &request, &classifier).await
    }
}
