//! Auth service client.

use url::form_urlencoded;

use crate::call::classify::HttpClassifier;
use crate::call::context::CallContext;
use crate::call::error::CallError;
use crate::downstream::types::User;
use crate::downstream::{invalid_request, Downstream};
use crate::http::request::DownstreamRequest;

#[derive(Debug, Clone)]
pub struct AuthClient {
    downstream: Downstream,
}

impl AuthClient {
    pub fn new(downstream: Downstream) -> Self {
        Self { downstream }
    }

    /// The user owning `token`.
    pub async fn current_user(&self, ctx: &CallContext, token: impl AsRef<[u8]>) -> Result<User, CallError> {
        let request = DownstreamRequest::get("/api/users/currentUser")
            .authorization(token)
            .map_err(invalid_request)?;
        self.downstream
            .call(ctx, &request, &HttpClassifier::<User>::json())
            .await
    }

    /// Look up a user by id. Unknown ids surface as a permanent 404.
    pub async fn user_by_id(&self, ctx: &CallContext, id: &str) -> Result<User, CallError> {
        if id.is_empty() {
            return Err(invalid_request("empty user id"));
        }
        let id: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
        let request = DownstreamRequest::get(format!("/api/users/getById/{}", id));
        self.downstream
            .call(ctx, &request, &HttpClassifier::<User>::json())
            .await
    }
}
