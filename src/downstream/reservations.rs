//! Reservations service client.

use crate::call::classify::HttpClassifier;
use crate::call::context::CallContext;
use crate::call::error::CallError;
use crate::downstream::types::ReservationByGuest;
use crate::downstream::{invalid_request, Downstream};
use crate::http::request::DownstreamRequest;

#[derive(Debug, Clone)]
pub struct ReservationClient {
    downstream: Downstream,
}

impl ReservationClient {
    pub fn new(downstream: Downstream) -> Self {
        Self { downstream }
    }

    /// Reservations made by the guest owning `token`.
    pub async fn reservations_for_guest(
        &self,
        ctx: &CallContext,
        token: impl AsRef<[u8]>,
    ) -> Result<Vec<ReservationByGuest>, CallError> {
        let request = DownstreamRequest::get("/api/reservations/getAll")
            .authorization(token)
            .map_err(invalid_request)?;
        self.downstream
            .call(ctx, &request, &HttpClassifier::<Vec<ReservationByGuest>>::json())
            .await
    }

    /// True if the guest has at least one reservation hosted by `host_id`.
    pub async fn has_reservation_with_host(
        &self,
        ctx: &CallContext,
        token: impl AsRef<[u8]>,
        host_id: &str,
    ) -> Result<bool, CallError> {
        let reservations = self.reservations_for_guest(ctx, token).await?;
        Ok(reservations.iter().any(|r| r.accommodation_host_id == host_id))
    }
}
