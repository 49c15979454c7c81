//! Payloads exchanged with the booking services.

use serde::{Deserialize, Serialize};

/// A user as reported by the auth service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub lastname: String,
    pub user_role: String,
}

/// A reservation made by the current guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReservationByGuest {
    pub guest_id: String,
    pub accommodation_id: String,
    pub accommodation_name: String,
    pub accommodation_location: String,
    pub accommodation_host_id: String,
    pub check_in_date: String,
    pub check_out_date: String,
    pub number_of_guests: u32,
}

/// Body of a notification creation request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NotificationRequest {
    pub host_id: String,
    pub host_email: String,
    pub notification_text: String,
}
