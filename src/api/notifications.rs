//! Notification list endpoint

use chrono::Utc;

use super::client::{json_body, MarketClient};
use super::error::ApiError;
use crate::models::{parse_notifications, NotificationEvent};

const NOTIFICATIONS_PATH: &str = "/notifications";

/// Fetch the signed-in user's notifications as the server orders them.
pub async fn fetch_notifications(client: &MarketClient) -> Result<Vec<NotificationEvent>, ApiError> {
    let resp = client.get(NOTIFICATIONS_PATH, &[]).await?;
    let body = json_body(resp, &client.url(NOTIFICATIONS_PATH)).await?;
    let events = parse_notifications(&body, Utc::now());
    tracing::debug!("Fetched {} notification(s)", events.len());
    Ok(events)
}
