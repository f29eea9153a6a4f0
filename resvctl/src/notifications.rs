//! Notification dispatch contract.
//!
//! Delivery (email, SMS, push) belongs to the surrounding platform; the
//! engine only assembles [`Notification`] payloads and hands them to a
//! [`Notifier`]. Dispatch is fire-and-forget: the processor logs failures
//! and moves on, it never retries or blocks the sweep on a slow sender.

use serde::Serialize;
use serde_json::json;

use crate::db::models::reservation_ttls::TtlCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ExpirationWarning,
    ReservationExpired,
    BusinessExpirationNotice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

/// One outbound notice. `template` is business-scoped so each business can
/// override the wording; `data` carries everything the template needs.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub recipient: String,
    pub channels: Vec<Channel>,
    pub template: String,
    pub data: serde_json::Value,
}

impl Notification {
    /// Customer-facing "your reservation expires soon" notice for one
    /// crossed warning interval.
    pub fn expiration_warning(candidate: &TtlCandidate, minutes_remaining: i64, interval: i32) -> Self {
        Self {
            kind: NotificationKind::ExpirationWarning,
            recipient: recipient_for(candidate),
            channels: vec![Channel::Email, Channel::Push],
            template: format!("reservation-expiry-warning-{}", candidate.business_id),
            data: json!({
                "reservation_id": candidate.reservation_id,
                "business_id": candidate.business_id,
                "expires_at": candidate.expires_at,
                "minutes_remaining": minutes_remaining,
                "warning_interval": interval,
            }),
        }
    }

    /// Customer-facing notice that the reservation lapsed and its holds were
    /// released.
    pub fn reservation_expired(candidate: &TtlCandidate) -> Self {
        Self {
            kind: NotificationKind::ReservationExpired,
            recipient: recipient_for(candidate),
            channels: vec![Channel::Email, Channel::Push],
            template: format!("reservation-expired-{}", candidate.business_id),
            data: json!({
                "reservation_id": candidate.reservation_id,
                "business_id": candidate.business_id,
                "expired_at": candidate.expires_at,
            }),
        }
    }

    /// Business-facing copy of an expiry, for the owner's dashboard digest.
    pub fn business_expiration_notice(candidate: &TtlCandidate) -> Self {
        Self {
            kind: NotificationKind::BusinessExpirationNotice,
            recipient: candidate.business_id.to_string(),
            channels: vec![Channel::Email],
            template: "business-reservation-expired".to_string(),
            data: json!({
                "reservation_id": candidate.reservation_id,
                "business_id": candidate.business_id,
                "expired_at": candidate.expires_at,
            }),
        }
    }
}

fn recipient_for(candidate: &TtlCandidate) -> String {
    candidate
        .customer_ref
        .clone()
        .unwrap_or_else(|| candidate.reservation_id.to_string())
}

/// Outbound notification sender owned by the surrounding platform.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: Notification) -> anyhow::Result<()>;
}

/// Default wiring: log the payload and succeed. Deployments swap in a real
/// sender at the composition root.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        tracing::info!(
            kind = ?notification.kind,
            recipient = %notification.recipient,
            template = %notification.template,
            "Dispatching notification"
        );
        Ok(())
    }
}
