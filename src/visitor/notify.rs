/// Visit notifications sent to the issuing resident
use crate::{error::EstateResult, visitor::IssuerInfo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Something worth telling the issuer about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitEvent {
    Arrived {
        visitor_name: String,
        entered_at: DateTime<Utc>,
    },
    Departed {
        visitor_name: String,
        exited_at: DateTime<Utc>,
        duration_minutes: i64,
    },
}

/// Delivery channel for visit events.
///
/// Callers treat delivery as best effort: an error is logged and the guard
/// action that produced the event still stands.
#[async_trait]
pub trait VisitNotifier: Send + Sync {
    async fn notify(&self, issuer: &IssuerInfo, event: VisitEvent) -> EstateResult<()>;
}
