//! Notification formatting and fan-out.
//!
//! Pure formatting plus concurrent sends. Delivery guarantees belong to the
//! SMS provider; a failed send is logged and never retried or rolled back,
//! so one party of a match may be notified while another is not.

use crate::error::RidepoolError;
use crate::sms::SmsTransport;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// Sent to a rider whose request found no compatible match yet.
pub const WAITING_REPLY: &str =
    "We're still looking for riders headed your way. Hang tight - we'll text you the moment we find a match!";

/// One rider in a match group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchParty {
    pub phone: String,
    pub name: String,
}

/// Formats and sends rider notifications.
pub struct NotificationDispatcher {
    sms: Arc<dyn SmsTransport>,
}

impl NotificationDispatcher {
    pub fn new(sms: Arc<dyn SmsTransport>) -> Self {
        Self { sms }
    }

    /// Confirms to a lone rider that their request is recorded.
    pub async fn send_waiting(&self, to: &str) -> Result<(), RidepoolError> {
        self.sms.send(to, WAITING_REPLY).await
    }

    /// Notifies every party of a match, naming the riders they are paired
    /// with and the shared pickup point. Sends run concurrently; partial
    /// failures are logged per recipient.
    pub async fn send_match_found(&self, parties: &[MatchParty], pickup: &str) {
        let sends = parties.iter().map(|party| {
            let body = match_body(party, parties, pickup);
            async move {
                if let Err(e) = self.sms.send(&party.phone, &body).await {
                    warn!(to = %party.phone, error = %e, "match notification failed");
                } else {
                    info!(to = %party.phone, "match notification sent");
                }
            }
        });
        join_all(sends).await;
    }
}

/// Body for one party: every other rider by name plus the pickup point.
fn match_body(recipient: &MatchParty, parties: &[MatchParty], pickup: &str) -> String {
    let others: Vec<&str> = parties
        .iter()
        .filter(|party| party.phone != recipient.phone)
        .map(|party| party.name.as_str())
        .collect();
    format!(
        "Great news! We found you a ride. You'll be riding with {}. Meet at {}.",
        join_names(&others),
        pickup
    )
}

fn join_names(names: &[&str]) -> String {
    match names {
        [] => "another rider".to_string(),
        [only] => (*only).to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}
