//! The matching coordinator: finds, claims, and commits ride matches.
//!
//! Triggered by completion events. Every invocation reconstructs its state
//! from the rides grid; the only serialization primitive is the blank /
//! non-blank `Match ID` cell acting as a soft claim flag, so the claim is
//! issued as a conditional update that re-filters on blank. Two coordinators
//! racing on the same candidates resolve to at-least-one-match-wins: rows
//! lost to a competitor are simply absent from the post-claim read-back.

use crate::error::RidepoolError;
use crate::geo::{Fingerprint, Geocoder};
use crate::grid::{ColumnFilter, ColumnValues, Filter, GridStore, Query, Row};
use crate::notify::{MatchParty, NotificationDispatcher};
use crate::queue::{CompletionEvent, MessageHandler};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Session question whose answer is the rider's name.
pub const NAME_QUESTION: &str = "Name";
/// Session question whose answer is the pickup location.
pub const PICKUP_QUESTION: &str = "Pickup";
/// Session question whose answer is the dropoff location.
pub const DROPOFF_QUESTION: &str = "Dropoff";

/// Rides-grid column names.
pub mod columns {
    pub const PHONE: &str = "Phone #";
    pub const NAME: &str = "Name";
    pub const PICKUP: &str = "Pickup";
    pub const DROPOFF: &str = "Dropoff";
    pub const PICKUP_LAT: &str = "Pickup Lat";
    pub const PICKUP_LONG: &str = "Pickup Long";
    pub const DROPOFF_LAT: &str = "Dropoff Lat";
    pub const DROPOFF_LONG: &str = "Dropoff Long";
    pub const CREATED_AT: &str = "Created At";
    pub const EXPIRES_AT: &str = "Expires At";
    pub const MATCH_ID: &str = "Match ID";
}

/// The matching coordinator.
pub struct MatchCoordinator {
    store: Arc<dyn GridStore>,
    geocoder: Arc<dyn Geocoder>,
    dispatcher: NotificationDispatcher,
    rides_grid_id: String,
    expiry: Duration,
}

impl MatchCoordinator {
    pub fn new(
        store: Arc<dyn GridStore>,
        geocoder: Arc<dyn Geocoder>,
        dispatcher: NotificationDispatcher,
        rides_grid_id: impl Into<String>,
        expiry_minutes: i64,
    ) -> Self {
        Self {
            store,
            geocoder,
            dispatcher,
            rides_grid_id: rides_grid_id.into(),
            expiry: Duration::minutes(expiry_minutes),
        }
    }

    /// Processes one completion event end to end: resolve, search, claim,
    /// insert, notify.
    ///
    /// # Errors
    ///
    /// Resolution and store failures propagate; the caller decides whether
    /// the event is retried (the queue's redelivery policy). The handler is
    /// idempotent: a replayed event for a rider who already has an unexpired
    /// request short-circuits without touching any other row.
    pub async fn handle_completion(&self, event: &CompletionEvent) -> Result<(), RidepoolError> {
        let session = &event.existing_session;
        let phone = event.inbound_message.from.as_str();

        let pickup_text = session.answer(PICKUP_QUESTION).ok_or_else(|| {
            RidepoolError::Validation("completed session missing pickup answer".to_string())
        })?;
        let dropoff_text = session.answer(DROPOFF_QUESTION).ok_or_else(|| {
            RidepoolError::Validation("completed session missing dropoff answer".to_string())
        })?;
        let name = session.answer(NAME_QUESTION).unwrap_or(phone);

        // Both endpoints resolve or the attempt aborts; never match on
        // half-resolved coordinates.
        let (pickup, dropoff) = tokio::try_join!(
            self.geocoder.resolve(pickup_text),
            self.geocoder.resolve(dropoff_text)
        )?;
        let pickup_fp = Fingerprint::from_latlong(&pickup);
        let dropoff_fp = Fingerprint::from_latlong(&dropoff);

        let now = Utc::now();
        if self.unexpired_request_exists(phone, now).await? {
            info!(phone, "request already recorded; skipping replayed event");
            return Ok(());
        }

        let candidates = self.find_candidates(&pickup_fp, &dropoff_fp, phone).await?;

        let mut match_id = None;
        let mut claimed: Vec<Row> = Vec::new();
        if !candidates.is_empty() {
            let id = Uuid::new_v4().to_string();
            claimed = self.claim(&pickup_fp, &dropoff_fp, &id, phone).await?;
            if claimed.is_empty() {
                // Every candidate went non-blank between search and claim;
                // a competing coordinator won them all.
                info!(phone, "all candidates lost to a competing claim");
            } else {
                match_id = Some(id);
            }
        }

        self.insert_request(
            phone,
            name,
            pickup_text,
            dropoff_text,
            &pickup_fp,
            &dropoff_fp,
            match_id.as_deref(),
            now,
        )
        .await?;

        match match_id {
            Some(id) => {
                let mut parties: Vec<MatchParty> = claimed
                    .iter()
                    .filter_map(|row| {
                        let phone = row.cell(columns::PHONE)?;
                        Some(MatchParty {
                            phone: phone.to_string(),
                            name: row.cell(columns::NAME).unwrap_or(phone).to_string(),
                        })
                    })
                    .collect();
                parties.push(MatchParty {
                    phone: phone.to_string(),
                    name: name.to_string(),
                });
                info!(phone, match_id = %id, riders = parties.len(), "match committed");
                self.dispatcher.send_match_found(&parties, pickup_text).await;
            }
            None => {
                if let Err(e) = self.dispatcher.send_waiting(phone).await {
                    // Confirmation is best-effort; the request row is already
                    // committed and must not be retried into a duplicate.
                    warn!(phone, error = %e, "waiting confirmation failed");
                }
            }
        }

        Ok(())
    }

    /// Redelivery guard: does this rider already have an unexpired request?
    async fn unexpired_request_exists(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RidepoolError> {
        let query = Query::filtered(ColumnFilter::all(vec![Filter::eq(columns::PHONE, phone)]));
        let result = self.store.search(&self.rides_grid_id, query).await?;
        Ok(result.rows.iter().any(|row| {
            row.cell(columns::EXPIRES_AT)
                .and_then(|cell| DateTime::parse_from_rfc3339(cell).ok())
                .map(|expires| expires > now)
                .unwrap_or(false)
        }))
    }

    fn fingerprint_filters(pickup: &Fingerprint, dropoff: &Fingerprint) -> Vec<Filter> {
        vec![
            Filter::like(columns::PICKUP_LAT, pickup.lat.as_str()),
            Filter::like(columns::PICKUP_LONG, pickup.lng.as_str()),
            Filter::like(columns::DROPOFF_LAT, dropoff.lat.as_str()),
            Filter::like(columns::DROPOFF_LONG, dropoff.lng.as_str()),
        ]
    }

    /// Unclaimed requests in the same pickup and dropoff buckets, excluding
    /// the sender's own rows.
    async fn find_candidates(
        &self,
        pickup: &Fingerprint,
        dropoff: &Fingerprint,
        sender_phone: &str,
    ) -> Result<Vec<Row>, RidepoolError> {
        let mut filters = Self::fingerprint_filters(pickup, dropoff);
        filters.push(Filter::blank(columns::MATCH_ID));
        let query = Query::filtered(ColumnFilter::all(filters));
        let result = self.store.search(&self.rides_grid_id, query).await?;
        Ok(result
            .rows
            .into_iter()
            .filter(|row| row.cell(columns::PHONE) != Some(sender_phone))
            .collect())
    }

    /// Conditionally stamps `match_id` into rows still unclaimed, then reads
    /// back exactly the rows that carry it. Rows claimed by a competitor
    /// between search and claim are excluded by the blank re-filter.
    ///
    /// The update filter cannot express "not the sender", so a stale
    /// unclaimed row of the sender's own may get stamped too; the read-back
    /// drops it so the sender never appears in the party list twice.
    ///
    /// A failure here is fatal for the attempt: no notification is sent and
    /// the error propagates. Rows stamped before the failure stay stamped
    /// (ids are never reused) and are logged for audit.
    async fn claim(
        &self,
        pickup: &Fingerprint,
        dropoff: &Fingerprint,
        match_id: &str,
        sender_phone: &str,
    ) -> Result<Vec<Row>, RidepoolError> {
        let mut filters = Self::fingerprint_filters(pickup, dropoff);
        filters.push(Filter::blank(columns::MATCH_ID));
        let mut update = ColumnValues::new();
        update.insert(columns::MATCH_ID.to_string(), match_id.to_string());

        let updated = self
            .store
            .update_by_query(&self.rides_grid_id, ColumnFilter::all(filters), update)
            .await
            .map_err(|e| {
                warn!(match_id, error = %e, "claim failed; stamped rows need audit");
                e
            })?;
        if updated == 0 {
            return Ok(Vec::new());
        }

        let query = Query::filtered(ColumnFilter::all(vec![Filter::eq(
            columns::MATCH_ID,
            match_id,
        )]));
        let result = self.store.search(&self.rides_grid_id, query).await?;
        Ok(result
            .rows
            .into_iter()
            .filter(|row| row.cell(columns::PHONE) != Some(sender_phone))
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_request(
        &self,
        phone: &str,
        name: &str,
        pickup_text: &str,
        dropoff_text: &str,
        pickup_fp: &Fingerprint,
        dropoff_fp: &Fingerprint,
        match_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), RidepoolError> {
        let mut row = ColumnValues::new();
        row.insert(columns::PHONE.to_string(), phone.to_string());
        row.insert(columns::NAME.to_string(), name.to_string());
        row.insert(columns::PICKUP.to_string(), pickup_text.to_string());
        row.insert(columns::DROPOFF.to_string(), dropoff_text.to_string());
        row.insert(columns::PICKUP_LAT.to_string(), pickup_fp.lat.clone());
        row.insert(columns::PICKUP_LONG.to_string(), pickup_fp.lng.clone());
        row.insert(columns::DROPOFF_LAT.to_string(), dropoff_fp.lat.clone());
        row.insert(columns::DROPOFF_LONG.to_string(), dropoff_fp.lng.clone());
        row.insert(columns::CREATED_AT.to_string(), now.to_rfc3339());
        row.insert(
            columns::EXPIRES_AT.to_string(),
            (now + self.expiry).to_rfc3339(),
        );
        row.insert(
            columns::MATCH_ID.to_string(),
            match_id.unwrap_or_default().to_string(),
        );
        self.store.insert(&self.rides_grid_id, vec![row]).await
    }
}

/// Queue-facing wrapper so the coordinator plugs into the consumer.
pub struct MatchWorker {
    coordinator: MatchCoordinator,
}

impl MatchWorker {
    pub fn new(coordinator: MatchCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl MessageHandler for MatchWorker {
    async fn handle(&self, event: CompletionEvent) -> crate::error::Result<()> {
        match self.coordinator.handle_completion(&event).await {
            Ok(()) => Ok(()),
            Err(RidepoolError::Resolution(message)) => {
                // Unresolvable locations will not resolve on redelivery
                // either; drop the event rather than poison the queue.
                warn!(phone = %event.inbound_message.from, %message, "dropping unresolvable match attempt");
                Ok(())
            }
            Err(RidepoolError::Validation(message)) => {
                warn!(phone = %event.inbound_message.from, %message, "dropping malformed completion event");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
