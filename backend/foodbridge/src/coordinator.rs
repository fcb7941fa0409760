//! Claim coordinator: a restaurant commits to fulfil an orphanage's request.
//!
//! ## Steps
//!
//! 1. Load the request (`NotFound` / `AlreadyClaimed`).
//! 2. Build the driving-directions link from the claimer to the request.
//! 3. In one transaction, flip the request to `Fulfilled` only if it is
//!    still `Pending`, and insert the linked `Claimed` donation.
//! 4. Send the fulfillment email and record `emailSent`.
//!
//! Concurrent claims race on the conditional update in step 3; the loser
//! rolls back and gets `AlreadyClaimed`, so a request never has two
//! donations. A failed or skipped email in step 4 is logged and leaves the
//! claim committed with `emailSent = false`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::context::ActorContext;
use crate::db;
use crate::errors::{AppError, Result};
use crate::feed::{ChangeFeed, Collection};
use crate::models::{
    new_id, now_millis, require_location, Donation, DonationStatus, GeoPoint, Quantity, Request,
    RequestStatus, Role,
};
use crate::notify::{Delivery, FulfillmentDetails, NotificationGateway, TemplateEmail};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub request_id: String,
    pub item_needed: String,
    pub quantity: Quantity,
    pub orphanage_id: String,
    pub orphanage_name: String,
    /// Claimer's current position; defaults to their profile location.
    #[serde(default)]
    pub origin: Option<GeoPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub request: Request,
    pub donation: Donation,
    pub email_sent: bool,
}

/// Google Maps driving directions between two points.
pub fn maps_link(origin: GeoPoint, destination: GeoPoint) -> String {
    format!(
        "https://www.google.com/maps/dir/?api=1&origin={},{}&destination={},{}",
        origin.lat, origin.lng, destination.lat, destination.lng
    )
}

pub struct ClaimCoordinator {
    pool: SqlitePool,
    feed: ChangeFeed,
    gateway: Arc<dyn NotificationGateway>,
}

impl ClaimCoordinator {
    pub fn new(pool: SqlitePool, feed: ChangeFeed, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            pool,
            feed,
            gateway,
        }
    }

    /// Claim `claim.request_id` on behalf of the restaurant in `ctx`.
    pub async fn claim(&self, ctx: &ActorContext, claim: ClaimRequest) -> Result<ClaimOutcome> {
        let request_id = claim.request_id.clone();
        match self.try_claim(ctx, claim).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Claim on request {request_id} by {} failed: {e}", ctx.uid());
                Err(e)
            }
        }
    }

    async fn try_claim(&self, ctx: &ActorContext, claim: ClaimRequest) -> Result<ClaimOutcome> {
        ctx.require_role(Role::Restaurant)?;
        let servings = claim.quantity.positive()?;
        let food_name = claim.item_needed.trim().to_string();
        if food_name.is_empty() {
            return Err(AppError::Validation("itemNeeded is required".to_string()));
        }

        // ── 1. Fetch ──────────────────────────────────────────
        let mut request = db::get_request(&self.pool, &claim.request_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("request {}", claim.request_id)))?;
        if !request.status.can_transition_to(RequestStatus::Fulfilled) {
            return Err(AppError::AlreadyClaimed(request.id));
        }
        if request.orphanage_id != claim.orphanage_id {
            return Err(AppError::Validation(format!(
                "request {} belongs to a different orphanage",
                request.id
            )));
        }

        // ── 2. Directions ─────────────────────────────────────
        let origin = require_location(claim.origin.or(ctx.location()))?;
        let link = maps_link(origin, request.location);

        // ── 3. Conditional transaction ────────────────────────
        let now = now_millis();
        let profile = &ctx.profile;
        let donation = Donation {
            id: new_id(),
            request_id: Some(request.id.clone()),
            restaurant_id: profile.uid.clone(),
            restaurant_name: profile.name.clone(),
            restaurant_email: profile.email.clone(),
            restaurant_phone: profile.phone.clone(),
            restaurant_address: profile.address.clone(),
            food_name,
            servings,
            status: DonationStatus::Claimed,
            created_at: now,
            location: Some(origin),
            orphanage_id: Some(claim.orphanage_id),
            orphanage_name: Some(claim.orphanage_name),
            orphanage_email: Some(request.orphanage_email.clone()),
            maps_link: Some(link),
            email_sent: false,
            fulfilled_at: None,
        };

        let mut tx = self.pool.begin().await?;
        if !db::fulfill_request_if_pending(&mut *tx, &request.id, &profile.uid, now).await? {
            tx.rollback().await?;
            return Err(AppError::AlreadyClaimed(request.id));
        }
        db::insert_donation(&mut *tx, &donation).await?;
        tx.commit().await?;

        request.status = RequestStatus::Fulfilled;
        request.fulfilled_by = Some(profile.uid.clone());
        request.fulfilled_at = Some(now);
        self.feed.publish(Collection::Requests, &request.id);
        self.feed.publish(Collection::Donations, &donation.id);
        info!(
            "Request {} claimed by {} as donation {}",
            request.id, profile.uid, donation.id
        );

        // ── 4. Notify ─────────────────────────────────────────
        let email_sent = self.notify(&donation).await;
        let mut donation = donation;
        donation.email_sent = email_sent;

        Ok(ClaimOutcome {
            request,
            donation,
            email_sent,
        })
    }

    /// Returns whether the email was actually handed to the delivery service.
    async fn notify(&self, donation: &Donation) -> bool {
        let details = fulfillment_details(donation);
        match self
            .gateway
            .send(&TemplateEmail::fulfillment(&details))
            .await
        {
            Ok(Delivery::Sent) => {}
            Ok(Delivery::Skipped) => {
                info!("Fulfillment email for donation {} skipped", donation.id);
                return false;
            }
            Err(e) => {
                warn!("Fulfillment email for donation {} failed: {e}", donation.id);
                return false;
            }
        }

        match db::mark_email_sent(&self.pool, &donation.id).await {
            Ok(()) => self.feed.publish(Collection::Donations, &donation.id),
            Err(e) => error!(
                "Fulfillment email for donation {} was sent but not recorded: {e}",
                donation.id
            ),
        }
        true
    }
}

pub fn fulfillment_details(donation: &Donation) -> FulfillmentDetails {
    FulfillmentDetails {
        food_name: donation.food_name.clone(),
        servings: donation.servings,
        restaurant_name: donation.restaurant_name.clone(),
        restaurant_email: donation.restaurant_email.clone(),
        restaurant_phone: donation.restaurant_phone.clone(),
        restaurant_address: donation.restaurant_address.clone(),
        orphanage_name: donation.orphanage_name.clone().unwrap_or_default(),
        orphanage_email: donation.orphanage_email.clone().unwrap_or_default(),
        maps_link: donation.maps_link.clone().unwrap_or_default(),
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TemplateIds;
    use crate::invariants::{
        assert_claim_linkage, assert_request_invariants, assert_valid_request_transition,
    };
    use crate::lifecycle::{self, NewRequest, ProfileInput};
    use crate::notify::testing::RecordingGateway;
    use crate::notify::{BrevoGateway, Template};

    const RESTAURANT_AT: GeoPoint = GeoPoint {
        lat: 12.97,
        lng: 77.59,
    };
    const ORPHANAGE_AT: GeoPoint = GeoPoint {
        lat: 13.02,
        lng: 77.65,
    };

    struct Fixture {
        pool: SqlitePool,
        feed: ChangeFeed,
        gateway: Arc<RecordingGateway>,
        coordinator: ClaimCoordinator,
        restaurant: ActorContext,
        request: Request,
    }

    async fn fixture_with(gateway: RecordingGateway) -> Fixture {
        let pool = db::test_pool().await;
        let feed = ChangeFeed::new(pool.clone(), 16);
        let gateway = Arc::new(gateway);
        let coordinator = ClaimCoordinator::new(pool.clone(), feed.clone(), gateway.clone());

        let restaurant = ActorContext::new(
            lifecycle::save_profile(
                &pool,
                "rest-1",
                ProfileInput {
                    role: Role::Restaurant,
                    name: "Spice Hub".into(),
                    email: "spice@example.com".into(),
                    phone: "555-0101".into(),
                    address: "12 MG Road".into(),
                    location: Some(RESTAURANT_AT),
                },
            )
            .await
            .unwrap(),
        );
        let orphanage = ActorContext::new(
            lifecycle::save_profile(
                &pool,
                "orph-1",
                ProfileInput {
                    role: Role::Orphanage,
                    name: "Hope Home".into(),
                    email: "hope@example.org".into(),
                    phone: String::new(),
                    address: String::new(),
                    location: Some(ORPHANAGE_AT),
                },
            )
            .await
            .unwrap(),
        );
        let request = lifecycle::create_request(
            &pool,
            &feed,
            &orphanage,
            NewRequest {
                item_needed: "Rice".into(),
                quantity: Quantity::from("5"),
                location: None,
            },
        )
        .await
        .unwrap();

        Fixture {
            pool,
            feed,
            gateway,
            coordinator,
            restaurant,
            request,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(RecordingGateway::default()).await
    }

    fn claim_for(request: &Request) -> ClaimRequest {
        ClaimRequest {
            request_id: request.id.clone(),
            item_needed: "Rice".into(),
            quantity: Quantity::from("5"),
            orphanage_id: request.orphanage_id.clone(),
            orphanage_name: request.orphanage_name.clone(),
            origin: None,
        }
    }

    #[test]
    fn maps_link_format() {
        assert_eq!(
            maps_link(RESTAURANT_AT, ORPHANAGE_AT),
            "https://www.google.com/maps/dir/?api=1&origin=12.97,77.59&destination=13.02,77.65"
        );
    }

    #[tokio::test]
    async fn claim_fulfils_request_and_creates_claimed_donation() {
        let f = fixture().await;
        let outcome = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        assert_eq!(outcome.request.status, RequestStatus::Fulfilled);
        assert_eq!(outcome.request.fulfilled_by.as_deref(), Some("rest-1"));
        assert_eq!(outcome.donation.status, DonationStatus::Claimed);
        assert_eq!(outcome.donation.servings, 5);
        assert_eq!(outcome.donation.food_name, "Rice");
        assert_eq!(
            outcome.donation.orphanage_email.as_deref(),
            Some("hope@example.org")
        );
        assert_eq!(
            outcome.donation.maps_link.as_deref(),
            Some(maps_link(RESTAURANT_AT, ORPHANAGE_AT).as_str())
        );
        assert!(outcome.email_sent);

        let stored_request = db::get_request(&f.pool, &f.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_valid_request_transition(f.request.status, stored_request.status);
        assert_request_invariants(&stored_request);
        assert_eq!(stored_request, outcome.request);

        let linked = db::list_donations_for_request(&f.pool, &f.request.id)
            .await
            .unwrap();
        assert_claim_linkage(&stored_request, &linked);
        assert!(linked[0].email_sent);

        let sent = f.gateway.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, Template::Fulfillment);
        assert_eq!(sent[0].params["orphanage_email"], "hope@example.org");
    }

    #[tokio::test]
    async fn claim_on_fulfilled_request_creates_no_donation() {
        let f = fixture().await;
        f.coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        let again = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await;
        assert!(matches!(again, Err(AppError::AlreadyClaimed(_))));

        let linked = db::list_donations_for_request(&f.pool, &f.request.id)
            .await
            .unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(f.gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn claim_on_missing_request_is_not_found() {
        let f = fixture().await;
        let mut claim = claim_for(&f.request);
        claim.request_id = "missing".into();

        let result = f.coordinator.claim(&f.restaurant, claim).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(db::list_donations_for_restaurant(&f.pool, "rest-1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn claim_without_any_origin_is_rejected_before_write() {
        let mut f = fixture().await;
        f.restaurant.profile.location = None;

        let result = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let stored = db::get_request(&f.pool, &f.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn explicit_origin_overrides_profile_location() {
        let f = fixture().await;
        let here = GeoPoint { lat: 1.5, lng: 2.5 };
        let mut claim = claim_for(&f.request);
        claim.origin = Some(here);

        let outcome = f.coordinator.claim(&f.restaurant, claim).await.unwrap();
        assert_eq!(
            outcome.donation.maps_link,
            Some(maps_link(here, ORPHANAGE_AT))
        );
    }

    #[tokio::test]
    async fn claim_with_mismatched_orphanage_is_rejected() {
        let f = fixture().await;
        let mut claim = claim_for(&f.request);
        claim.orphanage_id = "someone-else".into();

        let result = f.coordinator.claim(&f.restaurant, claim).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn notification_failure_keeps_claim_committed() {
        let f = fixture_with(RecordingGateway::failing()).await;
        let outcome = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        assert!(!outcome.email_sent);
        let stored = db::get_donation(&f.pool, &outcome.donation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DonationStatus::Claimed);
        assert!(!stored.email_sent);
        let request = db::get_request(&f.pool, &f.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.status, RequestStatus::Fulfilled);
    }

    #[tokio::test]
    async fn unconfigured_gateway_does_not_record_email_sent() {
        let f = fixture().await;
        let unconfigured = Arc::new(BrevoGateway::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            TemplateIds::default(),
        ));
        let coordinator = ClaimCoordinator::new(f.pool.clone(), f.feed.clone(), unconfigured);

        let outcome = coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        assert!(!outcome.email_sent);
        assert!(!outcome.donation.email_sent);
        let stored = db::get_donation(&f.pool, &outcome.donation.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.email_sent);
        assert_eq!(stored.status, DonationStatus::Claimed);
    }

    #[tokio::test]
    async fn sent_email_is_reported_even_if_flag_write_fails() {
        let f = fixture().await;
        sqlx::query(
            r#"
            CREATE TRIGGER block_email_flag BEFORE UPDATE OF email_sent ON donations
            BEGIN SELECT RAISE(ABORT, 'email flag is read-only'); END
            "#,
        )
        .execute(&f.pool)
        .await
        .unwrap();

        let outcome = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        assert!(outcome.email_sent);
        assert_eq!(f.gateway.sent().len(), 1);
        let stored = db::get_donation(&f.pool, &outcome.donation.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.email_sent);
    }

    #[tokio::test]
    async fn failed_donation_insert_rolls_back_request_update() {
        let f = fixture().await;
        sqlx::query(
            r#"
            CREATE TRIGGER block_donation_insert BEFORE INSERT ON donations
            BEGIN SELECT RAISE(ABORT, 'donations are read-only'); END
            "#,
        )
        .execute(&f.pool)
        .await
        .unwrap();

        let result = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));

        let stored = db::get_request(&f.pool, &f.request.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert!(stored.fulfilled_by.is_none());
        assert!(stored.fulfilled_at.is_none());
        assert_eq!(db::list_pending_requests(&f.pool).await.unwrap().len(), 1);
        assert!(db::list_donations_for_request(&f.pool, &f.request.id)
            .await
            .unwrap()
            .is_empty());
        assert!(f.gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_let_exactly_one_win() {
        let f = fixture().await;
        let rival = ActorContext::new(
            lifecycle::save_profile(
                &f.pool,
                "rest-2",
                ProfileInput {
                    role: Role::Restaurant,
                    name: "Curry House".into(),
                    email: "curry@example.com".into(),
                    phone: String::new(),
                    address: String::new(),
                    location: Some(RESTAURANT_AT),
                },
            )
            .await
            .unwrap(),
        );

        let (a, b) = tokio::join!(
            f.coordinator.claim(&f.restaurant, claim_for(&f.request)),
            f.coordinator.claim(&rival, claim_for(&f.request)),
        );

        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(AppError::AlreadyClaimed(_))));

        let linked = db::list_donations_for_request(&f.pool, &f.request.id)
            .await
            .unwrap();
        assert_eq!(linked.len(), 1);
    }

    #[tokio::test]
    async fn claimed_donation_reaches_restaurant_subscription() {
        let f = fixture().await;
        let mut sub = f
            .feed
            .subscribe(crate::feed::DonationFilter::Restaurant("rest-1".into()));
        assert!(sub.next().await.unwrap().is_empty());

        let outcome = f
            .coordinator
            .claim(&f.restaurant, claim_for(&f.request))
            .await
            .unwrap();

        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, outcome.donation.id);
        assert_eq!(snapshot[0].food_name, "Rice");
        assert_eq!(snapshot[0].servings, 5);
        assert_eq!(snapshot[0].status, DonationStatus::Claimed);
    }
}
