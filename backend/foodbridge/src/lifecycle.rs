//! Donation lifecycle: profile save, donation and request creation, and
//! receipt confirmation.
//!
//! | Record   | From        | To          | Trigger                         |
//! |----------|-------------|-------------|---------------------------------|
//! | Donation | (new)       | `Available` | [`create_donation`]             |
//! | Request  | (new)       | `Pending`   | [`create_request`]              |
//! | Request  | `Pending`   | `Fulfilled` | claim, see [`crate::coordinator`] |
//! | Donation | (new)       | `Claimed`   | claim, see [`crate::coordinator`] |
//! | Donation | `Claimed`   | `Fulfilled` | [`confirm_receipt`]             |
//!
//! Every validation runs before the first write.

use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::context::ActorContext;
use crate::db;
use crate::errors::{AppError, Result};
use crate::feed::{ChangeFeed, Collection};
use crate::models::{
    new_id, now_millis, require_location, Donation, DonationStatus, GeoPoint, Profile, Quantity,
    Request, RequestStatus, Role,
};
use crate::notify::{
    Delivery, FoodItem, HandoverNotice, NotificationGateway, Party, TemplateEmail,
};

const UNNAMED_RESTAURANT: &str = "Unnamed Restaurant";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileInput {
    pub role: Role,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDonation {
    pub food_name: String,
    pub quantity: Quantity,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRequest {
    pub item_needed: String,
    pub quantity: Quantity,
    /// Overrides the orphanage profile's location.
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

fn required_text(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Save the caller's profile. A pinned location is mandatory.
pub async fn save_profile(pool: &SqlitePool, uid: &str, input: ProfileInput) -> Result<Profile> {
    let uid = required_text(uid, "uid")?;
    let location = require_location(input.location)?;

    let profile = Profile {
        uid,
        role: input.role,
        name: input.name.trim().to_string(),
        email: input.email.trim().to_string(),
        phone: input.phone.trim().to_string(),
        address: input.address.trim().to_string(),
        location: Some(location),
        updated_at: now_millis(),
    };
    db::upsert_profile(pool, &profile).await?;
    info!("Saved {:?} profile {}", profile.role, profile.uid);
    Ok(profile)
}

/// Post a restaurant's surplus food as an `Available` donation.
pub async fn create_donation(
    pool: &SqlitePool,
    feed: &ChangeFeed,
    ctx: &ActorContext,
    input: NewDonation,
) -> Result<Donation> {
    ctx.require_role(Role::Restaurant)?;
    let location = require_location(ctx.location())?;
    let food_name = required_text(&input.food_name, "foodName")?;
    let servings = input.quantity.positive()?;

    let profile = &ctx.profile;
    let restaurant_name = if profile.name.is_empty() {
        UNNAMED_RESTAURANT.to_string()
    } else {
        profile.name.clone()
    };

    let donation = Donation {
        id: new_id(),
        request_id: None,
        restaurant_id: profile.uid.clone(),
        restaurant_name,
        restaurant_email: profile.email.clone(),
        restaurant_phone: profile.phone.clone(),
        restaurant_address: profile.address.clone(),
        food_name,
        servings,
        status: DonationStatus::Available,
        created_at: now_millis(),
        location: Some(location),
        orphanage_id: None,
        orphanage_name: None,
        orphanage_email: None,
        maps_link: None,
        email_sent: false,
        fulfilled_at: None,
    };

    db::insert_donation(pool, &donation).await?;
    feed.publish(Collection::Donations, &donation.id);
    info!(
        "Donation {} created by {} ({} x {})",
        donation.id, donation.restaurant_id, donation.servings, donation.food_name
    );
    Ok(donation)
}

/// Post an orphanage's food need as a `Pending` request.
pub async fn create_request(
    pool: &SqlitePool,
    feed: &ChangeFeed,
    ctx: &ActorContext,
    input: NewRequest,
) -> Result<Request> {
    ctx.require_role(Role::Orphanage)?;
    let location = require_location(input.location.or(ctx.location()))?;
    let item_needed = required_text(&input.item_needed, "itemNeeded")?;
    let quantity = input.quantity.positive()?;

    let request = Request {
        id: new_id(),
        orphanage_id: ctx.uid().to_string(),
        orphanage_name: ctx.profile.name.clone(),
        orphanage_email: ctx.profile.email.clone(),
        item_needed,
        quantity,
        status: RequestStatus::Pending,
        location,
        created_at: now_millis(),
        fulfilled_by: None,
        fulfilled_at: None,
    };

    db::insert_request(pool, &request).await?;
    feed.publish(Collection::Requests, &request.id);
    info!(
        "Request {} posted by {} ({} x {})",
        request.id, request.orphanage_id, request.quantity, request.item_needed
    );
    Ok(request)
}

/// The claiming orphanage confirms it received a `Claimed` donation.
///
/// The status change commits before the receipt email is sent; an email
/// failure is logged and does not undo it.
pub async fn confirm_receipt(
    pool: &SqlitePool,
    feed: &ChangeFeed,
    gateway: &dyn NotificationGateway,
    ctx: &ActorContext,
    donation_id: &str,
) -> Result<Donation> {
    ctx.require_role(Role::Orphanage)?;

    let mut donation = db::get_donation(pool, donation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("donation {donation_id}")))?;

    if donation.orphanage_id.as_deref() != Some(ctx.uid()) {
        return Err(AppError::Validation(format!(
            "donation {donation_id} was not claimed for this orphanage"
        )));
    }
    if !donation.status.can_transition_to(DonationStatus::Fulfilled) {
        return Err(AppError::InvalidTransition(format!(
            "donation {donation_id} is {}",
            donation.status.as_str()
        )));
    }

    let fulfilled_at = now_millis();
    if !db::fulfill_donation_if_claimed(pool, donation_id, fulfilled_at).await? {
        return Err(AppError::InvalidTransition(format!(
            "donation {donation_id} is no longer Claimed"
        )));
    }
    donation.status = DonationStatus::Fulfilled;
    donation.fulfilled_at = Some(fulfilled_at);
    feed.publish(Collection::Donations, donation_id);
    info!("Donation {donation_id} received by {}", ctx.uid());

    let notice = receipt_notice(&donation, &ctx.profile);
    match gateway.send(&TemplateEmail::receipt(&notice)).await {
        Ok(Delivery::Sent) => {}
        Ok(Delivery::Skipped) => info!("Receipt email for donation {donation_id} skipped"),
        Err(e) => warn!("Receipt email for donation {donation_id} failed: {e}"),
    }

    Ok(donation)
}

fn receipt_notice(donation: &Donation, orphanage: &Profile) -> HandoverNotice {
    HandoverNotice {
        restaurant: Party {
            name: donation.restaurant_name.clone(),
            email: donation.restaurant_email.clone(),
            phone: donation.restaurant_phone.clone(),
            address: donation.restaurant_address.clone(),
        },
        orphanage: Party {
            name: donation
                .orphanage_name
                .clone()
                .unwrap_or_else(|| orphanage.name.clone()),
            email: donation
                .orphanage_email
                .clone()
                .unwrap_or_else(|| orphanage.email.clone()),
            phone: orphanage.phone.clone(),
            address: orphanage.address.clone(),
        },
        food: FoodItem {
            name: donation.food_name.clone(),
            quantity: Quantity::Number(donation.servings),
        },
    }
}
