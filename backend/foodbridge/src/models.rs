//! Record types for profiles, donations and requests.
//!
//! Each stored record has a flat `*Row` type matching its table and a
//! domain type serialised to API clients in camelCase.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Server-assigned timestamp in Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Opaque generated record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ─────────────────────────────────────────────────────────
// Shared value types
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Build a point from nullable columns.
    pub fn from_columns(lat: Option<f64>, lng: Option<f64>) -> Option<Self> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Some(Self { lat, lng }),
            _ => None,
        }
    }
}

/// Require a usable location, rejecting absent or out-of-range coordinates.
pub fn require_location(location: Option<GeoPoint>) -> Result<GeoPoint> {
    match location {
        Some(point) if point.is_valid() => Ok(point),
        Some(_) => Err(AppError::Validation(
            "Location coordinates are out of range".to_string(),
        )),
        None => Err(AppError::Validation(
            "Please pin your location on the map".to_string(),
        )),
    }
}

/// A quantity as submitted by clients: either a JSON number or a numeric
/// string such as `"5"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Number(i64),
    Text(String),
}

impl Quantity {
    /// Resolve to a positive integer.
    pub fn positive(&self) -> Result<i64> {
        let value = match self {
            Quantity::Number(n) => *n,
            Quantity::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                AppError::Validation(format!("Quantity must be a whole number, got {s:?}"))
            })?,
        };
        if value <= 0 {
            return Err(AppError::Validation(format!(
                "Quantity must be positive, got {value}"
            )));
        }
        Ok(value)
    }
}

impl From<&str> for Quantity {
    fn from(s: &str) -> Self {
        Quantity::Text(s.to_string())
    }
}

// ─────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Restaurant,
    Orphanage,
    Driver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub location: Option<GeoPoint>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRow {
    pub uid: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub updated_at: i64,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            uid: row.uid,
            role: row.role,
            name: row.name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            location: GeoPoint::from_columns(row.lat, row.lng),
            updated_at: row.updated_at,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "PascalCase")]
pub enum DonationStatus {
    Available,
    Claimed,
    Fulfilled,
}

impl DonationStatus {
    /// Forward transitions a stored donation may take.
    ///
    /// `Available` donations have no modelled successor; claimed donations
    /// are created directly in `Claimed` by the claim workflow.
    pub fn can_transition_to(self, next: DonationStatus) -> bool {
        matches!((self, next), (DonationStatus::Claimed, DonationStatus::Fulfilled))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Claimed => "Claimed",
            Self::Fulfilled => "Fulfilled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    pub id: String,
    pub request_id: Option<String>,
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub restaurant_email: String,
    pub restaurant_phone: String,
    pub restaurant_address: String,
    pub food_name: String,
    pub servings: i64,
    pub status: DonationStatus,
    pub created_at: i64,
    pub location: Option<GeoPoint>,
    pub orphanage_id: Option<String>,
    pub orphanage_name: Option<String>,
    pub orphanage_email: Option<String>,
    pub maps_link: Option<String>,
    pub email_sent: bool,
    pub fulfilled_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DonationRow {
    pub id: String,
    pub request_id: Option<String>,
    pub restaurant_id: String,
    pub restaurant_name: String,
    pub restaurant_email: String,
    pub restaurant_phone: String,
    pub restaurant_address: String,
    pub food_name: String,
    pub servings: i64,
    pub status: DonationStatus,
    pub created_at: i64,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub orphanage_id: Option<String>,
    pub orphanage_name: Option<String>,
    pub orphanage_email: Option<String>,
    pub maps_link: Option<String>,
    pub email_sent: bool,
    pub fulfilled_at: Option<i64>,
}

impl From<DonationRow> for Donation {
    fn from(row: DonationRow) -> Self {
        Self {
            id: row.id,
            request_id: row.request_id,
            restaurant_id: row.restaurant_id,
            restaurant_name: row.restaurant_name,
            restaurant_email: row.restaurant_email,
            restaurant_phone: row.restaurant_phone,
            restaurant_address: row.restaurant_address,
            food_name: row.food_name,
            servings: row.servings,
            status: row.status,
            created_at: row.created_at,
            location: GeoPoint::from_columns(row.lat, row.lng),
            orphanage_id: row.orphanage_id,
            orphanage_name: row.orphanage_name,
            orphanage_email: row.orphanage_email,
            maps_link: row.maps_link,
            email_sent: row.email_sent,
            fulfilled_at: row.fulfilled_at,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "PascalCase")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
}

impl RequestStatus {
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        matches!((self, next), (RequestStatus::Pending, RequestStatus::Fulfilled))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub orphanage_id: String,
    pub orphanage_name: String,
    pub orphanage_email: String,
    pub item_needed: String,
    pub quantity: i64,
    pub status: RequestStatus,
    pub location: GeoPoint,
    pub created_at: i64,
    pub fulfilled_by: Option<String>,
    pub fulfilled_at: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RequestRow {
    pub id: String,
    pub orphanage_id: String,
    pub orphanage_name: String,
    pub orphanage_email: String,
    pub item_needed: String,
    pub quantity: i64,
    pub status: RequestStatus,
    pub lat: f64,
    pub lng: f64,
    pub created_at: i64,
    pub fulfilled_by: Option<String>,
    pub fulfilled_at: Option<i64>,
}

impl From<RequestRow> for Request {
    fn from(row: RequestRow) -> Self {
        Self {
            id: row.id,
            orphanage_id: row.orphanage_id,
            orphanage_name: row.orphanage_name,
            orphanage_email: row.orphanage_email,
            item_needed: row.item_needed,
            quantity: row.quantity,
            status: row.status,
            location: GeoPoint {
                lat: row.lat,
                lng: row.lng,
            },
            created_at: row.created_at,
            fulfilled_by: row.fulfilled_by,
            fulfilled_at: row.fulfilled_at,
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
