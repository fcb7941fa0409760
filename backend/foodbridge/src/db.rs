//! Database layer: pool setup, migrations, and record queries.
//!
//! Writes that take part in the claim transaction are generic over
//! [`SqliteExecutor`] so they run either on the pool or inside a
//! [`sqlx::Transaction`].

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteExecutor, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::Result;
use crate::models::{
    Donation, DonationRow, DonationStatus, Profile, ProfileRow, Request, RequestRow,
    RequestStatus,
};

const DONATION_SELECT: &str = r#"
    SELECT id, request_id, restaurant_id, restaurant_name, restaurant_email,
           restaurant_phone, restaurant_address, food_name, servings, status,
           created_at, lat, lng, orphanage_id, orphanage_name, orphanage_email,
           maps_link, email_sent, fulfilled_at
    FROM   donations
"#;

const REQUEST_SELECT: &str = r#"
    SELECT id, orphanage_id, orphanage_name, orphanage_email, item_needed,
           quantity, status, lat, lng, created_at, fulfilled_by, fulfilled_at
    FROM   requests
"#;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Single-connection in-memory pool with the schema applied.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

// ─────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────

/// Insert or replace a profile keyed by uid.
pub async fn upsert_profile(pool: &SqlitePool, profile: &Profile) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO profiles (uid, role, name, email, phone, address, lat, lng, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT (uid) DO UPDATE SET
            role = excluded.role,
            name = excluded.name,
            email = excluded.email,
            phone = excluded.phone,
            address = excluded.address,
            lat = excluded.lat,
            lng = excluded.lng,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&profile.uid)
    .bind(profile.role)
    .bind(&profile.name)
    .bind(&profile.email)
    .bind(&profile.phone)
    .bind(&profile.address)
    .bind(profile.location.map(|p| p.lat))
    .bind(profile.location.map(|p| p.lng))
    .bind(profile.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_profile(pool: &SqlitePool, uid: &str) -> Result<Option<Profile>> {
    let row = sqlx::query_as::<_, ProfileRow>(
        r#"
        SELECT uid, role, name, email, phone, address, lat, lng, updated_at
        FROM   profiles
        WHERE  uid = ?1
        "#,
    )
    .bind(uid)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Profile::from))
}

// ─────────────────────────────────────────────────────────
// Donation writes
// ─────────────────────────────────────────────────────────

pub async fn insert_donation<'e, E>(executor: E, donation: &Donation) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO donations
            (id, request_id, restaurant_id, restaurant_name, restaurant_email,
             restaurant_phone, restaurant_address, food_name, servings, status,
             created_at, lat, lng, orphanage_id, orphanage_name, orphanage_email,
             maps_link, email_sent, fulfilled_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
    )
    .bind(&donation.id)
    .bind(&donation.request_id)
    .bind(&donation.restaurant_id)
    .bind(&donation.restaurant_name)
    .bind(&donation.restaurant_email)
    .bind(&donation.restaurant_phone)
    .bind(&donation.restaurant_address)
    .bind(&donation.food_name)
    .bind(donation.servings)
    .bind(donation.status)
    .bind(donation.created_at)
    .bind(donation.location.map(|p| p.lat))
    .bind(donation.location.map(|p| p.lng))
    .bind(&donation.orphanage_id)
    .bind(&donation.orphanage_name)
    .bind(&donation.orphanage_email)
    .bind(&donation.maps_link)
    .bind(donation.email_sent)
    .bind(donation.fulfilled_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_email_sent(pool: &SqlitePool, donation_id: &str) -> Result<()> {
    sqlx::query("UPDATE donations SET email_sent = 1 WHERE id = ?1")
        .bind(donation_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move a donation from `Claimed` to `Fulfilled`.
///
/// Returns `false` when the donation was no longer `Claimed`.
pub async fn fulfill_donation_if_claimed(
    pool: &SqlitePool,
    donation_id: &str,
    fulfilled_at: i64,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        "UPDATE donations SET status = ?1, fulfilled_at = ?2 WHERE id = ?3 AND status = ?4",
    )
    .bind(DonationStatus::Fulfilled)
    .bind(fulfilled_at)
    .bind(donation_id)
    .bind(DonationStatus::Claimed)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected == 1)
}

// ─────────────────────────────────────────────────────────
// Donation reads
// ─────────────────────────────────────────────────────────

pub async fn get_donation(pool: &SqlitePool, id: &str) -> Result<Option<Donation>> {
    let row = sqlx::query_as::<_, DonationRow>(&format!("{DONATION_SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Donation::from))
}

/// Donations posted or claimed by a restaurant, newest first.
pub async fn list_donations_for_restaurant(
    pool: &SqlitePool,
    restaurant_id: &str,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, DonationRow>(&format!(
        "{DONATION_SELECT} WHERE restaurant_id = ?1 ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(restaurant_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Donation::from).collect())
}

/// Donations claimed for an orphanage, newest first.
pub async fn list_donations_for_orphanage(
    pool: &SqlitePool,
    orphanage_id: &str,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, DonationRow>(&format!(
        "{DONATION_SELECT} WHERE orphanage_id = ?1 ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(orphanage_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Donation::from).collect())
}

pub async fn list_donations_for_request(
    pool: &SqlitePool,
    request_id: &str,
) -> Result<Vec<Donation>> {
    let rows = sqlx::query_as::<_, DonationRow>(&format!(
        "{DONATION_SELECT} WHERE request_id = ?1 ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(request_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Donation::from).collect())
}

// ─────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────

pub async fn insert_request(pool: &SqlitePool, request: &Request) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO requests
            (id, orphanage_id, orphanage_name, orphanage_email, item_needed,
             quantity, status, lat, lng, created_at, fulfilled_by, fulfilled_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&request.id)
    .bind(&request.orphanage_id)
    .bind(&request.orphanage_name)
    .bind(&request.orphanage_email)
    .bind(&request.item_needed)
    .bind(request.quantity)
    .bind(request.status)
    .bind(request.location.lat)
    .bind(request.location.lng)
    .bind(request.created_at)
    .bind(&request.fulfilled_by)
    .bind(request.fulfilled_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a request `Fulfilled` only if it is still `Pending`.
///
/// Returns `false` when another writer got there first.
pub async fn fulfill_request_if_pending<'e, E>(
    executor: E,
    request_id: &str,
    fulfilled_by: &str,
    fulfilled_at: i64,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let rows_affected = sqlx::query(
        r#"
        UPDATE requests
        SET    status = ?1, fulfilled_by = ?2, fulfilled_at = ?3
        WHERE  id = ?4 AND status = ?5
        "#,
    )
    .bind(RequestStatus::Fulfilled)
    .bind(fulfilled_by)
    .bind(fulfilled_at)
    .bind(request_id)
    .bind(RequestStatus::Pending)
    .execute(executor)
    .await?
    .rows_affected();
    Ok(rows_affected == 1)
}

pub async fn get_request(pool: &SqlitePool, id: &str) -> Result<Option<Request>> {
    let row = sqlx::query_as::<_, RequestRow>(&format!("{REQUEST_SELECT} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Request::from))
}

/// Open requests across all orphanages, newest first.
pub async fn list_pending_requests(pool: &SqlitePool) -> Result<Vec<Request>> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "{REQUEST_SELECT} WHERE status = ?1 ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(RequestStatus::Pending)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Request::from).collect())
}

pub async fn list_requests_for_orphanage(
    pool: &SqlitePool,
    orphanage_id: &str,
) -> Result<Vec<Request>> {
    let rows = sqlx::query_as::<_, RequestRow>(&format!(
        "{REQUEST_SELECT} WHERE orphanage_id = ?1 ORDER BY created_at DESC, rowid DESC"
    ))
    .bind(orphanage_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Request::from).collect())
}
