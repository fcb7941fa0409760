//! FoodBridge coordination backend.
//!
//! Restaurants post surplus food, orphanages post needs, and a restaurant
//! claims an orphanage's need. This crate owns the records and the state
//! transitions behind that flow:
//!
//! | Module          | Responsibility                                        |
//! |-----------------|-------------------------------------------------------|
//! | [`models`]      | Profiles, donations, requests and their statuses      |
//! | [`db`]          | SQLite pool, migrations and queries                   |
//! | [`feed`]        | Snapshot subscriptions over committed changes         |
//! | [`lifecycle`]   | Profile save, donation/request creation, receipts     |
//! | [`coordinator`] | The transactional claim workflow                      |
//! | [`notify`]      | Template email gateway (Brevo)                        |
//! | [`api`]         | Axum routes                                           |

pub mod api;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod db;
pub mod errors;
pub mod feed;
pub mod lifecycle;
pub mod models;
pub mod notify;

#[cfg(test)]
mod invariants;
