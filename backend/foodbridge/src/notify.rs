//! Notification gateway: template emails sent through Brevo.
//!
//! The workflow only depends on the [`NotificationGateway`] trait. Delivery
//! is fire-and-forget: a single HTTP attempt, no retries, and the caller
//! decides what a failure means for its own state.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::TemplateIds;
use crate::errors::{AppError, Result};
use crate::models::Quantity;

// ─────────────────────────────────────────────────────────
// Payload shapes
// ─────────────────────────────────────────────────────────

/// Contact details of one side of a handover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub name: String,
    pub quantity: Quantity,
}

/// Body of `/api/claim-food` and `/api/confirm-receipt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoverNotice {
    pub restaurant: Party,
    pub orphanage: Party,
    pub food: FoodItem,
}

/// Everything both parties need once a request has been claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentDetails {
    pub food_name: String,
    pub servings: i64,
    pub restaurant_name: String,
    pub restaurant_email: String,
    pub restaurant_phone: String,
    pub restaurant_address: String,
    pub orphanage_name: String,
    pub orphanage_email: String,
    pub maps_link: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Claim,
    Receipt,
    Fulfillment,
}

impl Template {
    pub fn id(self, ids: &TemplateIds) -> i64 {
        match self {
            Template::Claim => ids.claim,
            Template::Receipt => ids.receipt,
            Template::Fulfillment => ids.fulfillment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
}

/// A rendered template email ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateEmail {
    pub to: Vec<Recipient>,
    pub template: Template,
    pub params: Value,
}

impl TemplateEmail {
    /// Sent when a restaurant commits to an orphanage's need.
    pub fn claim(notice: &HandoverNotice) -> Self {
        Self {
            to: handover_recipients(notice),
            template: Template::Claim,
            params: json!({
                "food_name": notice.food.name,
                "food_quantity": notice.food.quantity,
                "restaurant_name": notice.restaurant.name,
                "restaurant_phone": notice.restaurant.phone,
                "restaurant_address": notice.restaurant.address,
                "orphanage_name": notice.orphanage.name,
                "orphanage_phone": notice.orphanage.phone,
                "orphanage_address": notice.orphanage.address,
            }),
        }
    }

    /// Sent when the orphanage confirms it received the food.
    pub fn receipt(notice: &HandoverNotice) -> Self {
        Self {
            to: handover_recipients(notice),
            template: Template::Receipt,
            params: json!({
                "food_name": notice.food.name,
                "food_quantity": notice.food.quantity,
                "restaurant_name": notice.restaurant.name,
                "orphanage_name": notice.orphanage.name,
            }),
        }
    }

    pub fn fulfillment(details: &FulfillmentDetails) -> Self {
        let to = [
            (&details.restaurant_email, &details.restaurant_name),
            (&details.orphanage_email, &details.orphanage_name),
        ]
        .into_iter()
        .filter(|(email, _)| !email.trim().is_empty())
        .map(|(email, name)| Recipient {
            email: email.clone(),
            name: name.clone(),
        })
        .collect();

        Self {
            to,
            template: Template::Fulfillment,
            params: json!({
                "food_name": details.food_name,
                "food_quantity": details.servings,
                "restaurant_name": details.restaurant_name,
                "restaurant_email": details.restaurant_email,
                "restaurant_phone": details.restaurant_phone,
                "restaurant_address": details.restaurant_address,
                "orphanage_name": details.orphanage_name,
                "orphanage_email": details.orphanage_email,
                "maps_link": details.maps_link,
            }),
        }
    }
}

fn handover_recipients(notice: &HandoverNotice) -> Vec<Recipient> {
    vec![
        Recipient {
            email: notice.restaurant.email.clone(),
            name: notice.restaurant.name.clone(),
        },
        Recipient {
            email: notice.orphanage.email.clone(),
            name: notice.orphanage.name.clone(),
        },
    ]
}

// ─────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────

/// What happened to an email the gateway accepted without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the delivery service.
    Sent,
    /// Not sent because the gateway is not configured.
    Skipped,
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Hand one email to the delivery service. Returns once the service has
    /// answered; delivery itself is not confirmed.
    async fn send(&self, email: &TemplateEmail) -> Result<Delivery>;
}

/// Brevo transactional email client.
pub struct BrevoGateway {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    templates: TemplateIds,
}

impl BrevoGateway {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        api_key: Option<String>,
        templates: TemplateIds,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key,
            templates,
        }
    }

    fn request_body(&self, email: &TemplateEmail) -> Value {
        json!({
            "to": email.to,
            "templateId": email.template.id(&self.templates),
            "params": email.params,
        })
    }
}

#[async_trait]
impl NotificationGateway for BrevoGateway {
    async fn send(&self, email: &TemplateEmail) -> Result<Delivery> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("Brevo API key missing, skipping {:?} email", email.template);
            return Ok(Delivery::Skipped);
        };

        if email.to.is_empty() {
            return Err(AppError::Notification(
                "email has no recipients".to_string(),
            ));
        }

        let resp = self
            .client
            .post(&self.api_url)
            .header("api-key", api_key)
            .json(&self.request_body(email))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Brevo returned {status}: {body}"
            )));
        }

        debug!(
            "Sent {:?} email to {} recipient(s)",
            email.template,
            email.to.len()
        );
        Ok(Delivery::Sent)
    }
}

/// In-process gateway that records emails instead of sending them.
#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct RecordingGateway {
        sent: Mutex<Vec<TemplateEmail>>,
        fail: AtomicBool,
    }

    impl RecordingGateway {
        pub fn failing() -> Self {
            let gateway = Self::default();
            gateway.fail.store(true, Ordering::SeqCst);
            gateway
        }

        pub fn sent(&self) -> Vec<TemplateEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationGateway for RecordingGateway {
        async fn send(&self, email: &TemplateEmail) -> Result<Delivery> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Notification("gateway unavailable".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(Delivery::Sent)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
