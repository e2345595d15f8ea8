//! Subscription management redirects.

use std::fmt;
use std::str::FromStr;

use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{ApiClient, ErrorBody};
use crate::error::ApiError;

const PORTAL_FALLBACK: &str = "Failed to open billing portal";
const CHECKOUT_FALLBACK: &str = "Failed to create checkout session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(BillingInterval::Monthly),
            "yearly" | "year" | "annual" => Ok(BillingInterval::Yearly),
            other => Err(format!(
                "unknown billing interval '{other}' (expected 'monthly' or 'yearly')"
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckoutRequest<'a> {
    plan_id: &'a str,
    billing_interval: BillingInterval,
}

#[derive(Debug, Deserialize)]
struct PortalResponse {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutResponse {
    #[serde(default)]
    checkout_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BillingClient {
    api: ApiClient,
}

impl BillingClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// URL of the hosted subscription management portal.
    pub async fn portal_url(&self) -> Result<String, ApiError> {
        let response = self
            .api
            .http()
            .post(self.api.url("/api/v1/payment/portal"))
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "Billing portal request rejected");
            return Err(ApiError::Server(PORTAL_FALLBACK.to_string()));
        }

        let body: PortalResponse = response.json().await?;
        let url = body
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ApiError::message("No portal URL returned"))?;
        info!("Billing portal session created");
        Ok(url)
    }

    /// URL of a hosted checkout page for `plan_id`.
    pub async fn checkout_url(
        &self,
        plan_id: &str,
        interval: BillingInterval,
    ) -> Result<String, ApiError> {
        let response = self
            .api
            .http()
            .post(self.api.url("/api/v1/payment/checkout"))
            .json(&CheckoutRequest {
                plan_id,
                billing_interval: interval,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message)
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| CHECKOUT_FALLBACK.to_string());
            warn!(status, plan = plan_id, message = %message, "Checkout request rejected");
            return Err(ApiError::Server(message));
        }

        let body: CheckoutResponse = response.json().await?;
        let url = body
            .checkout_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ApiError::message("No checkout URL returned"))?;
        info!(plan = plan_id, interval = %interval, "Checkout session created");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_intervals_leniently() {
        assert_eq!("Monthly".parse(), Ok(BillingInterval::Monthly));
        assert_eq!("annual".parse(), Ok(BillingInterval::Yearly));
        assert!("weekly".parse::<BillingInterval>().is_err());
    }

    #[test]
    fn checkout_body_uses_wire_names() {
        let body = serde_json::to_value(CheckoutRequest {
            plan_id: "premium",
            billing_interval: BillingInterval::Yearly,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"plan_id": "premium", "billing_interval": "yearly"})
        );
    }
}
