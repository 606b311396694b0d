use reqwest::{Client, StatusCode};
use shared::{
    error::ApiError,
    protocol::{CheckoutRequest, CheckoutResponse},
};
use thiserror::Error;
use tracing::info;

/// One purchasable credit bundle from the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditPackage {
    /// Price in whole US dollars; also the `amount` sent at checkout.
    pub price_usd: u32,
    pub minutes: u32,
}

pub const CREDIT_PACKAGES: [CreditPackage; 4] = [
    CreditPackage {
        price_usd: 5,
        minutes: 42,
    },
    CreditPackage {
        price_usd: 10,
        minutes: 83,
    },
    CreditPackage {
        price_usd: 15,
        minutes: 125,
    },
    CreditPackage {
        price_usd: 20,
        minutes: 167,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    #[error("checkout rejected: {0}")]
    Rejected(String),
    #[error("network failure: {0}")]
    Network(String),
}

/// Client for the backend's checkout endpoint. Payment itself happens on
/// the provider's hosted page; all this yields is the redirect URL.
pub struct BillingClient {
    http: Client,
    base_url: String,
}

impl BillingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn create_checkout(
        &self,
        access_token: &str,
        package: CreditPackage,
    ) -> Result<String, BillingError> {
        let response = self
            .http
            .post(format!("{}/phone/checkout", self.base_url))
            .bearer_auth(access_token)
            .json(&CheckoutRequest {
                amount: package.price_usd,
            })
            .send()
            .await
            .map_err(|err| BillingError::Network(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(checkout_failure(status, response).await);
        }
        let body: CheckoutResponse = response
            .json()
            .await
            .map_err(|err| BillingError::Network(err.to_string()))?;
        info!(
            "billing: checkout created amount_usd={} minutes={}",
            package.price_usd, package.minutes
        );
        Ok(body.url)
    }
}

async fn checkout_failure(status: StatusCode, response: reqwest::Response) -> BillingError {
    match response.json::<ApiError>().await {
        Ok(body) => BillingError::Rejected(body.message),
        Err(_) => BillingError::Rejected(format!("checkout failed with status {status}")),
    }
}
