//! `PayPal` Orders v2 REST client.
//!
//! Uses client-credentials OAuth; the access token is cached in memory and
//! fetched again shortly before it expires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::instrument;
use url::Url;

use super::{Capture, CreatedPayment, PaymentError, PaymentProvider, PaymentRequest};
use crate::config::PayPalConfig;

/// Seconds before expiry at which a cached token is considered stale.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// `PayPal` REST API client.
#[derive(Clone)]
pub struct PayPalClient {
    inner: Arc<PayPalClientInner>,
}

struct PayPalClientInner {
    client: reqwest::Client,
    api_base: Url,
    client_id: String,
    client_secret: SecretString,
    /// In-memory token cache
    token: RwLock<Option<AccessToken>>,
}

#[derive(Clone)]
struct AccessToken {
    value: SecretString,
    /// Unix timestamp when the token expires.
    expires_at: i64,
}

impl AccessToken {
    fn is_fresh(&self, now: i64) -> bool {
        now + TOKEN_REFRESH_MARGIN_SECS < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Token lifetime in seconds.
    expires_in: i64,
}

#[derive(Serialize)]
struct CreateOrderBody<'a> {
    intent: &'static str,
    purchase_units: [PurchaseUnit<'a>; 1],
    application_context: ApplicationContext<'a>,
}

#[derive(Serialize)]
struct PurchaseUnit<'a> {
    invoice_id: &'a str,
    description: &'a str,
    amount: Amount,
}

#[derive(Serialize)]
struct Amount {
    currency_code: &'static str,
    value: String,
}

#[derive(Serialize)]
struct ApplicationContext<'a> {
    return_url: &'a str,
    cancel_url: &'a str,
    user_action: &'static str,
    shipping_preference: &'static str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnitResponse>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnitResponse {
    #[serde(default)]
    payments: Option<Payments>,
}

#[derive(Debug, Deserialize)]
struct Payments {
    #[serde(default)]
    captures: Vec<CaptureResponse>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    issue: String,
}

impl PayPalClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` if the HTTP client cannot be built.
    pub fn new(config: &PayPalConfig, timeout: Duration) -> Result<Self, PaymentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(PayPalClientInner {
                client,
                api_base: config.api_base.clone(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                token: RwLock::new(None),
            }),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.inner.api_base.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Cached access token, fetching a new one if missing or stale.
    #[instrument(skip(self))]
    async fn access_token(&self) -> Result<SecretString, PaymentError> {
        let now = chrono::Utc::now().timestamp();

        if let Some(token) = self.inner.token.read().await.as_ref()
            && token.is_fresh(now)
        {
            return Ok(token.value.clone());
        }

        let response = self
            .inner
            .client
            .post(self.endpoint("/v1/oauth2/token"))
            .basic_auth(
                &self.inner.client_id,
                Some(self.inner.client_secret.expose_secret()),
            )
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let response = ensure_success(response).await?;
        let body: TokenResponse = response.json().await?;

        let token = AccessToken {
            value: SecretString::from(body.access_token),
            expires_at: now + body.expires_in,
        };
        let value = token.value.clone();
        *self.inner.token.write().await = Some(token);

        tracing::debug!(expires_in = body.expires_in, "Obtained PayPal access token");
        Ok(value)
    }

    /// Drop the cached token so the next call re-authenticates.
    async fn clear_token(&self) {
        *self.inner.token.write().await = None;
    }

    /// Send a bearer-authenticated request built by `build`.
    ///
    /// A 401 means the cached token was revoked early: it is dropped and the
    /// request is sent once more with a fresh token.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, PaymentError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.access_token().await?;
        let response = build(token.expose_secret()).send().await?;
        if !is_unauthorized(response.status()) {
            return Ok(response);
        }

        tracing::warn!("PayPal rejected the access token, re-authenticating");
        self.clear_token().await;
        let token = self.access_token().await?;
        Ok(build(token.expose_secret()).send().await?)
    }
}

#[async_trait]
impl PaymentProvider for PayPalClient {
    #[instrument(skip(self, request), fields(invoice_id = %request.invoice_id, amount = %request.amount))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<CreatedPayment, PaymentError> {
        let body = CreateOrderBody {
            intent: "CAPTURE",
            purchase_units: [PurchaseUnit {
                invoice_id: &request.invoice_id,
                description: &request.description,
                amount: Amount {
                    currency_code: request.amount.currency_code.code(),
                    value: request.amount.to_minor_string(),
                },
            }],
            application_context: ApplicationContext {
                return_url: request.return_url.as_str(),
                cancel_url: request.cancel_url.as_str(),
                user_action: "PAY_NOW",
                shipping_preference: "NO_SHIPPING",
            },
        };

        let url = self.endpoint("/v2/checkout/orders");
        let response = self
            .send_authorized(|token| {
                self.inner
                    .client
                    .post(&url)
                    .bearer_auth(token)
                    .header("PayPal-Request-Id", &request.invoice_id)
                    .json(&body)
            })
            .await?;

        let response = ensure_success(response).await?;
        let order: OrderResponse = response.json().await?;
        let approval_url =
            approval_link(&order.links).ok_or(PaymentError::MissingApprovalLink)?;

        tracing::info!(reference = %order.id, status = %order.status, "PayPal order created");

        Ok(CreatedPayment {
            reference: order.id,
            approval_url: approval_url.to_owned(),
        })
    }

    #[instrument(skip(self))]
    async fn capture(&self, reference: &str) -> Result<Capture, PaymentError> {
        let url = self.endpoint(&format!("/v2/checkout/orders/{reference}/capture"));
        let request_id = format!("capture-{reference}");
        let response = self
            .send_authorized(|token| {
                self.inner
                    .client
                    .post(&url)
                    .bearer_auth(token)
                    .header("Content-Type", "application/json")
                    .header("PayPal-Request-Id", &request_id)
            })
            .await?;

        let status = response.status();

        // 422 carries buyer-side problems (declined instrument, not approved).
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            let text = response.text().await.unwrap_or_default();
            let issue = error_message(&text);
            tracing::warn!(%reference, %issue, "PayPal capture declined");
            return Ok(Capture {
                success: false,
                provider_order_id: None,
                status: issue,
            });
        }

        let response = ensure_success(response).await?;
        let order: OrderResponse = response.json().await?;

        Ok(capture_from_order(&order))
    }
}

fn is_unauthorized(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED
}

/// The link the buyer follows to approve the payment.
fn approval_link(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| l.rel == "approve" || l.rel == "payer-action")
        .map(|l| l.href.as_str())
}

fn capture_from_order(order: &OrderResponse) -> Capture {
    let capture = order
        .purchase_units
        .iter()
        .filter_map(|u| u.payments.as_ref())
        .flat_map(|p| p.captures.iter())
        .next();

    let success = order.status == "COMPLETED"
        && capture.is_none_or(|c| c.status == "COMPLETED" || c.status == "PENDING");

    Capture {
        success,
        provider_order_id: capture.map_or_else(|| Some(order.id.clone()), |c| Some(c.id.clone())),
        status: order.status.clone(),
    }
}

/// Best human-readable message from a `PayPal` error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body).map_or_else(
        |_| body.to_owned(),
        |e| {
            e.details
                .into_iter()
                .next()
                .map(|d| d.issue)
                .or(e.message)
                .or(e.name)
                .unwrap_or_else(|| body.to_owned())
        },
    )
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PaymentError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    Err(PaymentError::Api {
        status: status.as_u16(),
        message: error_message(&text),
    })
}
