//! Hosted checkout sessions and their QR codes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use qrcode::{render::svg, QrCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub payment_status: String,
    pub customer_email: Option<String>,
}

impl SessionStatus {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }
}

#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> AppResult<CheckoutSession>;

    async fn retrieve_session(&self, session_id: &str) -> AppResult<SessionStatus>;
}

/// SVG QR code of `url`, as a base64 data URL.
pub fn checkout_qr_code(url: &str) -> AppResult<String> {
    let code = QrCode::new(url.as_bytes())
        .map_err(|err| AppError::BadRequest(format!("checkout url cannot be encoded: {err}")))?;
    let image = code
        .render::<svg::Color>()
        .min_dimensions(200, 200)
        .build();
    Ok(format!("data:image/svg+xml;base64,{}", STANDARD.encode(image)))
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
    payment_status: Option<String>,
    customer_details: Option<StripeCustomerDetails>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomerDetails {
    email: Option<String>,
}

/// Minimal client for Stripe Checkout (`/v1/checkout/sessions`).
pub struct StripeCheckout {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeCheckout {
    pub fn new(secret_key: String) -> Self {
        Self::with_api_base(secret_key, STRIPE_API_BASE.to_string())
    }

    pub fn with_api_base(secret_key: String, api_base: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn form_params(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("line_items[0][price]".to_string(), request.price_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
        ];
        params.extend(
            request
                .metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
        );
        params
    }

    async fn read_session(resp: reqwest::Response) -> AppResult<StripeSessionResponse> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(AppError::Gateway(format!(
                "stripe api error status={} body={body}",
                status.as_u16()
            )));
        }

        serde_json::from_str::<StripeSessionResponse>(&body)
            .map_err(|e| AppError::Gateway(format!("invalid response: {e}; body={body}")))
    }
}

#[async_trait]
impl CheckoutGateway for StripeCheckout {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> AppResult<CheckoutSession> {
        let resp = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form_params(&request))
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        let checkout_url = session
            .url
            .ok_or_else(|| AppError::Gateway("checkout session has no url".to_string()))?;

        tracing::info!(session_id = %session.id, price_id = %request.price_id, "checkout session created");
        Ok(CheckoutSession {
            session_id: session.id,
            checkout_url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> AppResult<SessionStatus> {
        let resp = self
            .client
            .get(format!("{}/v1/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        let session = Self::read_session(resp).await?;
        Ok(SessionStatus {
            payment_status: session.payment_status.unwrap_or_else(|| "unpaid".to_string()),
            customer_email: session.customer_details.and_then(|c| c.email),
        })
    }
}

#[derive(Debug, Clone)]
struct MockSession {
    request: CheckoutRequest,
    paid: bool,
}

/// In-memory gateway for tests and local runs without provider credentials.
#[derive(Default)]
pub struct MockCheckoutGateway {
    sessions: RwLock<HashMap<String, MockSession>>,
    fail_create: RwLock<bool>,
}

impl MockCheckoutGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_create(&self, fail: bool) {
        *self.fail_create.write().await = fail;
    }

    /// Simulates the customer completing payment.
    pub async fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.paid = true;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn metadata(&self, session_id: &str) -> Option<BTreeMap<String, String>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.request.metadata.clone())
    }
}

#[async_trait]
impl CheckoutGateway for MockCheckoutGateway {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> AppResult<CheckoutSession> {
        if *self.fail_create.read().await {
            return Err(AppError::Gateway("mock gateway unavailable".to_string()));
        }

        let session_id = format!("cs_test_{}", Uuid::new_v4().simple());
        let checkout_url = format!("https://checkout.stripe.test/c/pay/{session_id}");
        self.sessions.write().await.insert(
            session_id.clone(),
            MockSession {
                request,
                paid: false,
            },
        );
        Ok(CheckoutSession {
            session_id,
            checkout_url,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> AppResult<SessionStatus> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| AppError::Gateway(format!("no such session: {session_id}")))?;
        Ok(SessionStatus {
            payment_status: if session.paid { "paid" } else { "unpaid" }.to_string(),
            customer_email: None,
        })
    }
}
