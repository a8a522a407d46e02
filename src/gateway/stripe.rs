//! Stripe gateway: hosted Checkout Sessions over the REST API.
//!
//! Session creation posts form-encoded params to `/v1/checkout/sessions`;
//! the ledger order id rides along as `client_reference_id` and comes back
//! in webhook events and session fetches.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{CoursepayError, Result};

use super::{
    hmac_sha256_hex, signatures_match, ConfirmProof, CreateSessionRequest, GatewaySession,
    PaymentGateway, PaymentNotice, Provider, SessionHandle,
};

const DEFAULT_API_BASE: &str = "https://api.stripe.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Maximum webhook timestamp skew before the signature is rejected.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
    webhook_secret: SecretString,
}

impl StripeGateway {
    pub fn new(api_key: SecretString, webhook_secret: SecretString) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoursepayError::internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key,
            webhook_secret,
        })
    }

    /// Point at a different API host (sandboxes, local stubs).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn notice_from_session(&self, session: &CheckoutSession, event_id: String) -> PaymentNotice {
        PaymentNotice {
            provider: Provider::Stripe,
            event_id,
            order_id: session.client_reference_id.clone(),
            amount_minor: session.amount_total.unwrap_or(0),
            currency: session.currency.clone().unwrap_or_default(),
            paid: session.payment_status.as_deref() == Some("paid"),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<GatewaySession> {
        let unit_amount = request.unit_amount_minor.to_string();
        let quantity = request.quantity.to_string();
        let params: Vec<(&str, &str)> = vec![
            ("mode", "payment"),
            ("client_reference_id", &request.order_id),
            ("customer_email", &request.customer_email),
            ("success_url", &request.success_url),
            ("cancel_url", &request.cancel_url),
            ("line_items[0][price_data][currency]", &request.currency),
            ("line_items[0][price_data][unit_amount]", &unit_amount),
            (
                "line_items[0][price_data][product_data][name]",
                &request.course_title,
            ),
            ("line_items[0][quantity]", &quantity),
            ("metadata[orderId]", &request.order_id),
            ("metadata[courseId]", &request.course_id),
        ];

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .form(&params)
            .send()
            .await
            .map_err(|e| CoursepayError::upstream(format!("stripe session request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "stripe session creation rejected");
            return Err(CoursepayError::upstream(format!(
                "stripe session creation failed with status {status}"
            )));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| CoursepayError::upstream(format!("invalid stripe response: {e}")))?;

        let url = session.url.clone().ok_or_else(|| {
            CoursepayError::upstream("stripe session response missing redirect url")
        })?;

        Ok(GatewaySession {
            provider_ref: session.id,
            handle: SessionHandle::Redirect { url },
        })
    }

    fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<Option<PaymentNotice>> {
        let header = parse_signature_header(signature)?;

        let now = chrono::Utc::now().timestamp();
        if (now - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(CoursepayError::signature("webhook timestamp outside tolerance"));
        }

        let signed_payload = format!("{}.{}", header.timestamp, String::from_utf8_lossy(payload));
        let expected = hmac_sha256_hex(
            self.webhook_secret.expose_secret().as_bytes(),
            signed_payload.as_bytes(),
        );
        if !header
            .signatures
            .iter()
            .any(|provided| signatures_match(&expected, provided))
        {
            return Err(CoursepayError::signature("webhook signature mismatch"));
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "malformed stripe webhook payload");
            CoursepayError::validation("malformed webhook payload")
        })?;

        if event.event_type != "checkout.session.completed" {
            return Ok(None);
        }

        Ok(Some(
            self.notice_from_session(&event.data.object, event.id),
        ))
    }

    async fn confirm(&self, proof: &ConfirmProof) -> Result<PaymentNotice> {
        let ConfirmProof::Stripe { session_id } = proof else {
            return Err(CoursepayError::validation(
                "stripe confirmation requires a sessionId",
            ));
        };

        let response = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{session_id}",
                self.api_base
            ))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| CoursepayError::upstream(format!("stripe session fetch failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoursepayError::not_found(format!(
                "stripe session {session_id} not found"
            )));
        }
        if !response.status().is_success() {
            return Err(CoursepayError::upstream(format!(
                "stripe session fetch failed with status {}",
                response.status()
            )));
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| CoursepayError::upstream(format!("invalid stripe response: {e}")))?;

        let event_id = format!("stripe_session:{}", session.id);
        Ok(self.notice_from_session(&session, event_id))
    }
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    url: Option<String>,
    client_reference_id: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookEventData,
}

#[derive(Debug, Deserialize)]
struct WebhookEventData {
    object: CheckoutSession,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

/// Parse a `Stripe-Signature` header of the form `t=<ts>,v1=<hex>[,v1=..]`.
fn parse_signature_header(header: &str) -> Result<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value.to_string()),
            _ => {}
        }
    }
    match (timestamp, signatures.is_empty()) {
        (Some(timestamp), false) => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(CoursepayError::signature("malformed signature header")),
    }
}
