//! Razorpay gateway: server-side Orders API plus signature verification for
//! the inline checkout flow.
//!
//! Unlike the hosted-redirect provider, Razorpay completes payment in the
//! client and posts back `(order_id, payment_id, signature)`; the pull path
//! verifies that HMAC before fetching the payment for amount and state.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::{CoursepayError, Result};

use super::{
    hmac_sha256_hex, signatures_match, ConfirmProof, CreateSessionRequest, GatewaySession,
    PaymentGateway, PaymentNotice, Provider, SessionHandle,
};

const DEFAULT_API_BASE: &str = "https://api.razorpay.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct RazorpayGateway {
    http: reqwest::Client,
    api_base: String,
    key_id: String,
    key_secret: SecretString,
    webhook_secret: SecretString,
}

impl RazorpayGateway {
    pub fn new(
        key_id: impl Into<String>,
        key_secret: SecretString,
        webhook_secret: SecretString,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CoursepayError::internal(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_base: DEFAULT_API_BASE.to_string(),
            key_id: key_id.into(),
            key_secret,
            webhook_secret,
        })
    }

    /// Point at a different API host (sandboxes, local stubs).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn notice_from_payment(&self, payment: &PaymentEntity, event_id: String) -> PaymentNotice {
        PaymentNotice {
            provider: Provider::Razorpay,
            event_id,
            order_id: payment.notes.order_id.clone(),
            amount_minor: payment.amount,
            currency: payment.currency.to_lowercase(),
            paid: payment.status == "captured",
        }
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<PaymentEntity> {
        let response = self
            .http
            .get(format!("{}/v1/payments/{payment_id}", self.api_base))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .send()
            .await
            .map_err(|e| CoursepayError::upstream(format!("razorpay payment fetch failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CoursepayError::not_found(format!(
                "razorpay payment {payment_id} not found"
            )));
        }
        if !response.status().is_success() {
            return Err(CoursepayError::upstream(format!(
                "razorpay payment fetch failed with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CoursepayError::upstream(format!("invalid razorpay response: {e}")))
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> Provider {
        Provider::Razorpay
    }

    async fn create_session(&self, request: &CreateSessionRequest) -> Result<GatewaySession> {
        let body = serde_json::json!({
            "amount": request.total_minor,
            "currency": request.currency.to_uppercase(),
            "receipt": request.order_id,
            "notes": {
                "orderId": request.order_id,
                "courseId": request.course_id,
            },
        });

        let response = self
            .http
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoursepayError::upstream(format!("razorpay order request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, body = %body, "razorpay order creation rejected");
            return Err(CoursepayError::upstream(format!(
                "razorpay order creation failed with status {status}"
            )));
        }

        let order: OrderEntity = response
            .json()
            .await
            .map_err(|e| CoursepayError::upstream(format!("invalid razorpay response: {e}")))?;

        Ok(GatewaySession {
            provider_ref: order.id.clone(),
            handle: SessionHandle::ClientParams {
                key_id: self.key_id.clone(),
                provider_order_id: order.id,
                amount_minor: order.amount,
                currency: order.currency.to_lowercase(),
            },
        })
    }

    fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<Option<PaymentNotice>> {
        let expected = hmac_sha256_hex(self.webhook_secret.expose_secret().as_bytes(), payload);
        if !signatures_match(&expected, signature.trim()) {
            return Err(CoursepayError::signature("webhook signature mismatch"));
        }

        let event: WebhookEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "malformed razorpay webhook payload");
            CoursepayError::validation("malformed webhook payload")
        })?;

        if event.event != "payment.captured" {
            return Ok(None);
        }
        let payment = event
            .payload
            .payment
            .map(|p| p.entity)
            .ok_or_else(|| CoursepayError::validation("webhook event missing payment entity"))?;

        let event_id = format!("rzp_payment:{}", payment.id);
        Ok(Some(self.notice_from_payment(&payment, event_id)))
    }

    async fn confirm(&self, proof: &ConfirmProof) -> Result<PaymentNotice> {
        let ConfirmProof::Razorpay {
            provider_order_id,
            payment_id,
            signature,
        } = proof
        else {
            return Err(CoursepayError::validation(
                "razorpay confirmation requires orderId, paymentId and signature",
            ));
        };

        // Checkout callback signature: HMAC over "{order_id}|{payment_id}".
        let signed = format!("{provider_order_id}|{payment_id}");
        let expected = hmac_sha256_hex(
            self.key_secret.expose_secret().as_bytes(),
            signed.as_bytes(),
        );
        if !signatures_match(&expected, signature.trim()) {
            return Err(CoursepayError::signature("payment signature mismatch"));
        }

        let payment = self.fetch_payment(payment_id).await?;
        let event_id = format!("rzp_payment:{}", payment.id);
        Ok(self.notice_from_payment(&payment, event_id))
    }
}

impl std::fmt::Debug for RazorpayGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayGateway")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct OrderEntity {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    notes: PaymentNotes,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentNotes {
    #[serde(rename = "orderId")]
    order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    payload: WebhookPayload,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: Option<PaymentWrapper>,
}

#[derive(Debug, Deserialize)]
struct PaymentWrapper {
    entity: PaymentEntity,
}
