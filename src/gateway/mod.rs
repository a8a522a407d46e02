//! Payment gateway abstraction.
//!
//! Both providers sit behind one [`PaymentGateway`] capability so the quote,
//! ledger, and reconciliation logic exist exactly once. A gateway knows how
//! to open a remote payment session, verify and decode its provider's
//! webhook events, and confirm a payment from client-supplied proof.

pub mod razorpay;
pub mod stripe;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{CoursepayError, Result};

pub use razorpay::RazorpayGateway;
pub use stripe::StripeGateway;

type HmacSha256 = Hmac<Sha256>;

/// Supported payment providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Stripe,
    Razorpay,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Razorpay => "razorpay",
        }
    }

    /// Parse a provider from a path segment.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "razorpay" => Ok(Self::Razorpay),
            other => Err(CoursepayError::validation(format!(
                "unknown payment provider '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a gateway needs to open a remote session for one order.
/// Amounts are the server-computed values; client input never reaches here.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub order_id: String,
    pub course_id: String,
    pub course_title: String,
    pub unit_amount_minor: i64,
    pub quantity: u32,
    pub total_minor: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Provider-specific continuation data handed back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SessionHandle {
    /// Hosted checkout page; client follows the URL.
    #[serde(rename_all = "camelCase")]
    Redirect { url: String },
    /// Client-side SDK parameters (Razorpay-style inline checkout).
    #[serde(rename_all = "camelCase")]
    ClientParams {
        key_id: String,
        provider_order_id: String,
        amount_minor: i64,
        currency: String,
    },
}

/// A freshly created remote payment session.
#[derive(Debug, Clone)]
pub struct GatewaySession {
    /// Provider-side identifier bound to the ledger entry.
    pub provider_ref: String,
    pub handle: SessionHandle,
}

/// A verified payment report, normalized across providers and entry paths.
/// This is the only shape the reconciler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotice {
    pub provider: Provider,
    /// Unique id for webhook dedupe; synthesized for pull-path notices.
    pub event_id: String,
    /// Our ledger order id, when the provider echoes it back.
    pub order_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    /// Whether the provider reports the payment as completed.
    pub paid: bool,
}

/// Client-supplied proof for the pull/verify confirmation path.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ConfirmProof {
    #[serde(rename_all = "camelCase")]
    Stripe { session_id: String },
    #[serde(rename_all = "camelCase")]
    Razorpay {
        provider_order_id: String,
        payment_id: String,
        signature: String,
    },
}

/// One payment provider behind a uniform capability.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Create the remote session/order scoped to the server-computed total.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<GatewaySession>;

    /// Verify a webhook signature and decode the event.
    ///
    /// `Ok(None)` means the signature checked out but the event type is not
    /// one we act on. A bad signature is always `Err(Signature)`.
    fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<Option<PaymentNotice>>;

    /// Pull path: verify client-supplied proof against provider-held state
    /// and produce a notice. Rejects before any side effect on bad proof.
    async fn confirm(&self, proof: &ConfirmProof) -> Result<PaymentNotice>;
}

/// HMAC-SHA256 over `payload`, hex-encoded.
pub(crate) fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Timing-safe equality for hex-encoded signatures.
pub(crate) fn signatures_match(expected_hex: &str, provided_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    if expected.len() != provided.len() {
        return false;
    }
    expected.ct_eq(&provided).into()
}

/// Mock gateway for tests.
pub mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Scripted gateway: records session requests, returns canned notices.
    #[derive(Clone)]
    pub struct MockGateway {
        provider: Provider,
        sessions: Arc<Mutex<Vec<CreateSessionRequest>>>,
        confirm_notice: Arc<Mutex<Option<PaymentNotice>>>,
        fail_sessions: Arc<Mutex<bool>>,
    }

    impl MockGateway {
        #[must_use]
        pub fn new(provider: Provider) -> Self {
            Self {
                provider,
                sessions: Arc::default(),
                confirm_notice: Arc::default(),
                fail_sessions: Arc::new(Mutex::new(false)),
            }
        }

        /// Script the notice returned by `confirm`.
        pub fn set_confirm_notice(&self, notice: PaymentNotice) {
            *self.confirm_notice.lock().unwrap() = Some(notice);
        }

        /// Make `create_session` fail with an upstream error.
        pub fn fail_session_creation(&self) {
            *self.fail_sessions.lock().unwrap() = true;
        }

        pub fn session_requests(&self) -> Vec<CreateSessionRequest> {
            self.sessions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PaymentGateway for MockGateway {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn create_session(&self, request: &CreateSessionRequest) -> Result<GatewaySession> {
            if *self.fail_sessions.lock().unwrap() {
                return Err(CoursepayError::upstream("mock session creation failed"));
            }
            self.sessions.lock().unwrap().push(request.clone());
            let provider_ref = format!("mock_{}_{}", self.provider, request.order_id);
            let handle = match self.provider {
                Provider::Stripe => SessionHandle::Redirect {
                    url: format!("https://pay.example/{provider_ref}"),
                },
                Provider::Razorpay => SessionHandle::ClientParams {
                    key_id: "rzp_test_key".to_string(),
                    provider_order_id: provider_ref.clone(),
                    amount_minor: request.total_minor,
                    currency: request.currency.clone(),
                },
            };
            Ok(GatewaySession {
                provider_ref,
                handle,
            })
        }

        fn parse_webhook(&self, payload: &[u8], signature: &str) -> Result<Option<PaymentNotice>> {
            if signature != "test-signature" {
                return Err(CoursepayError::signature("invalid webhook signature"));
            }
            let notice: serde_json::Value = serde_json::from_slice(payload)
                .map_err(|e| CoursepayError::validation(format!("bad payload: {e}")))?;
            if notice.get("ignore").is_some() {
                return Ok(None);
            }
            Ok(Some(PaymentNotice {
                provider: self.provider,
                event_id: notice["eventId"].as_str().unwrap_or("evt_mock").to_string(),
                order_id: notice["orderId"].as_str().map(str::to_string),
                amount_minor: notice["amountMinor"].as_i64().unwrap_or(0),
                currency: notice["currency"].as_str().unwrap_or("usd").to_string(),
                paid: notice["paid"].as_bool().unwrap_or(false),
            }))
        }

        async fn confirm(&self, _proof: &ConfirmProof) -> Result<PaymentNotice> {
            self.confirm_notice
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| CoursepayError::upstream("mock confirm not scripted"))
        }
    }
}
