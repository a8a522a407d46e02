//! Checkout initiation: quote, remote session, ledger entry, pending lead.
//!
//! The server-computed total is the only amount ever sent to a payment
//! provider. A client-reported total is compared purely for monitoring.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;
use validator::Validate;

use crate::error::{CoursepayError, Result};
use crate::gateway::{CreateSessionRequest, PaymentGateway, SessionHandle};
use crate::leads::{LeadRecord, LeadStatus, LeadStore};
use crate::order::{generate_order_id, CourseInfo, Learner, Order, OrderLedger, OrderStatus};
use crate::pricing::{compute_quote, EnrollmentType, PricingSet, Quote, QuoteInputs};
use crate::referral::{resolve_referral_rate, ReferralResolver};

/// Mismatches beyond this fraction of the server total are logged for
/// review. They never block checkout.
const MISMATCH_ALERT_RATIO: f64 = 0.01;

/// Redirect targets for hosted checkout pages.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    frontend_url: String,
}

impl CheckoutConfig {
    /// `frontend_url` is where the provider sends the customer back after
    /// payment; it must be an absolute http(s) URL.
    pub fn new(frontend_url: impl Into<String>) -> Result<Self> {
        let frontend_url = frontend_url.into();
        let parsed = Url::parse(&frontend_url)
            .map_err(|e| CoursepayError::validation(format!("invalid frontend url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoursepayError::validation(
                "frontend url must be http or https",
            ));
        }
        Ok(Self {
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
        })
    }

    fn success_url(&self, order_id: &str) -> String {
        format!("{}/payment/success?orderId={order_id}", self.frontend_url)
    }

    fn cancel_url(&self, order_id: &str) -> String {
        format!("{}/payment/cancel?orderId={order_id}", self.frontend_url)
    }
}

/// Learner details collected at checkout.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LearnerInput {
    #[validate(length(min = 1, max = 200))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5, max = 32))]
    pub phone: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub training_location: String,
}

impl From<LearnerInput> for Learner {
    fn from(input: LearnerInput) -> Self {
        Self {
            full_name: input.full_name,
            email: input.email,
            phone: input.phone,
            city: input.city,
            training_location: input.training_location,
        }
    }
}

/// A checkout request, after the provider has been picked from the route.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[validate(length(min = 1, max = 100))]
    pub course_id: String,
    pub enrollment_type: EnrollmentType,
    pub participants: Option<f64>,
    pub currency: Option<String>,
    pub coupon_code: Option<String>,
    pub referral_code: Option<String>,
    /// What the client thinks the total is. Monitoring only.
    pub client_total_minor: Option<i64>,
    #[validate(nested)]
    pub learner: LearnerInput,
    pub course_info: CourseInfo,
}

/// What the client needs to continue payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: String,
    pub quote: Quote,
    pub session: SessionHandle,
}

/// Orchestrates checkout initiation against any payment gateway.
#[derive(Clone)]
pub struct CheckoutManager {
    pricing: PricingSet,
    ledger: Arc<dyn OrderLedger>,
    leads: Arc<dyn LeadStore>,
    referrals: Arc<dyn ReferralResolver>,
    config: CheckoutConfig,
}

impl CheckoutManager {
    #[must_use]
    pub fn new(
        pricing: PricingSet,
        ledger: Arc<dyn OrderLedger>,
        leads: Arc<dyn LeadStore>,
        referrals: Arc<dyn ReferralResolver>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            pricing,
            ledger,
            leads,
            referrals,
            config,
        }
    }

    #[must_use]
    pub fn pricing(&self) -> &PricingSet {
        &self.pricing
    }

    /// Build a quote for `POST /pricing/quote`, resolving the referral code.
    pub async fn quote(
        &self,
        inputs: QuoteInputs,
        referral_code: Option<&str>,
    ) -> Result<Quote> {
        let referral_rate = resolve_referral_rate(self.referrals.as_ref(), referral_code).await;
        compute_quote(
            &self.pricing,
            &QuoteInputs {
                referral_rate,
                ..inputs
            },
        )
    }

    /// Run the full checkout-initiation sequence.
    pub async fn initiate(
        &self,
        gateway: &dyn PaymentGateway,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse> {
        request
            .validate()
            .map_err(|e| CoursepayError::validation(e.to_string()))?;

        let referral_rate =
            resolve_referral_rate(self.referrals.as_ref(), request.referral_code.as_deref()).await;

        let quote = compute_quote(
            &self.pricing,
            &QuoteInputs {
                course_id: request.course_id.clone(),
                enrollment_type: request.enrollment_type,
                participants: request.participants,
                currency: request.currency.clone(),
                coupon_code: request.coupon_code.clone(),
                referral_rate,
            },
        )?;

        if let Some(client_total) = request.client_total_minor {
            let server_total = quote.expected_total_minor;
            let drift = (client_total - server_total).abs() as f64 / server_total as f64;
            if drift > MISMATCH_ALERT_RATIO {
                tracing::warn!(
                    course_id = %quote.course_id,
                    client_total_minor = client_total,
                    server_total_minor = server_total,
                    "client-reported total disagrees with server quote"
                );
            }
        }

        let order_id = generate_order_id();
        let session = gateway
            .create_session(&CreateSessionRequest {
                order_id: order_id.clone(),
                course_id: quote.course_id.clone(),
                course_title: request.course_info.title.clone(),
                unit_amount_minor: quote.unit_amount_minor,
                quantity: quote.quantity,
                total_minor: quote.expected_total_minor,
                currency: quote.currency.clone(),
                customer_email: request.learner.email.clone(),
                success_url: self.config.success_url(&order_id),
                cancel_url: self.config.cancel_url(&order_id),
            })
            .await?;

        let learner: Learner = request.learner.into();
        let order = Order {
            order_id: order_id.clone(),
            provider: gateway.provider(),
            provider_ref: session.provider_ref,
            quote: quote.clone(),
            learner: learner.clone(),
            course_info: request.course_info.clone(),
            status: OrderStatus::Pending,
            created_at: chrono::Utc::now(),
        };
        self.ledger.create(order).await?;

        // Best-effort: a lead write failure must not lose the checkout, the
        // remote session already exists.
        let now = chrono::Utc::now();
        let lead = LeadRecord {
            order_id: order_id.clone(),
            full_name: learner.full_name,
            email: learner.email,
            phone: learner.phone,
            city: learner.city,
            training_location: learner.training_location,
            course_id: quote.course_id.clone(),
            course_title: request.course_info.title,
            currency: quote.currency.clone(),
            participants: quote.participants,
            status: LeadStatus::PendingPayment,
            paid_amount_minor: None,
            enrollment_token: None,
            referral_code: request.referral_code,
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = self.leads.create(lead).await {
            tracing::error!(order_id = %order_id, error = %err, "failed to record pending lead");
        }

        tracing::info!(
            order_id = %order_id,
            provider = %gateway.provider(),
            total_minor = quote.expected_total_minor,
            currency = %quote.currency,
            "checkout initiated"
        );

        Ok(CheckoutResponse {
            order_id,
            quote,
            session: session.handle,
        })
    }
}
