//! HTTP surface: quote, coupon validation, checkout, confirmation, webhooks.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::app::AppContext;
use crate::checkout::CheckoutRequest;
use crate::error::{CoursepayError, Result};
use crate::gateway::{ConfirmProof, Provider};
use crate::order::PublicOrder;
use crate::pricing::{normalize_currency, EnrollmentType, QuoteInputs};
use crate::reconcile::ConfirmOutcome;

/// Build the full application router.
pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/api/ping", get(ping))
        .route("/pricing/quote", post(quote))
        .route("/api/coupons/validate", post(validate_coupon))
        .route("/checkout/:provider", post(initiate_checkout))
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/order/:order_id", get(get_order))
        .route("/webhooks/:provider", post(handle_webhook))
        .with_state(ctx)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PingResponse {
    status: &'static str,
    time: chrono::DateTime<chrono::Utc>,
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        time: chrono::Utc::now(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteRequest {
    course_id: String,
    enrollment_type: EnrollmentType,
    participants: Option<f64>,
    currency: Option<String>,
    coupon_code: Option<String>,
    referral_code: Option<String>,
}

async fn quote(
    State(ctx): State<AppContext>,
    Json(request): Json<QuoteRequest>,
) -> Result<Response> {
    let quote = ctx
        .checkout
        .quote(
            QuoteInputs {
                course_id: request.course_id,
                enrollment_type: request.enrollment_type,
                participants: request.participants,
                currency: request.currency,
                coupon_code: request.coupon_code,
                referral_rate: None,
            },
            request.referral_code.as_deref(),
        )
        .await?;
    Ok(Json(quote).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateCouponRequest {
    /// Optional at the wire level so a missing code gets the standard error
    /// shape instead of an extractor rejection.
    code: Option<String>,
    currency: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateCouponResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    discount_percent: Option<u32>,
}

async fn validate_coupon(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(request): Json<ValidateCouponRequest>,
) -> Result<Response> {
    let caller = caller_key(&headers);
    if let Err(retry_after) = ctx.coupon_limiter.check(&caller) {
        return Err(CoursepayError::TooManyRequests { retry_after });
    }

    let code = request
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CoursepayError::validation("coupon code is required"))?;

    let currency = normalize_currency(request.currency.as_deref())?;
    let response = match ctx.checkout.pricing().coupons.validate(code, &currency) {
        Some(entry) => ValidateCouponResponse {
            valid: true,
            code: Some(entry.code.clone()),
            discount_percent: Some(entry.discount_percent()),
        },
        None => ValidateCouponResponse {
            valid: false,
            code: None,
            discount_percent: None,
        },
    };
    Ok(Json(response).into_response())
}

/// Caller key for rate limiting: first forwarded address, falling back to a
/// shared bucket when no proxy headers are present.
fn caller_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "anon".to_string())
}

async fn initiate_checkout(
    State(ctx): State<AppContext>,
    Path(provider): Path<String>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Response> {
    let provider = Provider::parse(&provider)?;
    let gateway = ctx.gateway(provider)?.clone();
    let response = ctx.checkout.initiate(gateway.as_ref(), request).await?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmRequest {
    order_id: String,
    #[serde(flatten)]
    proof: ConfirmProof,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    success: bool,
    order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_errors: Option<Vec<String>>,
}

async fn confirm_payment(
    State(ctx): State<AppContext>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Response> {
    let provider = match request.proof {
        ConfirmProof::Stripe { .. } => Provider::Stripe,
        ConfirmProof::Razorpay { .. } => Provider::Razorpay,
    };
    let gateway = ctx.gateway(provider)?.clone();
    let notice = gateway.confirm(&request.proof).await?;

    let outcome = ctx
        .reconciler
        .apply(&notice, Some(&request.order_id))
        .await?;
    let response = match outcome {
        ConfirmOutcome::Confirmed {
            order_id,
            notification_errors,
        } => ConfirmResponse {
            success: true,
            order_id,
            notification_errors: (!notification_errors.is_empty()).then_some(notification_errors),
        },
        ConfirmOutcome::AlreadyConfirmed { order_id } => ConfirmResponse {
            success: true,
            order_id,
            notification_errors: None,
        },
    };
    Ok(Json(response).into_response())
}

async fn get_order(
    State(ctx): State<AppContext>,
    Path(order_id): Path<String>,
) -> Result<Json<PublicOrder>> {
    let order = ctx
        .ledger
        .get(&order_id)
        .await?
        .ok_or_else(|| CoursepayError::not_found(format!("order {order_id} not found")))?;
    Ok(Json(order.public_view()))
}

#[derive(Serialize)]
struct WebhookAck {
    received: bool,
}

/// Providers retry webhooks on non-2xx responses. Once the signature is
/// verified we always acknowledge, logging internal reconciliation failures
/// instead of surfacing them.
async fn handle_webhook(
    State(ctx): State<AppContext>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let provider = Provider::parse(&provider)?;
    let gateway = ctx.gateway(provider)?.clone();

    let signature_header = match provider {
        Provider::Stripe => "stripe-signature",
        Provider::Razorpay => "x-razorpay-signature",
    };
    let signature = headers
        .get(signature_header)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| CoursepayError::signature("missing signature header"))?;

    let notice = match gateway.parse_webhook(&body, signature) {
        Ok(notice) => notice,
        Err(err @ CoursepayError::Signature(_)) => return Err(err),
        Err(err) => {
            tracing::warn!(%provider, error = %err, "webhook payload rejected after signature check");
            None
        }
    };

    if let Some(notice) = notice {
        if let Err(err) = ctx.reconciler.apply(&notice, None).await {
            tracing::error!(
                %provider,
                event_id = %notice.event_id,
                error = %err,
                "webhook reconciliation failed"
            );
        }
    }

    Ok((StatusCode::OK, Json(WebhookAck { received: true })).into_response())
}
