//! coursepay - pricing and checkout orchestration for course enrollment.
//!
//! The crate computes authoritative server-side price quotes, opens payment
//! sessions against two gateways (Stripe, Razorpay), keeps a TTL'd ledger of
//! in-flight orders, and reconciles payment confirmations exactly once via
//! webhook and client-verify paths.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use coursepay::{AppContext, Provider};
//! use coursepay::gateway::test::MockGateway;
//!
//! #[tokio::main]
//! async fn main() {
//!     coursepay::init_tracing();
//!
//!     let ctx = AppContext::builder()
//!         .frontend_url("https://courses.example")
//!         .gateway(Arc::new(MockGateway::new(Provider::Stripe)))
//!         .build()
//!         .unwrap();
//!
//!     let app = coursepay::http::router(ctx);
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod app;
pub mod checkout;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod leads;
pub mod notify;
pub mod order;
pub mod pricing;
pub mod reconcile;
pub mod referral;

pub use app::AppContext;
pub use checkout::{CheckoutManager, CheckoutRequest, CheckoutResponse};
pub use config::Config;
pub use error::{CoursepayError, Result};
pub use gateway::{PaymentGateway, PaymentNotice, Provider, RazorpayGateway, StripeGateway};
pub use leads::{LeadRecord, LeadStatus, LeadStore};
pub use order::{Order, OrderLedger, OrderStatus};
pub use pricing::{compute_quote, PricingSet, Quote, QuoteInputs};
pub use reconcile::{ConfirmOutcome, Reconciler};
pub use referral::ReferralResolver;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging with sensible defaults.
///
/// Call once, early in `main()`.
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (e.g. "info", "coursepay=debug")
/// - `COURSEPAY_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("COURSEPAY_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
