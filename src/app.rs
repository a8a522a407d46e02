//! Application context: dependency injection for handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::checkout::{CheckoutConfig, CheckoutManager};
use crate::error::{CoursepayError, Result};
use crate::gateway::{PaymentGateway, Provider};
use crate::http::ratelimit::CallerRateLimiter;
use crate::leads::{InMemoryLeadStore, LeadStore};
use crate::notify::{ConsoleMailer, Mailer, NotifyConfig};
use crate::order::{InMemoryOrderLedger, OrderLedger};
use crate::pricing::PricingSet;
use crate::reconcile::Reconciler;
use crate::referral::{LeadReferralResolver, ReferralResolver};

/// Coupon validation is limited to 10 requests per 15 minutes per caller.
const COUPON_RATE_MAX: u32 = 10;
const COUPON_RATE_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppContext {
    pub checkout: CheckoutManager,
    pub reconciler: Reconciler,
    pub ledger: Arc<dyn OrderLedger>,
    pub coupon_limiter: CallerRateLimiter,
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::new()
    }

    /// Look up the gateway registered for `provider`.
    pub fn gateway(&self, provider: Provider) -> Result<&Arc<dyn PaymentGateway>> {
        self.gateways.get(&provider).ok_or_else(|| {
            CoursepayError::validation(format!("payment provider '{provider}' is not enabled"))
        })
    }
}

/// Fluent builder for [`AppContext`]. Stores and mailer default to the
/// in-memory/console implementations so tests and local runs need no setup.
#[must_use = "builder does nothing until you call build()"]
pub struct AppContextBuilder {
    pricing: PricingSet,
    ledger: Option<Arc<dyn OrderLedger>>,
    leads: Option<Arc<dyn LeadStore>>,
    referrals: Option<Arc<dyn ReferralResolver>>,
    mailer: Option<Arc<dyn Mailer>>,
    notify: NotifyConfig,
    frontend_url: String,
    gateways: HashMap<Provider, Arc<dyn PaymentGateway>>,
}

impl AppContextBuilder {
    pub fn new() -> Self {
        Self {
            pricing: PricingSet::standard(),
            ledger: None,
            leads: None,
            referrals: None,
            mailer: None,
            notify: NotifyConfig::new("noreply@localhost", "sales@localhost"),
            frontend_url: "http://localhost:3000".to_string(),
            gateways: HashMap::new(),
        }
    }

    pub fn pricing(mut self, pricing: PricingSet) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn OrderLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn leads(mut self, leads: Arc<dyn LeadStore>) -> Self {
        self.leads = Some(leads);
        self
    }

    pub fn referrals(mut self, referrals: Arc<dyn ReferralResolver>) -> Self {
        self.referrals = Some(referrals);
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn notify(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }

    pub fn frontend_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_url = url.into();
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn build(self) -> Result<AppContext> {
        let ledger: Arc<dyn OrderLedger> = self
            .ledger
            .unwrap_or_else(|| Arc::new(InMemoryOrderLedger::new()));
        let leads: Arc<dyn LeadStore> = self
            .leads
            .unwrap_or_else(|| Arc::new(InMemoryLeadStore::new()));
        let referrals: Arc<dyn ReferralResolver> = self
            .referrals
            .unwrap_or_else(|| Arc::new(LeadReferralResolver::new(leads.clone())));
        let mailer: Arc<dyn Mailer> = self.mailer.unwrap_or_else(|| Arc::new(ConsoleMailer));

        let checkout = CheckoutManager::new(
            self.pricing,
            ledger.clone(),
            leads.clone(),
            referrals,
            CheckoutConfig::new(self.frontend_url)?,
        );
        let reconciler = Reconciler::new(ledger.clone(), leads, mailer, self.notify);

        Ok(AppContext {
            checkout,
            reconciler,
            ledger,
            coupon_limiter: CallerRateLimiter::new(COUPON_RATE_MAX, COUPON_RATE_WINDOW),
            gateways: self.gateways,
        })
    }
}

impl Default for AppContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
