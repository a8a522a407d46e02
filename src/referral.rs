//! Referral code resolution.
//!
//! A bad referral code must never block a checkout: resolution failures are
//! logged and treated as "no discount".

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::leads::LeadStore;

/// Resolves a referral code to a discount rate (0.0–1.0).
#[async_trait]
pub trait ReferralResolver: Send + Sync {
    /// `Ok(None)` when the code is unknown; errors only on lookup failure.
    async fn resolve(&self, code: &str) -> Result<Option<f64>>;
}

/// Resolver backed by the lead store's referral directory.
#[derive(Clone)]
pub struct LeadReferralResolver {
    leads: Arc<dyn LeadStore>,
}

impl LeadReferralResolver {
    #[must_use]
    pub fn new(leads: Arc<dyn LeadStore>) -> Self {
        Self { leads }
    }
}

#[async_trait]
impl ReferralResolver for LeadReferralResolver {
    async fn resolve(&self, code: &str) -> Result<Option<f64>> {
        self.leads.referral_rate(code).await
    }
}

/// Resolve a referral code, degrading to no discount on any failure.
///
/// Wraps a [`ReferralResolver`] with the checkout-path policy: unknown codes
/// and lookup errors both yield `None` with a warn log.
pub async fn resolve_referral_rate(
    resolver: &dyn ReferralResolver,
    code: Option<&str>,
) -> Option<f64> {
    let code = code.map(str::trim).filter(|c| !c.is_empty())?;
    match resolver.resolve(code).await {
        Ok(Some(rate)) => Some(rate),
        Ok(None) => {
            tracing::warn!(code = %code, "referral code not found, no discount applied");
            None
        }
        Err(err) => {
            tracing::warn!(code = %code, error = %err, "referral lookup failed, no discount applied");
            None
        }
    }
}

/// Mock resolvers for testing.
pub mod test {
    use super::*;

    /// Resolver over a fixed code→rate table.
    #[derive(Default, Clone)]
    pub struct StaticReferralResolver {
        rates: std::collections::HashMap<String, f64>,
    }

    impl StaticReferralResolver {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn with_code(mut self, code: impl Into<String>, rate: f64) -> Self {
            self.rates.insert(code.into().trim().to_uppercase(), rate);
            self
        }
    }

    #[async_trait]
    impl ReferralResolver for StaticReferralResolver {
        async fn resolve(&self, code: &str) -> Result<Option<f64>> {
            Ok(self.rates.get(&code.trim().to_uppercase()).copied())
        }
    }

    /// Resolver that always fails, for exercising the degrade path.
    pub struct FailingReferralResolver;

    #[async_trait]
    impl ReferralResolver for FailingReferralResolver {
        async fn resolve(&self, _code: &str) -> Result<Option<f64>> {
            Err(crate::error::CoursepayError::internal(
                "referral directory unavailable",
            ))
        }
    }
}
