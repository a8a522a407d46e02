//! Coupon table: the single source of truth for coupon codes.
//!
//! Both the standalone validation endpoint and quote computation resolve
//! codes through this table, so discount rates are never duplicated.

use std::collections::HashMap;

/// A coupon entry: a discount rate plus an optional currency allow-list.
/// `currencies: None` means the code is valid in any supported currency.
#[derive(Debug, Clone)]
pub struct CouponEntry {
    pub code: String,
    pub rate: f64,
    pub currencies: Option<Vec<String>>,
}

impl CouponEntry {
    /// Whether the coupon may be applied in the given (normalized) currency.
    #[must_use]
    pub fn eligible_for(&self, currency: &str) -> bool {
        match &self.currencies {
            None => true,
            Some(list) => list.iter().any(|c| c == currency),
        }
    }

    /// Rate as a whole display percentage.
    #[must_use]
    pub fn discount_percent(&self) -> u32 {
        (self.rate * 100.0).round() as u32
    }
}

/// Immutable coupon table, keyed by normalized (uppercase) code.
#[derive(Debug, Clone, Default)]
pub struct CouponTable {
    coupons: HashMap<String, CouponEntry>,
}

impl CouponTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> CouponTableBuilder {
        CouponTableBuilder::default()
    }

    /// Table seeded with the stock campaign codes (valid in any currency).
    #[must_use]
    pub fn standard() -> Self {
        Self::builder()
            .coupon("SAVE20", 0.20)
            .coupon("SAVE30", 0.30)
            .coupon("TECH2026", 0.50)
            .coupon("WELCOME10", 0.10)
            .coupon("SUMMER25", 0.25)
            .coupon("FLAT10", 0.10)
            .build()
    }

    /// Normalize a raw code the way clients type them: trimmed, uppercased.
    #[must_use]
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }

    /// Look up a code without currency checking.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&CouponEntry> {
        self.coupons.get(&Self::normalize(code))
    }

    /// Look up a code and check currency eligibility in one step.
    ///
    /// Returns `None` for unknown codes and for codes whose allow-list does
    /// not contain `currency`.
    #[must_use]
    pub fn validate(&self, code: &str, currency: &str) -> Option<&CouponEntry> {
        self.get(code).filter(|entry| entry.eligible_for(currency))
    }
}

/// Builder for [`CouponTable`].
#[derive(Debug, Default)]
pub struct CouponTableBuilder {
    coupons: HashMap<String, CouponEntry>,
}

impl CouponTableBuilder {
    /// Add a coupon valid in any currency.
    #[must_use]
    pub fn coupon(self, code: impl Into<String>, rate: f64) -> Self {
        self.entry(code, rate, None)
    }

    /// Add a coupon restricted to the given currencies.
    #[must_use]
    pub fn coupon_for_currencies<I, S>(self, code: impl Into<String>, rate: f64, currencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = currencies
            .into_iter()
            .map(|c| c.into().to_lowercase())
            .collect();
        self.entry(code, rate, Some(list))
    }

    fn entry(mut self, code: impl Into<String>, rate: f64, currencies: Option<Vec<String>>) -> Self {
        let code = CouponTable::normalize(&code.into());
        self.coupons.insert(
            code.clone(),
            CouponEntry {
                code,
                rate: rate.clamp(0.0, 1.0),
                currencies,
            },
        );
        self
    }

    #[must_use]
    pub fn build(self) -> CouponTable {
        CouponTable {
            coupons: self.coupons,
        }
    }
}
