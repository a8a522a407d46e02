//! Price catalog and enrollment discount configuration.
//!
//! Both structures are immutable configuration loaded at startup. Nothing in
//! the engine mutates them at runtime; admin-driven price changes are a new
//! catalog, not an in-place edit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoursepayError, Result};

/// Currencies the engine will quote in. Anything else is rejected before any
/// persistent write happens.
pub const ALLOWED_CURRENCIES: &[&str] = &["usd", "inr", "aed", "eur", "gbp"];

/// Catalog key used when a course has no explicit per-course pricing.
pub const DEFAULT_COURSE_KEY: &str = "default";

/// How the learner is enrolling. Group bookings unlock tiered discounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentType {
    Individual,
    Group,
}

impl EnrollmentType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Group => "group",
        }
    }
}

impl std::fmt::Display for EnrollmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalize a currency code, rejecting anything outside the allowed set.
/// Absent and blank inputs both default to `usd`.
pub fn normalize_currency(currency: Option<&str>) -> Result<String> {
    let normalized = currency
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("usd")
        .to_lowercase();
    if !ALLOWED_CURRENCIES.contains(&normalized.as_str()) {
        return Err(CoursepayError::price_integrity(format!(
            "Unsupported currency: {}",
            normalized
        )));
    }
    Ok(normalized)
}

/// Per-course, per-currency base prices in minor units (paise, cents).
///
/// Lookups fall back to the `default` entry when a course has no explicit
/// pricing, matching how the catalog is maintained: most courses share one
/// price list and only flagship courses override it.
#[derive(Debug, Clone, Default)]
pub struct PriceCatalog {
    courses: HashMap<String, HashMap<String, i64>>,
}

impl PriceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a catalog.
    #[must_use]
    pub fn builder() -> PriceCatalogBuilder {
        PriceCatalogBuilder::default()
    }

    /// Catalog seeded with the stock price list (per-seat, minor units).
    #[must_use]
    pub fn standard() -> Self {
        Self::builder()
            .course(DEFAULT_COURSE_KEY)
            .price("usd", 50_000)
            .price("inr", 400_000)
            .price("aed", 185_000)
            .price("eur", 46_000)
            .price("gbp", 39_500)
            .done()
            .build()
    }

    /// Look up the base unit price for a course in a (normalized) currency.
    ///
    /// # Errors
    ///
    /// `PriceIntegrity` when neither the course nor the default entry carries
    /// a positive price for that currency.
    pub fn base_price_minor(&self, course_id: &str, currency: &str) -> Result<i64> {
        let price = self
            .courses
            .get(course_id)
            .and_then(|c| c.get(currency))
            .or_else(|| {
                self.courses
                    .get(DEFAULT_COURSE_KEY)
                    .and_then(|c| c.get(currency))
            })
            .copied();

        match price {
            Some(p) if p > 0 => Ok(p),
            _ => Err(CoursepayError::price_integrity(format!(
                "Price not configured for course '{}' in currency '{}'",
                course_id, currency
            ))),
        }
    }
}

/// Builder for [`PriceCatalog`].
#[derive(Debug, Default)]
pub struct PriceCatalogBuilder {
    courses: HashMap<String, HashMap<String, i64>>,
}

impl PriceCatalogBuilder {
    /// Start defining prices for a course.
    #[must_use]
    pub fn course(self, course_id: impl Into<String>) -> CourseEntryBuilder {
        CourseEntryBuilder {
            catalog: self,
            course_id: course_id.into(),
            prices: HashMap::new(),
        }
    }

    #[must_use]
    pub fn build(self) -> PriceCatalog {
        PriceCatalog {
            courses: self.courses,
        }
    }
}

/// Builder scope for a single course's currency prices.
#[derive(Debug)]
pub struct CourseEntryBuilder {
    catalog: PriceCatalogBuilder,
    course_id: String,
    prices: HashMap<String, i64>,
}

impl CourseEntryBuilder {
    /// Add a price in minor units for one currency.
    #[must_use]
    pub fn price(mut self, currency: impl Into<String>, minor: i64) -> Self {
        self.prices.insert(currency.into().to_lowercase(), minor);
        self
    }

    /// Finish this course's entry.
    #[must_use]
    pub fn done(mut self) -> PriceCatalogBuilder {
        self.catalog.courses.insert(self.course_id, self.prices);
        self.catalog
    }
}

/// Enrollment-tier discounts: a fixed rate for individual bookings and
/// participant-count tiers for group bookings.
///
/// Tiers are `(minimum participants, rate)` pairs; the highest threshold at
/// or below the participant count wins. Rates must be non-decreasing with
/// group size so a larger group never pays a higher unit price; the builder
/// sorts by threshold and enforces monotonicity.
#[derive(Debug, Clone)]
pub struct DiscountSchedule {
    individual_rate: f64,
    group_tiers: Vec<(u32, f64)>,
}

impl DiscountSchedule {
    /// Schedule seeded with the stock rates: 20% individual, groups 20%
    /// below two seats, 40% from two and 50% from five.
    #[must_use]
    pub fn standard() -> Self {
        Self::builder()
            .individual_rate(0.20)
            .group_tier(1, 0.20)
            .group_tier(2, 0.40)
            .group_tier(5, 0.50)
            .build()
    }

    #[must_use]
    pub fn builder() -> DiscountScheduleBuilder {
        DiscountScheduleBuilder::default()
    }

    /// Discount rate for an enrollment type and participant count.
    #[must_use]
    pub fn rate_for(&self, enrollment_type: EnrollmentType, participants: u32) -> f64 {
        match enrollment_type {
            EnrollmentType::Individual => self.individual_rate,
            EnrollmentType::Group => self
                .group_tiers
                .iter()
                .rev()
                .find(|(min, _)| participants >= *min)
                .map(|(_, rate)| *rate)
                .unwrap_or(self.individual_rate),
        }
    }
}

/// Builder for [`DiscountSchedule`].
#[derive(Debug, Default)]
pub struct DiscountScheduleBuilder {
    individual_rate: f64,
    group_tiers: Vec<(u32, f64)>,
}

impl DiscountScheduleBuilder {
    /// Fixed discount rate for individual bookings (may be zero).
    #[must_use]
    pub fn individual_rate(mut self, rate: f64) -> Self {
        self.individual_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Add a group tier: bookings of at least `min_participants` seats get
    /// `rate` off the unit price.
    #[must_use]
    pub fn group_tier(mut self, min_participants: u32, rate: f64) -> Self {
        self.group_tiers
            .push((min_participants, rate.clamp(0.0, 1.0)));
        self
    }

    /// Build the schedule. Tiers are sorted by threshold; a tier whose rate
    /// regresses below a smaller tier's rate is lifted to it, so the
    /// resulting schedule is always monotonically non-decreasing.
    #[must_use]
    pub fn build(mut self) -> DiscountSchedule {
        self.group_tiers.sort_by_key(|(min, _)| *min);
        let mut floor = 0.0f64;
        for (_, rate) in &mut self.group_tiers {
            if *rate < floor {
                *rate = floor;
            } else {
                floor = *rate;
            }
        }
        DiscountSchedule {
            individual_rate: self.individual_rate,
            group_tiers: self.group_tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_currency() {
        assert_eq!(normalize_currency(Some("INR")).unwrap(), "inr");
        assert_eq!(normalize_currency(Some(" usd ")).unwrap(), "usd");
        assert_eq!(normalize_currency(None).unwrap(), "usd");
        assert!(normalize_currency(Some("xyz")).is_err());
    }

    #[test]
    fn test_blank_currency_defaults_like_absent() {
        assert_eq!(normalize_currency(Some("")).unwrap(), "usd");
        assert_eq!(normalize_currency(Some("   ")).unwrap(), "usd");
    }

    #[test]
    fn test_catalog_fallback_to_default() {
        let catalog = PriceCatalog::standard();
        // Unlisted course falls back to the default entry.
        assert_eq!(catalog.base_price_minor("RUST101", "usd").unwrap(), 50_000);
        assert_eq!(catalog.base_price_minor("RUST101", "inr").unwrap(), 400_000);
    }

    #[test]
    fn test_catalog_explicit_course_wins() {
        let catalog = PriceCatalog::builder()
            .course(DEFAULT_COURSE_KEY)
            .price("usd", 50_000)
            .done()
            .course("GENAI101")
            .price("usd", 90_000)
            .price("inr", 5_600_000)
            .done()
            .build();

        assert_eq!(
            catalog.base_price_minor("GENAI101", "usd").unwrap(),
            90_000
        );
        assert_eq!(
            catalog.base_price_minor("GENAI101", "inr").unwrap(),
            5_600_000
        );
        assert_eq!(catalog.base_price_minor("OTHER", "usd").unwrap(), 50_000);
    }

    #[test]
    fn test_catalog_missing_currency_errors() {
        let catalog = PriceCatalog::builder()
            .course(DEFAULT_COURSE_KEY)
            .price("usd", 50_000)
            .done()
            .build();

        let err = catalog.base_price_minor("ANY", "gbp").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_catalog_non_positive_price_errors() {
        let catalog = PriceCatalog::builder()
            .course(DEFAULT_COURSE_KEY)
            .price("usd", 0)
            .done()
            .build();

        assert!(catalog.base_price_minor("ANY", "usd").is_err());
    }

    #[test]
    fn test_discount_schedule_tiers() {
        let schedule = DiscountSchedule::builder()
            .individual_rate(0.0)
            .group_tier(2, 0.10)
            .group_tier(5, 0.25)
            .group_tier(10, 0.35)
            .build();

        assert_eq!(schedule.rate_for(EnrollmentType::Group, 1), 0.0);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 2), 0.10);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 4), 0.10);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 5), 0.25);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 6), 0.25);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 10), 0.35);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 50), 0.35);
        assert_eq!(schedule.rate_for(EnrollmentType::Individual, 6), 0.0);
    }

    #[test]
    fn test_discount_schedule_monotonic_enforced() {
        // The 5-seat tier regresses below the 2-seat tier; build() lifts it.
        let schedule = DiscountSchedule::builder()
            .group_tier(2, 0.30)
            .group_tier(5, 0.10)
            .build();

        assert_eq!(schedule.rate_for(EnrollmentType::Group, 2), 0.30);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 5), 0.30);
    }

    #[test]
    fn test_standard_schedule_matches_stock_rates() {
        let schedule = DiscountSchedule::standard();
        assert_eq!(schedule.rate_for(EnrollmentType::Individual, 1), 0.20);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 1), 0.20);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 3), 0.40);
        assert_eq!(schedule.rate_for(EnrollmentType::Group, 7), 0.50);
    }
}
