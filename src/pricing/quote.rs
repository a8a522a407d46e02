//! Quote computation: the pure pricing function at the heart of checkout.
//!
//! `compute_quote` does no I/O. Everything it needs (catalog, coupon table,
//! discount schedule, an already-resolved referral rate) comes in as
//! arguments, which keeps the authoritative server price auditable and the
//! function trivially testable.

use serde::{Deserialize, Serialize};

use super::catalog::{normalize_currency, DiscountSchedule, EnrollmentType, PriceCatalog};
use super::coupon::CouponTable;
use crate::error::Result;

/// Referral discounts are never allowed to exceed half the price, whatever
/// the referral directory says.
pub const REFERRAL_RATE_CAP: f64 = 0.50;

/// Participant counts are clamped to this range.
pub const MAX_PARTICIPANTS: u32 = 50;

/// The immutable pricing configuration a quote is computed against.
#[derive(Debug, Clone)]
pub struct PricingSet {
    pub catalog: PriceCatalog,
    pub coupons: CouponTable,
    pub discounts: DiscountSchedule,
}

impl PricingSet {
    /// Pricing set seeded with the stock catalog, coupons, and schedule.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            catalog: PriceCatalog::standard(),
            coupons: CouponTable::standard(),
            discounts: DiscountSchedule::standard(),
        }
    }
}

/// Inputs to quote computation, pre-resolution of referral codes.
///
/// `participants` is accepted as a float because clients send arbitrary JSON
/// numbers; normalization (non-finite/non-positive → 1, clamp to 50) happens
/// inside `compute_quote` so every caller gets identical semantics.
#[derive(Debug, Clone)]
pub struct QuoteInputs {
    pub course_id: String,
    pub enrollment_type: EnrollmentType,
    pub participants: Option<f64>,
    pub currency: Option<String>,
    pub coupon_code: Option<String>,
    /// Referral discount rate already resolved by the caller (0.0–1.0).
    pub referral_rate: Option<f64>,
}

/// A computed price quote. Ephemeral: computed per request and frozen into
/// the order snapshot at checkout time, never recomputed later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub course_id: String,
    pub currency: String,
    pub enrollment_type: EnrollmentType,
    pub participants: u32,
    /// Authoritative per-seat price after all discounts, in minor units.
    pub unit_amount_minor: i64,
    pub original_unit_minor: i64,
    pub quantity: u32,
    pub expected_total_minor: i64,
    /// Enrollment-tier discount, rounded for display.
    pub discount_percent: u32,
    pub coupon_applied: bool,
    pub coupon_code: Option<String>,
    pub coupon_discount_percent: u32,
    pub referral_discount_percent: u32,
    /// Combined discount derived from the final/original unit ratio. The
    /// per-stage percentages above are informational; this is the one that
    /// always agrees with `unit_amount_minor`.
    pub total_discount_percent: u32,
}

/// Apply one discount stage: round to the nearest minor unit, floor at 1 so
/// a stacked discount can never zero out the price.
fn apply_discount(unit_minor: i64, rate: f64) -> i64 {
    (((unit_minor as f64) * (1.0 - rate)).round() as i64).max(1)
}

/// Normalize a raw participant count: non-finite or non-positive defaults
/// to 1, everything is clamped to [1, MAX_PARTICIPANTS].
fn normalize_participants(raw: Option<f64>) -> u32 {
    match raw {
        Some(p) if p.is_finite() && p > 0.0 => (p as u32).clamp(1, MAX_PARTICIPANTS),
        _ => 1,
    }
}

/// Compute a deterministic quote.
///
/// Discounts compose multiplicatively in the order
/// {enrollment tier → coupon → referral}, each stage rounded to the nearest
/// minor unit and floored at 1.
///
/// # Errors
///
/// `PriceIntegrity` on unsupported currency or unconfigured price. Unknown
/// or currency-ineligible coupon codes do not fail the quote; they simply
/// contribute no discount (unknown codes are logged for monitoring).
pub fn compute_quote(pricing: &PricingSet, inputs: &QuoteInputs) -> Result<Quote> {
    let currency = normalize_currency(inputs.currency.as_deref())?;
    let participants = normalize_participants(inputs.participants);

    let original_unit_minor = pricing
        .catalog
        .base_price_minor(&inputs.course_id, &currency)?;

    // Stage 1: enrollment-tier discount.
    let tier_rate = pricing
        .discounts
        .rate_for(inputs.enrollment_type, participants);
    let mut unit_amount_minor = apply_discount(original_unit_minor, tier_rate);

    // Stage 2: coupon, if present and currency-eligible.
    let mut coupon_applied = false;
    let mut applied_coupon_code = None;
    let mut coupon_rate = 0.0;
    if let Some(raw_code) = inputs.coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
        match pricing.coupons.validate(raw_code, &currency) {
            Some(entry) => {
                unit_amount_minor = apply_discount(unit_amount_minor, entry.rate);
                coupon_applied = true;
                applied_coupon_code = Some(entry.code.clone());
                coupon_rate = entry.rate;
            }
            None => {
                tracing::warn!(
                    code = %CouponTable::normalize(raw_code),
                    currency = %currency,
                    "coupon not applied: unknown code or currency-ineligible"
                );
            }
        }
    }

    // Stage 3: referral, capped.
    let referral_rate = inputs
        .referral_rate
        .unwrap_or(0.0)
        .clamp(0.0, REFERRAL_RATE_CAP);
    if referral_rate > 0.0 {
        unit_amount_minor = apply_discount(unit_amount_minor, referral_rate);
    }

    let quantity = participants;
    let expected_total_minor = unit_amount_minor * i64::from(quantity);

    // Combined discount is derived from the final/original ratio rather than
    // summing the independently rounded stage percentages; the two can
    // disagree by a rounding point and this one matches the charged amount.
    let total_discount_percent =
        ((1.0 - unit_amount_minor as f64 / original_unit_minor as f64) * 100.0).round() as u32;

    Ok(Quote {
        course_id: inputs.course_id.clone(),
        currency,
        enrollment_type: inputs.enrollment_type,
        participants,
        unit_amount_minor,
        original_unit_minor,
        quantity,
        expected_total_minor,
        discount_percent: (tier_rate * 100.0).round() as u32,
        coupon_applied,
        coupon_code: applied_coupon_code,
        coupon_discount_percent: (coupon_rate * 100.0).round() as u32,
        referral_discount_percent: (referral_rate * 100.0).round() as u32,
        total_discount_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::catalog::{DiscountSchedule, PriceCatalog, DEFAULT_COURSE_KEY};
    use crate::pricing::coupon::CouponTable;

    fn genai_pricing() -> PricingSet {
        PricingSet {
            catalog: PriceCatalog::builder()
                .course(DEFAULT_COURSE_KEY)
                .price("usd", 50_000)
                .price("inr", 400_000)
                .done()
                .course("GENAI101")
                .price("inr", 5_600_000)
                .done()
                .build(),
            coupons: CouponTable::builder()
                .coupon_for_currencies("DIWALI10", 0.10, ["inr"])
                .coupon("SAVE20", 0.20)
                .build(),
            discounts: DiscountSchedule::builder()
                .individual_rate(0.0)
                .group_tier(2, 0.10)
                .group_tier(5, 0.25)
                .group_tier(10, 0.35)
                .build(),
        }
    }

    fn inputs(course: &str) -> QuoteInputs {
        QuoteInputs {
            course_id: course.to_string(),
            enrollment_type: EnrollmentType::Group,
            participants: Some(6.0),
            currency: Some("inr".to_string()),
            coupon_code: None,
            referral_rate: None,
        }
    }

    #[test]
    fn test_group_tier_and_coupon_compose_multiplicatively() {
        // GENAI101 @ 5,600,000 inr, group of 6 → 25% tier → 4,200,000;
        // DIWALI10 (10%, inr) → 3,780,000; total = 6 × 3,780,000.
        let pricing = genai_pricing();
        let mut req = inputs("GENAI101");
        req.coupon_code = Some("DIWALI10".to_string());

        let quote = compute_quote(&pricing, &req).unwrap();
        assert_eq!(quote.original_unit_minor, 5_600_000);
        assert_eq!(quote.unit_amount_minor, 3_780_000);
        assert_eq!(quote.quantity, 6);
        assert_eq!(quote.expected_total_minor, 22_680_000);
        assert_eq!(quote.discount_percent, 25);
        assert!(quote.coupon_applied);
        assert_eq!(quote.coupon_code.as_deref(), Some("DIWALI10"));
        assert_eq!(quote.coupon_discount_percent, 10);
        // 1 - 3,780,000/5,600,000 = 32.5% → 33 after rounding.
        assert_eq!(quote.total_discount_percent, 33);
    }

    #[test]
    fn test_invalid_currency_rejected() {
        let pricing = genai_pricing();
        let mut req = inputs("GENAI101");
        req.currency = Some("xyz".to_string());

        let err = compute_quote(&pricing, &req).unwrap_err();
        assert!(matches!(
            err,
            crate::error::CoursepayError::PriceIntegrity(_)
        ));
    }

    #[test]
    fn test_unconfigured_price_rejected() {
        let pricing = genai_pricing();
        let mut req = inputs("GENAI101");
        // GENAI101 only has inr; default has usd/inr but not gbp.
        req.currency = Some("gbp".to_string());
        assert!(compute_quote(&pricing, &req).is_err());
    }

    #[test]
    fn test_currency_ineligible_coupon_is_a_no_op() {
        let pricing = genai_pricing();
        let mut req = inputs("ANY");
        req.currency = Some("usd".to_string());
        req.coupon_code = Some("DIWALI10".to_string()); // inr-only

        let quote = compute_quote(&pricing, &req).unwrap();
        assert!(!quote.coupon_applied);
        assert_eq!(quote.coupon_discount_percent, 0);

        let mut without = inputs("ANY");
        without.currency = Some("usd".to_string());
        let baseline = compute_quote(&pricing, &without).unwrap();
        assert_eq!(quote.unit_amount_minor, baseline.unit_amount_minor);
    }

    #[test]
    fn test_unknown_coupon_silently_ignored() {
        let pricing = genai_pricing();
        let mut req = inputs("ANY");
        req.coupon_code = Some("DOESNOTEXIST".to_string());

        let quote = compute_quote(&pricing, &req).unwrap();
        assert!(!quote.coupon_applied);
        assert!(quote.coupon_code.is_none());
    }

    #[test]
    fn test_referral_capped_at_fifty_percent() {
        let pricing = genai_pricing();
        let mut req = inputs("GENAI101");
        req.referral_rate = Some(0.90);

        let capped = compute_quote(&pricing, &req).unwrap();
        req.referral_rate = Some(0.50);
        let at_cap = compute_quote(&pricing, &req).unwrap();

        assert_eq!(capped.unit_amount_minor, at_cap.unit_amount_minor);
        assert_eq!(capped.referral_discount_percent, 50);
    }

    #[test]
    fn test_determinism_same_inputs_same_quote() {
        let pricing = genai_pricing();
        let mut req = inputs("GENAI101");
        req.coupon_code = Some("DIWALI10".to_string());
        req.referral_rate = Some(0.10);

        let a = compute_quote(&pricing, &req).unwrap();
        let b = compute_quote(&pricing, &req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_participant_normalization() {
        let pricing = genai_pricing();
        let mut req = inputs("ANY");

        req.participants = None;
        assert_eq!(compute_quote(&pricing, &req).unwrap().participants, 1);

        req.participants = Some(-3.0);
        assert_eq!(compute_quote(&pricing, &req).unwrap().participants, 1);

        req.participants = Some(f64::NAN);
        assert_eq!(compute_quote(&pricing, &req).unwrap().participants, 1);

        req.participants = Some(f64::INFINITY);
        assert_eq!(compute_quote(&pricing, &req).unwrap().participants, 1);

        req.participants = Some(500.0);
        assert_eq!(compute_quote(&pricing, &req).unwrap().participants, 50);
    }

    #[test]
    fn test_unit_never_below_one_and_never_above_original() {
        let pricing = PricingSet {
            catalog: PriceCatalog::builder()
                .course(DEFAULT_COURSE_KEY)
                .price("usd", 2)
                .done()
                .build(),
            coupons: CouponTable::builder().coupon("TECH2026", 0.50).build(),
            discounts: DiscountSchedule::builder()
                .individual_rate(0.20)
                .group_tier(2, 0.50)
                .build(),
        };

        let req = QuoteInputs {
            course_id: "C".to_string(),
            enrollment_type: EnrollmentType::Group,
            participants: Some(10.0),
            currency: Some("usd".to_string()),
            coupon_code: Some("TECH2026".to_string()),
            referral_rate: Some(0.50),
        };

        let quote = compute_quote(&pricing, &req).unwrap();
        assert!(quote.unit_amount_minor >= 1);
        assert!(quote.unit_amount_minor <= quote.original_unit_minor);
    }

    #[test]
    fn test_tier_boundary_never_raises_unit_price() {
        let pricing = genai_pricing();
        let mut previous = i64::MAX;
        for p in 1..=50u32 {
            let mut req = inputs("GENAI101");
            req.participants = Some(f64::from(p));
            let quote = compute_quote(&pricing, &req).unwrap();
            assert!(
                quote.unit_amount_minor <= previous,
                "unit price rose at {} participants",
                p
            );
            previous = quote.unit_amount_minor;
        }
    }

    #[test]
    fn test_quote_serializes_camel_case() {
        let pricing = genai_pricing();
        let quote = compute_quote(&pricing, &inputs("GENAI101")).unwrap();
        let json = serde_json::to_value(&quote).unwrap();
        assert!(json.get("unitAmountMinor").is_some());
        assert!(json.get("expectedTotalMinor").is_some());
        assert!(json.get("couponApplied").is_some());
        assert_eq!(json["enrollmentType"], "group");
    }
}
