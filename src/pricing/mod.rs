//! Pricing: course catalog, coupons, enrollment-tier discounts, and the
//! quote calculator that composes them.

pub mod catalog;
pub mod coupon;
pub mod quote;

pub use catalog::{
    normalize_currency, DiscountSchedule, EnrollmentType, PriceCatalog, ALLOWED_CURRENCIES,
    DEFAULT_COURSE_KEY,
};
pub use coupon::{CouponEntry, CouponTable};
pub use quote::{
    compute_quote, PricingSet, Quote, QuoteInputs, MAX_PARTICIPANTS, REFERRAL_RATE_CAP,
};
