//! Order ledger: short-lived, TTL'd snapshots of in-flight checkouts.
//!
//! The ledger is a working cache keyed by order id, not the system of
//! record; durable lead records (see [`crate::leads`]) are written at
//! creation and updated at confirmation, so entries can expire after the
//! retention window regardless of status.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CoursepayError, Result};
use crate::gateway::Provider;
use crate::pricing::Quote;

/// How long ledger entries are retained.
pub const ORDER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const ORDER_ID_LEN: usize = 24;

/// Generate a collision-resistant order id (`ord_` + 24 random
/// alphanumerics, ~143 bits of entropy).
#[must_use]
pub fn generate_order_id() -> String {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_ID_LEN)
        .map(char::from)
        .collect();
    format!("ord_{token}")
}

/// Who is enrolling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learner {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub training_location: String,
}

/// Display details of the course being purchased, snapshotted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    pub title: String,
    pub duration: String,
    pub time: String,
}

/// Order lifecycle. `Paid` and `Mismatch` are terminal; only the
/// reconciliation path mutates status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Mismatch,
}

impl OrderStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Mismatch => "mismatch",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A ledger entry: the frozen quote plus everything needed to reconcile the
/// payment later. Amounts are never recomputed after this snapshot is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub provider: Provider,
    /// Provider-side session/order identifier bound to this entry.
    pub provider_ref: String,
    pub quote: Quote,
    pub learner: Learner,
    pub course_info: CourseInfo,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// The snapshot exposed over HTTP: enough to render an order status
    /// page, minus learner contact details.
    #[must_use]
    pub fn public_view(&self) -> PublicOrder {
        PublicOrder {
            order_id: self.order_id.clone(),
            provider: self.provider,
            status: self.status,
            course_id: self.quote.course_id.clone(),
            course_title: self.course_info.title.clone(),
            currency: self.quote.currency.clone(),
            unit_amount_minor: self.quote.unit_amount_minor,
            expected_total_minor: self.quote.expected_total_minor,
            participants: self.quote.participants,
            created_at: self.created_at,
        }
    }
}

/// Non-sensitive order snapshot for `GET /payments/order/{orderId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicOrder {
    pub order_id: String,
    pub provider: Provider,
    pub status: OrderStatus,
    pub course_id: String,
    pub course_title: String,
    pub currency: String,
    pub unit_amount_minor: i64,
    pub expected_total_minor: i64,
    pub participants: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of a conditional `pending → paid` transition.
#[derive(Debug, Clone)]
pub enum PaidTransition {
    /// This call performed the transition; side effects should run.
    Transitioned(Order),
    /// Another confirmation got there first; skip side effects.
    AlreadyPaid(Order),
}

/// Trait for the order ledger.
///
/// `mark_paid` must be a single atomic conditional update (or serialized per
/// order id) so that concurrent confirmations produce exactly one
/// `Transitioned` result.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    /// Insert a new pending order. Duplicate order ids are a correctness
    /// violation and rejected.
    async fn create(&self, order: Order) -> Result<()>;

    /// Fetch an order; expired entries read as absent.
    async fn get(&self, order_id: &str) -> Result<Option<Order>>;

    /// Transition `pending → paid`. Idempotent: an already-paid order yields
    /// [`PaidTransition::AlreadyPaid`]. An order in `mismatch` is terminal
    /// and errors.
    async fn mark_paid(&self, order_id: &str) -> Result<PaidTransition>;

    /// Transition to the terminal `mismatch` state. Idempotent.
    async fn mark_mismatch(&self, order_id: &str) -> Result<()>;
}

/// In-memory ledger with TTL eviction. Expired entries are invisible to
/// reads and swept on insert.
#[derive(Clone)]
pub struct InMemoryOrderLedger {
    inner: std::sync::Arc<std::sync::RwLock<std::collections::HashMap<String, Order>>>,
    ttl: chrono::Duration,
}

impl InMemoryOrderLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(ORDER_TTL)
    }

    /// Ledger with a custom retention window (tests use short windows).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: std::sync::Arc::default(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
        }
    }

    fn is_expired(&self, order: &Order, now: DateTime<Utc>) -> bool {
        now - order.created_at > self.ttl
    }
}

impl Default for InMemoryOrderLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn create(&self, order: Order) -> Result<()> {
        let now = Utc::now();
        let mut orders = self.inner.write().unwrap();
        orders.retain(|_, existing| now - existing.created_at <= self.ttl);
        if orders.contains_key(&order.order_id) {
            return Err(CoursepayError::internal(format!(
                "duplicate order id {}",
                order.order_id
            )));
        }
        orders.insert(order.order_id.clone(), order);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let now = Utc::now();
        let orders = self.inner.read().unwrap();
        Ok(orders
            .get(order_id)
            .filter(|order| !self.is_expired(order, now))
            .cloned())
    }

    async fn mark_paid(&self, order_id: &str) -> Result<PaidTransition> {
        let now = Utc::now();
        let mut orders = self.inner.write().unwrap();
        let order = orders
            .get_mut(order_id)
            .filter(|order| now - order.created_at <= self.ttl)
            .ok_or_else(|| CoursepayError::not_found(format!("order {order_id} not found")))?;
        match order.status {
            OrderStatus::Pending => {
                order.status = OrderStatus::Paid;
                Ok(PaidTransition::Transitioned(order.clone()))
            }
            OrderStatus::Paid => Ok(PaidTransition::AlreadyPaid(order.clone())),
            OrderStatus::Mismatch => Err(CoursepayError::validation(format!(
                "order {order_id} is in terminal mismatch state"
            ))),
        }
    }

    async fn mark_mismatch(&self, order_id: &str) -> Result<()> {
        let now = Utc::now();
        let mut orders = self.inner.write().unwrap();
        let order = orders
            .get_mut(order_id)
            .filter(|order| now - order.created_at <= self.ttl)
            .ok_or_else(|| CoursepayError::not_found(format!("order {order_id} not found")))?;
        if order.status == OrderStatus::Pending {
            order.status = OrderStatus::Mismatch;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{compute_quote, EnrollmentType, PricingSet, QuoteInputs};

    pub(crate) fn sample_order(order_id: &str) -> Order {
        let quote = compute_quote(
            &PricingSet::standard(),
            &QuoteInputs {
                course_id: "GENAI101".to_string(),
                enrollment_type: EnrollmentType::Individual,
                participants: Some(1.0),
                currency: Some("usd".to_string()),
                coupon_code: None,
                referral_rate: None,
            },
        )
        .unwrap();

        Order {
            order_id: order_id.to_string(),
            provider: Provider::Stripe,
            provider_ref: "cs_test_123".to_string(),
            quote,
            learner: Learner {
                full_name: "Asha Rao".to_string(),
                email: "asha@example.com".to_string(),
                phone: "+91-9000000000".to_string(),
                city: "Pune".to_string(),
                training_location: "online".to_string(),
            },
            course_info: CourseInfo {
                title: "Generative AI Foundations".to_string(),
                duration: "6 weeks".to_string(),
                time: "weekends".to_string(),
            },
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_order_id_shape_and_uniqueness() {
        let a = generate_order_id();
        let b = generate_order_id();
        assert!(a.starts_with("ord_"));
        assert_eq!(a.len(), 4 + 24);
        assert!(a[4..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create(sample_order("ord_1")).await.unwrap();

        let fetched = ledger.get("ord_1").await.unwrap().unwrap();
        assert_eq!(fetched.status, OrderStatus::Pending);
        assert!(ledger.get("ord_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_order_id_rejected() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create(sample_order("ord_1")).await.unwrap();
        assert!(ledger.create(sample_order("ord_1")).await.is_err());
    }

    #[tokio::test]
    async fn test_mark_paid_is_idempotent() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create(sample_order("ord_1")).await.unwrap();

        let first = ledger.mark_paid("ord_1").await.unwrap();
        assert!(matches!(first, PaidTransition::Transitioned(_)));

        let second = ledger.mark_paid("ord_1").await.unwrap();
        assert!(matches!(second, PaidTransition::AlreadyPaid(_)));
    }

    #[tokio::test]
    async fn test_mismatch_is_terminal() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create(sample_order("ord_1")).await.unwrap();

        ledger.mark_mismatch("ord_1").await.unwrap();
        ledger.mark_mismatch("ord_1").await.unwrap();
        assert_eq!(
            ledger.get("ord_1").await.unwrap().unwrap().status,
            OrderStatus::Mismatch
        );
        assert!(ledger.mark_paid("ord_1").await.is_err());
    }

    #[tokio::test]
    async fn test_mismatch_does_not_downgrade_paid() {
        let ledger = InMemoryOrderLedger::new();
        ledger.create(sample_order("ord_1")).await.unwrap();
        ledger.mark_paid("ord_1").await.unwrap();

        ledger.mark_mismatch("ord_1").await.unwrap();
        assert_eq!(
            ledger.get("ord_1").await.unwrap().unwrap().status,
            OrderStatus::Paid
        );
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let ledger = InMemoryOrderLedger::with_ttl(Duration::from_secs(0));
        let mut order = sample_order("ord_1");
        order.created_at = Utc::now() - chrono::Duration::seconds(5);
        {
            // Insert directly so the expiry sweep does not reject creation.
            let mut orders = ledger.inner.write().unwrap();
            orders.insert(order.order_id.clone(), order);
        }

        assert!(ledger.get("ord_1").await.unwrap().is_none());
        assert!(ledger.mark_paid("ord_1").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_confirmations_transition_once() {
        let ledger = std::sync::Arc::new(InMemoryOrderLedger::new());
        ledger.create(sample_order("ord_1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(
                async move { ledger.mark_paid("ord_1").await },
            ));
        }

        let mut transitioned = 0;
        for handle in handles {
            if let PaidTransition::Transitioned(_) = handle.await.unwrap().unwrap() {
                transitioned += 1;
            }
        }
        assert_eq!(transitioned, 1);
    }

    #[test]
    fn test_public_view_redacts_contact_details() {
        let order = sample_order("ord_1");
        let json = serde_json::to_value(order.public_view()).unwrap();
        assert!(json.get("orderId").is_some());
        assert!(json.get("expectedTotalMinor").is_some());
        let rendered = json.to_string();
        assert!(!rendered.contains("asha@example.com"));
        assert!(!rendered.contains("9000000000"));
    }
}
