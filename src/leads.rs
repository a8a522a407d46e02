//! Durable lead/enrollment records.
//!
//! A lead is written at checkout initiation in `pending-payment` status so
//! abandoned checkouts are still captured, then upgraded in place to
//! `enrolled` when payment is confirmed. Leads outlive the 24-hour order
//! ledger entries and are the system of record for who bought what.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Lifecycle of a lead record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeadStatus {
    /// Checkout started, payment not yet confirmed.
    PendingPayment,
    /// Payment confirmed; enrollment token issued.
    Enrolled,
}

impl LeadStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending-payment",
            Self::Enrolled => "enrolled",
        }
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable lead/enrollment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadRecord {
    pub order_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub city: String,
    pub training_location: String,
    pub course_id: String,
    pub course_title: String,
    pub currency: String,
    pub participants: u32,
    pub status: LeadStatus,
    /// Final paid amount in minor units; set when the lead is enrolled.
    pub paid_amount_minor: Option<i64>,
    /// Opaque enrollment token issued on payment confirmation.
    pub enrollment_token: Option<String>,
    /// Referral code the lead entered at checkout, if any.
    pub referral_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trait for persisting lead records and looking up referral codes.
///
/// The referral directory lives with leads because referral codes are issued
/// to existing customers; resolving a code is a lookup against the same
/// store.
#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Insert a new pending-payment lead. If a record for the order id
    /// already exists it is left untouched.
    async fn create(&self, lead: LeadRecord) -> Result<()>;

    /// Fetch a lead by order id.
    async fn get(&self, order_id: &str) -> Result<Option<LeadRecord>>;

    /// Upgrade the lead matching `order_id` to `enrolled`, recording the
    /// paid amount and enrollment token. Returns the updated record, or
    /// `None` if no pending record exists (the caller decides the fallback).
    async fn upgrade_to_enrolled(
        &self,
        order_id: &str,
        paid_amount_minor: i64,
        enrollment_token: &str,
    ) -> Result<Option<LeadRecord>>;

    /// Resolve a referral code to a discount rate (0.0–1.0).
    async fn referral_rate(&self, code: &str) -> Result<Option<f64>>;
}

/// In-memory lead store. The default for development and tests; production
/// deployments implement [`LeadStore`] against a durable document store.
#[derive(Default, Clone)]
pub struct InMemoryLeadStore {
    inner: std::sync::Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    leads: std::sync::RwLock<std::collections::HashMap<String, LeadRecord>>,
    referrals: std::sync::RwLock<std::collections::HashMap<String, f64>>,
}

impl InMemoryLeadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a referral code with its discount rate.
    pub fn seed_referral(&self, code: impl Into<String>, rate: f64) {
        self.inner
            .referrals
            .write()
            .unwrap()
            .insert(code.into().trim().to_uppercase(), rate.clamp(0.0, 1.0));
    }

    /// Snapshot of all leads (for testing).
    pub fn all_leads(&self) -> Vec<LeadRecord> {
        self.inner.leads.read().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn create(&self, lead: LeadRecord) -> Result<()> {
        self.inner
            .leads
            .write()
            .unwrap()
            .entry(lead.order_id.clone())
            .or_insert(lead);
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<LeadRecord>> {
        Ok(self.inner.leads.read().unwrap().get(order_id).cloned())
    }

    async fn upgrade_to_enrolled(
        &self,
        order_id: &str,
        paid_amount_minor: i64,
        enrollment_token: &str,
    ) -> Result<Option<LeadRecord>> {
        let mut leads = self.inner.leads.write().unwrap();
        match leads.get_mut(order_id) {
            Some(lead) => {
                lead.status = LeadStatus::Enrolled;
                lead.paid_amount_minor = Some(paid_amount_minor);
                lead.enrollment_token = Some(enrollment_token.to_string());
                lead.updated_at = Utc::now();
                Ok(Some(lead.clone()))
            }
            None => Ok(None),
        }
    }

    async fn referral_rate(&self, code: &str) -> Result<Option<f64>> {
        let normalized = code.trim().to_uppercase();
        Ok(self.inner.referrals.read().unwrap().get(&normalized).copied())
    }
}
