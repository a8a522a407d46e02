//! Payment confirmation reconciliation.
//!
//! Both confirmation paths (provider webhook and client-initiated verify)
//! funnel a normalized [`PaymentNotice`] through [`Reconciler::apply`]. The
//! ledger's conditional `mark_paid` guarantees side effects run exactly once
//! even when the two paths race; a moka TTL cache additionally dedupes
//! webhook redeliveries by event id.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;

use crate::error::{CoursepayError, Result};
use crate::gateway::PaymentNotice;
use crate::leads::{LeadRecord, LeadStatus, LeadStore};
use crate::notify::{enrollment_confirmation, sales_notification, Mailer, NotifyConfig};
use crate::order::{Order, OrderLedger, PaidTransition};

/// Processed webhook event ids are remembered this long; matches the order
/// retention window, after which replays are harmless NotFounds anyway.
const EVENT_DEDUPE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const EVENT_DEDUPE_CAPACITY: u64 = 100_000;

/// Result of applying a payment notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// This call transitioned the order to paid and ran the side effects.
    Confirmed {
        order_id: String,
        /// Failed notification dispatches, one message per email. Payment
        /// state stands regardless.
        notification_errors: Vec<String>,
    },
    /// The order was already paid (or this event was already processed);
    /// nothing was re-sent or re-mutated.
    AlreadyConfirmed { order_id: String },
}

/// Finalizes payment status exactly once per order.
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn OrderLedger>,
    leads: Arc<dyn LeadStore>,
    mailer: Arc<dyn Mailer>,
    notify: NotifyConfig,
    processed_events: moka::future::Cache<String, ()>,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn OrderLedger>,
        leads: Arc<dyn LeadStore>,
        mailer: Arc<dyn Mailer>,
        notify: NotifyConfig,
    ) -> Self {
        Self {
            ledger,
            leads,
            mailer,
            notify,
            processed_events: moka::future::Cache::builder()
                .max_capacity(EVENT_DEDUPE_CAPACITY)
                .time_to_live(EVENT_DEDUPE_TTL)
                .build(),
        }
    }

    /// Apply a verified payment notice to the ledger.
    ///
    /// `fallback_order_id` covers providers whose notices do not embed our
    /// order id (the pull path supplies it from the request body).
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown/expired orders, `Validation` when the provider
    /// reports the payment as incomplete, `AmountMismatch` when the reported
    /// amount or currency disagrees with the frozen snapshot (the order is
    /// marked `mismatch` first).
    pub async fn apply(
        &self,
        notice: &PaymentNotice,
        fallback_order_id: Option<&str>,
    ) -> Result<ConfirmOutcome> {
        let order_id = notice
            .order_id
            .as_deref()
            .or(fallback_order_id)
            .ok_or_else(|| {
                CoursepayError::validation("payment notice carries no order reference")
            })?
            .to_string();

        if self.processed_events.contains_key(&notice.event_id) {
            tracing::info!(event_id = %notice.event_id, order_id = %order_id, "duplicate payment event ignored");
            return Ok(ConfirmOutcome::AlreadyConfirmed { order_id });
        }

        let order = self
            .ledger
            .get(&order_id)
            .await?
            .ok_or_else(|| CoursepayError::not_found(format!("order {order_id} not found")))?;

        if !notice.paid {
            return Err(CoursepayError::validation(
                "payment not completed according to provider",
            ));
        }

        if notice.amount_minor != order.quote.expected_total_minor
            || !notice.currency.eq_ignore_ascii_case(&order.quote.currency)
        {
            tracing::error!(
                order_id = %order_id,
                expected_minor = order.quote.expected_total_minor,
                expected_currency = %order.quote.currency,
                reported_minor = notice.amount_minor,
                reported_currency = %notice.currency,
                "provider-reported amount disagrees with ledger snapshot"
            );
            self.ledger.mark_mismatch(&order_id).await?;
            return Err(CoursepayError::AmountMismatch {
                expected_minor: order.quote.expected_total_minor,
                expected_currency: order.quote.currency.clone(),
                reported_minor: notice.amount_minor,
                reported_currency: notice.currency.clone(),
            });
        }

        let outcome = match self.ledger.mark_paid(&order_id).await? {
            PaidTransition::AlreadyPaid(_) => {
                tracing::info!(order_id = %order_id, "order already paid, skipping side effects");
                ConfirmOutcome::AlreadyConfirmed { order_id }
            }
            PaidTransition::Transitioned(paid_order) => {
                let notification_errors = self.run_side_effects(&paid_order).await;
                ConfirmOutcome::Confirmed {
                    order_id,
                    notification_errors,
                }
            }
        };

        self.processed_events
            .insert(notice.event_id.clone(), ())
            .await;
        Ok(outcome)
    }

    /// One-time side effects: lead upgrade and notification dispatch.
    /// Returns dispatch errors without failing; payment truth stands.
    async fn run_side_effects(&self, order: &Order) -> Vec<String> {
        let token = enrollment_token(&order.order_id, &order.learner.email);

        match self
            .leads
            .upgrade_to_enrolled(&order.order_id, order.quote.expected_total_minor, &token)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Pending lead missing (lost write at checkout); recreate it
                // directly in enrolled state rather than dropping the sale.
                tracing::warn!(order_id = %order.order_id, "pending lead missing at confirmation, creating enrolled record");
                let now = chrono::Utc::now();
                let lead = LeadRecord {
                    order_id: order.order_id.clone(),
                    full_name: order.learner.full_name.clone(),
                    email: order.learner.email.clone(),
                    phone: order.learner.phone.clone(),
                    city: order.learner.city.clone(),
                    training_location: order.learner.training_location.clone(),
                    course_id: order.quote.course_id.clone(),
                    course_title: order.course_info.title.clone(),
                    currency: order.quote.currency.clone(),
                    participants: order.quote.participants,
                    status: LeadStatus::Enrolled,
                    paid_amount_minor: Some(order.quote.expected_total_minor),
                    enrollment_token: Some(token.clone()),
                    referral_code: None,
                    created_at: now,
                    updated_at: now,
                };
                if let Err(err) = self.leads.create(lead).await {
                    tracing::error!(order_id = %order.order_id, error = %err, "failed to create enrolled lead record");
                }
            }
            Err(err) => {
                tracing::error!(order_id = %order.order_id, error = %err, "lead upgrade failed");
            }
        }

        let mut notification_errors = Vec::new();
        let emails = [
            enrollment_confirmation(&self.notify, order, &token),
            sales_notification(&self.notify, order),
        ];
        for email in &emails {
            if let Err(err) = self.mailer.send(email).await {
                tracing::error!(
                    order_id = %order.order_id,
                    to = %email.to,
                    error = %err,
                    "notification dispatch failed"
                );
                notification_errors.push(format!("failed to notify {}: {err}", email.to));
            }
        }

        tracing::info!(
            order_id = %order.order_id,
            emails_sent = emails.len() - notification_errors.len(),
            "payment confirmed"
        );
        notification_errors
    }
}

/// Opaque enrollment token: base64 of `order_id|email|timestamp_millis`.
#[must_use]
pub fn enrollment_token(order_id: &str, email: &str) -> String {
    let raw = format!(
        "{order_id}|{email}|{}",
        chrono::Utc::now().timestamp_millis()
    );
    base64::engine::general_purpose::STANDARD.encode(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Provider;
    use crate::leads::InMemoryLeadStore;
    use crate::notify::test::RecordingMailer;
    use crate::order::{CourseInfo, InMemoryOrderLedger, Learner, OrderStatus};
    use crate::pricing::{compute_quote, EnrollmentType, PricingSet, QuoteInputs};

    struct Fixture {
        ledger: Arc<InMemoryOrderLedger>,
        leads: InMemoryLeadStore,
        mailer: RecordingMailer,
        reconciler: Reconciler,
        order: Order,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryOrderLedger::new());
        let leads = InMemoryLeadStore::new();
        let mailer = RecordingMailer::new();
        let reconciler = Reconciler::new(
            ledger.clone(),
            Arc::new(leads.clone()),
            Arc::new(mailer.clone()),
            NotifyConfig::new("noreply@courses.example", "sales@courses.example"),
        );

        let quote = compute_quote(
            &PricingSet::standard(),
            &QuoteInputs {
                course_id: "GENAI101".to_string(),
                enrollment_type: EnrollmentType::Group,
                participants: Some(3.0),
                currency: Some("inr".to_string()),
                coupon_code: None,
                referral_rate: None,
            },
        )
        .unwrap();
        let order = Order {
            order_id: "ord_fixture".to_string(),
            provider: Provider::Stripe,
            provider_ref: "cs_1".to_string(),
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
            created_at: chrono::Utc::now(),
        };

        Fixture {
            ledger,
            leads,
            mailer,
            reconciler,
            order,
        }
    }

    fn notice_for(order: &Order, event_id: &str) -> PaymentNotice {
        PaymentNotice {
            provider: Provider::Stripe,
            event_id: event_id.to_string(),
            order_id: Some(order.order_id.clone()),
            amount_minor: order.quote.expected_total_minor,
            currency: order.quote.currency.clone(),
            paid: true,
        }
    }

    async fn seed_pending_lead(fx: &Fixture) {
        let now = chrono::Utc::now();
        fx.leads
            .create(LeadRecord {
                order_id: fx.order.order_id.clone(),
                full_name: fx.order.learner.full_name.clone(),
                email: fx.order.learner.email.clone(),
                phone: fx.order.learner.phone.clone(),
                city: fx.order.learner.city.clone(),
                training_location: fx.order.learner.training_location.clone(),
                course_id: fx.order.quote.course_id.clone(),
                course_title: fx.order.course_info.title.clone(),
                currency: fx.order.quote.currency.clone(),
                participants: fx.order.quote.participants,
                status: LeadStatus::PendingPayment,
                paid_amount_minor: None,
                enrollment_token: None,
                referral_code: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_first_confirmation_runs_side_effects_once() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        seed_pending_lead(&fx).await;

        let first = fx
            .reconciler
            .apply(&notice_for(&fx.order, "evt_1"), None)
            .await
            .unwrap();
        assert!(matches!(first, ConfirmOutcome::Confirmed { ref notification_errors, .. } if notification_errors.is_empty()));

        // Second notice (different event id, same order) races in later.
        let second = fx
            .reconciler
            .apply(&notice_for(&fx.order, "evt_2"), None)
            .await
            .unwrap();
        assert!(matches!(second, ConfirmOutcome::AlreadyConfirmed { .. }));

        // Exactly one lead upgrade and one email pair.
        assert_eq!(fx.mailer.sent_count(), 2);
        let lead = fx.leads.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Enrolled);
        assert_eq!(
            lead.paid_amount_minor,
            Some(fx.order.quote.expected_total_minor)
        );
        assert!(lead.enrollment_token.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_event_id_short_circuits() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        seed_pending_lead(&fx).await;

        let notice = notice_for(&fx.order, "evt_dup");
        fx.reconciler.apply(&notice, None).await.unwrap();
        let replay = fx.reconciler.apply(&notice, None).await.unwrap();
        assert!(matches!(replay, ConfirmOutcome::AlreadyConfirmed { .. }));
        assert_eq!(fx.mailer.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_amount_mismatch_marks_order_and_sends_nothing() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        seed_pending_lead(&fx).await;

        let mut notice = notice_for(&fx.order, "evt_bad");
        notice.amount_minor -= 1000;

        let err = fx.reconciler.apply(&notice, None).await.unwrap_err();
        assert!(matches!(err, CoursepayError::AmountMismatch { .. }));

        let order = fx.ledger.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Mismatch);
        assert_eq!(fx.mailer.sent_count(), 0);
        let lead = fx.leads.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::PendingPayment);
    }

    #[tokio::test]
    async fn test_currency_mismatch_is_a_mismatch() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();

        let mut notice = notice_for(&fx.order, "evt_cur");
        notice.currency = "usd".to_string();

        let err = fx.reconciler.apply(&notice, None).await.unwrap_err();
        assert!(matches!(err, CoursepayError::AmountMismatch { .. }));
    }

    #[tokio::test]
    async fn test_incomplete_payment_leaves_order_pending() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();

        let mut notice = notice_for(&fx.order, "evt_unpaid");
        notice.paid = false;

        let err = fx.reconciler.apply(&notice, None).await.unwrap_err();
        assert!(matches!(err, CoursepayError::Validation(_)));
        let order = fx.ledger.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_order_not_found() {
        let fx = fixture();
        let err = fx
            .reconciler
            .apply(&notice_for(&fx.order, "evt_x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoursepayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_lead_recreated_as_enrolled() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        // No pending lead seeded.

        fx.reconciler
            .apply(&notice_for(&fx.order, "evt_1"), None)
            .await
            .unwrap();

        let lead = fx.leads.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(lead.status, LeadStatus::Enrolled);
        assert!(lead.enrollment_token.is_some());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_roll_back_paid() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        seed_pending_lead(&fx).await;
        fx.mailer.fail_sends_to("sales@");

        let outcome = fx
            .reconciler
            .apply(&notice_for(&fx.order, "evt_1"), None)
            .await
            .unwrap();
        let ConfirmOutcome::Confirmed {
            notification_errors,
            ..
        } = outcome
        else {
            panic!("expected Confirmed");
        };
        assert_eq!(notification_errors.len(), 1);
        assert!(notification_errors[0].contains("sales@"));

        // Learner email still went out, order stays paid.
        assert_eq!(fx.mailer.sent_count(), 1);
        let order = fx.ledger.get(&fx.order.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_fallback_order_id_used_when_notice_lacks_one() {
        let fx = fixture();
        fx.ledger.create(fx.order.clone()).await.unwrap();
        seed_pending_lead(&fx).await;

        let mut notice = notice_for(&fx.order, "evt_1");
        notice.order_id = None;

        let outcome = fx
            .reconciler
            .apply(&notice, Some(&fx.order.order_id))
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Confirmed { .. }));

        let err = fx.reconciler.apply(&notice_without_any_id(), None).await;
        assert!(err.is_err());
    }

    fn notice_without_any_id() -> PaymentNotice {
        PaymentNotice {
            provider: Provider::Stripe,
            event_id: "evt_no_id".to_string(),
            order_id: None,
            amount_minor: 1,
            currency: "usd".to_string(),
            paid: true,
        }
    }

    #[test]
    fn test_enrollment_token_decodes_to_components() {
        let token = enrollment_token("ord_1", "asha@example.com");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(token)
            .unwrap();
        let decoded = String::from_utf8(decoded).unwrap();
        let parts: Vec<&str> = decoded.split('|').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ord_1");
        assert_eq!(parts[1], "asha@example.com");
        assert!(parts[2].parse::<i64>().is_ok());
    }
}
