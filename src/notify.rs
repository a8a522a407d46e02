//! Notification dispatch: learner confirmation and sales alert emails.
//!
//! Email is strictly best-effort. A dispatch failure is logged and reported
//! to the caller where the protocol allows, but never rolls back a confirmed
//! payment.

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::error::{CoursepayError, Result};
use crate::order::Order;

/// An email message.
#[derive(Debug, Clone)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
}

impl Email {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            text: text.into(),
        }
    }
}

/// Email sending backend. Swap between SMTP and console output; tests use
/// the recording mailer in [`test`].
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<()>;
}

/// Where notification emails come from and where sales alerts go.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub from: String,
    pub sales_to: String,
}

impl NotifyConfig {
    pub fn new(from: impl Into<String>, sales_to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            sales_to: sales_to.into(),
        }
    }
}

fn format_amount(minor: i64, currency: &str) -> String {
    format!("{:.2} {}", minor as f64 / 100.0, currency.to_uppercase())
}

/// Confirmation email for the learner, sent once on payment confirmation.
#[must_use]
pub fn enrollment_confirmation(config: &NotifyConfig, order: &Order, token: &str) -> Email {
    let text = format!(
        "Hi {name},\n\n\
         Your enrollment in {title} is confirmed.\n\n\
         Order: {order_id}\n\
         Amount paid: {amount}\n\
         Schedule: {duration}, {time}\n\
         Enrollment token: {token}\n\n\
         Keep this token for your records. See you in class!",
        name = order.learner.full_name,
        title = order.course_info.title,
        order_id = order.order_id,
        amount = format_amount(order.quote.expected_total_minor, &order.quote.currency),
        duration = order.course_info.duration,
        time = order.course_info.time,
        token = token,
    );
    Email::new(
        &config.from,
        &order.learner.email,
        format!("Enrollment confirmed: {}", order.course_info.title),
        text,
    )
}

/// Internal sales notification, sent once on payment confirmation.
#[must_use]
pub fn sales_notification(config: &NotifyConfig, order: &Order) -> Email {
    let text = format!(
        "New paid enrollment.\n\n\
         Order: {order_id}\n\
         Course: {course} ({title})\n\
         Learner: {name} <{email}>, {phone}, {city}\n\
         Location: {location}\n\
         Seats: {participants}\n\
         Amount: {amount} via {provider}",
        order_id = order.order_id,
        course = order.quote.course_id,
        title = order.course_info.title,
        name = order.learner.full_name,
        email = order.learner.email,
        phone = order.learner.phone,
        city = order.learner.city,
        location = order.learner.training_location,
        participants = order.quote.participants,
        amount = format_amount(order.quote.expected_total_minor, &order.quote.currency),
        provider = order.provider,
    );
    Email::new(
        &config.from,
        &config.sales_to,
        format!("Paid enrollment: {}", order.quote.course_id),
        text,
    )
}

/// Mailer that logs messages instead of sending them. The development
/// default when SMTP is not configured.
#[derive(Debug, Default, Clone)]
pub struct ConsoleMailer;

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            body = %email.text,
            "console mailer: email not actually sent"
        );
        Ok(())
    }
}

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 587,
            username: None,
            password: None,
            starttls: true,
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// SMTP mailer using lettre's async transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let mut builder = if config.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        }
        .map_err(|e| CoursepayError::internal(format!("failed to create SMTP transport: {e}")))?;

        builder = builder.port(config.port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
        })
    }

    fn build_message(email: &Email) -> Result<Message> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| CoursepayError::validation(format!("invalid 'from' address: {e}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| CoursepayError::validation(format!("invalid 'to' address: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.text.clone())
            .map_err(|e| CoursepayError::internal(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        let message = Self::build_message(email)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| CoursepayError::internal(format!("failed to send email: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpMailer").finish_non_exhaustive()
    }
}

/// Test mailers.
pub mod test {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Mailer that records sent messages for assertions.
    #[derive(Default, Clone)]
    pub struct RecordingMailer {
        sent: Arc<Mutex<Vec<Email>>>,
        fail_matching: Arc<Mutex<Option<String>>>,
    }

    impl RecordingMailer {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make sends fail when the recipient contains `needle`.
        pub fn fail_sends_to(&self, needle: impl Into<String>) {
            *self.fail_matching.lock().unwrap() = Some(needle.into());
        }

        pub fn sent(&self) -> Vec<Email> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, email: &Email) -> Result<()> {
            if let Some(needle) = self.fail_matching.lock().unwrap().as_deref() {
                if email.to.contains(needle) {
                    return Err(CoursepayError::internal("simulated smtp failure"));
                }
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Provider;
    use crate::order::{CourseInfo, Learner, OrderStatus};
    use crate::pricing::{compute_quote, EnrollmentType, PricingSet, QuoteInputs};
    use chrono::Utc;

    fn paid_order() -> Order {
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
        Order {
            order_id: "ord_test".to_string(),
            provider: Provider::Razorpay,
            provider_ref: "order_xyz".to_string(),
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
            status: OrderStatus::Paid,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_confirmation_email_addressed_to_learner() {
        let config = NotifyConfig::new("noreply@courses.example", "sales@courses.example");
        let email = enrollment_confirmation(&config, &paid_order(), "tok_abc");
        assert_eq!(email.to, "asha@example.com");
        assert!(email.text.contains("ord_test"));
        assert!(email.text.contains("tok_abc"));
        assert!(email.subject.contains("Generative AI Foundations"));
    }

    #[test]
    fn test_sales_email_goes_to_sales_inbox() {
        let config = NotifyConfig::new("noreply@courses.example", "sales@courses.example");
        let email = sales_notification(&config, &paid_order());
        assert_eq!(email.to, "sales@courses.example");
        assert!(email.text.contains("GENAI101"));
        assert!(email.text.contains("razorpay"));
    }

    #[tokio::test]
    async fn test_recording_mailer_selective_failure() {
        let mailer = test::RecordingMailer::new();
        mailer.fail_sends_to("sales@");

        let ok = Email::new("a@x", "user@x", "s", "b");
        let bad = Email::new("a@x", "sales@x", "s", "b");
        assert!(mailer.send(&ok).await.is_ok());
        assert!(mailer.send(&bad).await.is_err());
        assert_eq!(mailer.sent_count(), 1);
    }
}
