//! Server configuration, loaded from the environment.

use std::net::SocketAddr;

use secrecy::SecretString;

use crate::error::{CoursepayError, Result};
use crate::notify::SmtpConfig;

/// Top-level configuration for the coursepay server.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    /// Frontend base URL for post-payment redirects.
    pub frontend_url: String,
    pub notify: NotifySettings,
    pub smtp: Option<SmtpConfig>,
    pub stripe: Option<StripeSettings>,
    pub razorpay: Option<RazorpaySettings>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| CoursepayError::internal(format!("invalid bind address: {e}")))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub from: String,
    pub sales_to: String,
}

#[derive(Clone)]
pub struct StripeSettings {
    pub api_key: SecretString,
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for StripeSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeSettings").finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct RazorpaySettings {
    pub key_id: String,
    pub key_secret: SecretString,
    pub webhook_secret: SecretString,
}

impl std::fmt::Debug for RazorpaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpaySettings")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables. Providers are enabled
    /// only when their full credential set is present.
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env("PORT")
                .map(|p| {
                    p.parse::<u16>()
                        .map_err(|_| CoursepayError::internal(format!("invalid PORT '{p}'")))
                })
                .transpose()?
                .unwrap_or(8000),
        };

        let frontend_url =
            env("FRONTEND_URL").unwrap_or_else(|| "http://localhost:3000".to_string());

        let notify = NotifySettings {
            from: env("NOTIFY_FROM").unwrap_or_else(|| "noreply@localhost".to_string()),
            sales_to: env("NOTIFY_SALES_TO").unwrap_or_else(|| "sales@localhost".to_string()),
        };

        let smtp = env("SMTP_HOST").map(|host| {
            let mut config = SmtpConfig::new(host);
            if let Some(port) = env("SMTP_PORT").and_then(|p| p.parse().ok()) {
                config = config.port(port);
            }
            if let (Some(user), Some(pass)) = (env("SMTP_USERNAME"), env("SMTP_PASSWORD")) {
                config = config.credentials(user, pass);
            }
            config
        });

        let stripe = match (env("STRIPE_API_KEY"), env("STRIPE_WEBHOOK_SECRET")) {
            (Some(api_key), Some(webhook_secret)) => Some(StripeSettings {
                api_key: SecretString::new(api_key),
                webhook_secret: SecretString::new(webhook_secret),
            }),
            (Some(_), None) | (None, Some(_)) => {
                return Err(CoursepayError::internal(
                    "STRIPE_API_KEY and STRIPE_WEBHOOK_SECRET must be set together",
                ));
            }
            (None, None) => None,
        };

        let razorpay = match (
            env("RAZORPAY_KEY_ID"),
            env("RAZORPAY_KEY_SECRET"),
            env("RAZORPAY_WEBHOOK_SECRET"),
        ) {
            (Some(key_id), Some(key_secret), Some(webhook_secret)) => Some(RazorpaySettings {
                key_id,
                key_secret: SecretString::new(key_secret),
                webhook_secret: SecretString::new(webhook_secret),
            }),
            (None, None, None) => None,
            _ => {
                return Err(CoursepayError::internal(
                    "RAZORPAY_KEY_ID, RAZORPAY_KEY_SECRET and RAZORPAY_WEBHOOK_SECRET must be set together",
                ));
            }
        };

        Ok(Self {
            server,
            frontend_url,
            notify,
            smtp,
            stripe,
            razorpay,
        })
    }
}
