use std::sync::Arc;

use coursepay::app::AppContext;
use coursepay::config::Config;
use coursepay::gateway::{RazorpayGateway, StripeGateway};
use coursepay::notify::{ConsoleMailer, Mailer, NotifyConfig, SmtpMailer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coursepay::init_tracing();

    let config = Config::from_env()?;

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp)?),
        None => {
            tracing::warn!("SMTP_HOST not set, notification emails will only be logged");
            Arc::new(ConsoleMailer)
        }
    };

    let mut builder = AppContext::builder()
        .frontend_url(&config.frontend_url)
        .notify(NotifyConfig::new(
            &config.notify.from,
            &config.notify.sales_to,
        ))
        .mailer(mailer);

    if let Some(stripe) = &config.stripe {
        builder = builder.gateway(Arc::new(StripeGateway::new(
            stripe.api_key.clone(),
            stripe.webhook_secret.clone(),
        )?));
        tracing::info!("stripe gateway enabled");
    }
    if let Some(razorpay) = &config.razorpay {
        builder = builder.gateway(Arc::new(RazorpayGateway::new(
            razorpay.key_id.clone(),
            razorpay.key_secret.clone(),
            razorpay.webhook_secret.clone(),
        )?));
        tracing::info!("razorpay gateway enabled");
    }
    if config.stripe.is_none() && config.razorpay.is_none() {
        tracing::warn!("no payment gateway configured, checkout endpoints will reject requests");
    }

    let ctx = builder.build()?;
    let app = coursepay::http::router(ctx);

    let addr = config.server.socket_addr()?;
    tracing::info!(%addr, "coursepay server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
