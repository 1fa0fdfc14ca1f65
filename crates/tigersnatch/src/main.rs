use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tigersnatch::config::{Credentials, SnatchConfig};
use tigersnatch::db::{LogLimits, SqliteStore, Store};
use tigersnatch::dispatch::CycleRunner;
use tigersnatch::monitor::Monitor;
use tigersnatch::notify::{
    Mailer, MessageLinks, SendGridMailer, Texter, Throttle, ThrottlePolicy, TwilioAccount,
    TwilioTexter,
};
use tigersnatch::schedule::{self, NotifScheduler, SchedulerSettings};
use tigersnatch::server::create_router;
use tigersnatch::source::{StudentAppClient, StudentAppConfig};
use tigersnatch::types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SnatchConfig::load_from_env().context("loading configuration")?;
    let credentials = Credentials::from_env();
    let tz = config.local_zone()?;
    let workers = config.dispatch_workers();

    let store: Arc<dyn Store> = Arc::new(
        SqliteStore::open(
            &config.db_path,
            LogLimits {
                max_admin_logs: config.max_admin_log_length,
                max_user_logs: config.max_user_log_length,
                ..LogLimits::default()
            },
        )
        .context("opening database")?,
    );

    let (Some(consumer_key), Some(consumer_secret)) =
        (credentials.consumer_key.clone(), credentials.consumer_secret.clone())
    else {
        anyhow::bail!("CONSUMER_KEY and CONSUMER_SECRET must be set");
    };
    let seats = Arc::new(StudentAppClient::new(StudentAppConfig {
        base_url: config.student_app_url.clone(),
        token_url: config.token_url.clone(),
        consumer_key,
        consumer_secret,
        request_timeout: Duration::from_secs(30),
    })?);

    if credentials.sendgrid_api_key.is_none() {
        warn!("SENDGRID_API_KEY not set, emails will fail");
    }
    let mailer: Arc<dyn Mailer> = Arc::new(SendGridMailer::new(
        credentials.sendgrid_api_key.clone(),
        &config.from_email,
    )?);

    let twilio = match (
        credentials.twilio_sid.clone(),
        credentials.twilio_token.clone(),
        credentials.twilio_phone.clone(),
    ) {
        (Some(sid), Some(token), Some(from_phone)) => Some(TwilioAccount {
            sid,
            token,
            from_phone,
        }),
        _ => {
            warn!("Twilio credentials not set, texts will fail");
            None
        }
    };
    let texter: Arc<dyn Texter> = Arc::new(TwilioTexter::new(twilio)?);

    let runner = Arc::new(CycleRunner::new(
        store.clone(),
        Monitor::new(store.clone(), seats, config.seat_batch_size, workers),
        Throttle::new(
            store.clone(),
            ThrottlePolicy {
                max_auto_resub_notifs: config.max_auto_resub_notifs,
                min_notifs_delay: chrono::Duration::minutes(config.min_notifs_delay_mins),
                jitter: chrono::Duration::minutes(config.notif_jitter_mins),
            },
        ),
        mailer.clone(),
        texter,
        MessageLinks::new(&config.site_url),
        workers,
    ));

    let scheduler = Arc::new(NotifScheduler::new(
        store.clone(),
        runner.clone(),
        schedule::source_from_config(&config, tz)?,
        Some(mailer),
        SchedulerSettings {
            interval: config.notifs_interval(),
            poll_interval: config.schedule_poll_interval(),
            tz,
            admin_emails: config.admin_emails.clone(),
        },
    ));

    let shutdown = CancellationToken::new();
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown.clone()));

    let app_state = Arc::new(AppState {
        store,
        runner,
        scheduler,
    });
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!(address = %config.bind_address, "Serving operator API");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, create_router(app_state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
            info!("Shutdown requested");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    scheduler_task.await?;
    Ok(())
}
