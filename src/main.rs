use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;

use tick_digits::client::{FeedClient, FeedOptions};
use tick_digits::config::{symbol_label, Config, LoggingConfig};
use tick_digits::deriv::{api, RequestCorrelator};
use tick_digits::event::{AppEvent, WsConnectionStatus};
use tick_digits::feed::FeedUpdate;

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn format_distribution(distribution: &[f64; 10]) -> String {
    distribution
        .iter()
        .enumerate()
        .map(|(digit, share)| format!("{}:{:.1}%", digit, share))
        .collect::<Vec<_>>()
        .join(" ")
}

fn pct(value: f64) -> String {
    format!("{:.1}%", value)
}

fn log_stats(update: &FeedUpdate) {
    let stats = &update.stats;
    let last_quote = update.snapshot.ticks.last().map(|t| t.quote);
    let recent: String = stats
        .recent_digits
        .iter()
        .map(|d| if d % 2 == 0 { 'E' } else { 'O' })
        .collect();

    tracing::info!(
        symbol = %update.snapshot.symbol,
        ticks = stats.tick_count,
        decimal_places = stats.decimal_places,
        last_quote = ?last_quote,
        current_digit = ?stats.current_digit,
        distribution = %format_distribution(&stats.distribution),
        most_frequent = ?stats.most_frequent,
        least_frequent = ?stats.least_frequent,
        even = %pct(stats.even_odd.even),
        odd = %pct(stats.even_odd.odd),
        rise = %pct(stats.rise_fall.rise),
        fall = %pct(stats.rise_fall.fall),
        recent = %recent,
        "Digit statistics"
    );
    if let Some(cmp) = stats.comparison {
        tracing::info!(
            reference = cmp.reference,
            over = %pct(cmp.over),
            under = %pct(cmp.under),
            equal = %pct(cmp.equal),
            "Digit comparison"
        );
    }
}

/// Authorization is per socket, so it is repeated on every connect.
async fn run_account_session(
    correlator: Arc<RequestCorrelator>,
    token: String,
    mut status: watch::Receiver<WsConnectionStatus>,
) {
    loop {
        let connected = status.borrow_and_update().is_connected();
        if connected {
            match api::authorize(&correlator, &token).await {
                Ok(account) => {
                    tracing::info!(
                        loginid = %account.loginid,
                        currency = %account.currency,
                        balance = account.balance,
                        demo = account.is_virtual == 1,
                        "Authorized"
                    );
                    match api::balance(&correlator).await {
                        Ok(balance) => tracing::info!(
                            balance = balance.balance,
                            currency = %balance.currency,
                            "Balance"
                        ),
                        Err(e) => tracing::warn!(error = %e, "Balance request failed"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Authorization failed"),
            }
        }
        if status.changed().await.is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Make sure config/default.toml exists and is valid");
            std::process::exit(1);
        }
    };
    init_tracing(&config.logging);

    if let Some(symbol) = std::env::args().nth(1) {
        config.deriv.symbol = symbol;
    }
    if symbol_label(config.deriv.symbol.trim()).is_none() {
        tracing::warn!(symbol = %config.deriv.symbol, "Symbol is not in the known market list");
    }

    let session_config = config.deriv.session_config()?;
    tracing::info!(
        symbol = %config.deriv.symbol,
        market = symbol_label(config.deriv.symbol.trim()).unwrap_or("unknown"),
        tick_count = config.deriv.tick_count,
        "Starting tick-digits"
    );

    let options = FeedOptions::from_config(&config.deriv, &config.analysis);
    let (client, mut events) = FeedClient::start(session_config, options)?;

    let account_task = config.deriv.api_token.clone().map(|token| {
        tokio::spawn(run_account_session(
            client.correlator(),
            token,
            client.connection_status(),
        ))
    });

    let report_every = Duration::from_millis(config.analysis.report_interval_ms.max(100));
    let mut report = tokio::time::interval(report_every);
    let mut latest: Option<FeedUpdate> = None;
    let mut dirty = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(AppEvent::WsStatus(status)) => {
                    tracing::info!(?status, "Connection status changed");
                }
                Some(AppEvent::FeedUpdate(update)) => {
                    latest = Some(update);
                    dirty = true;
                }
                Some(AppEvent::SubscriptionError { symbol, message }) => {
                    tracing::error!(symbol = %symbol, message = %message, "Subscription rejected");
                }
                None => break,
            },
            _ = report.tick() => {
                if let (true, Some(update)) = (dirty, latest.as_ref()) {
                    log_stats(update);
                    dirty = false;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    if let Some(task) = account_task {
        task.abort();
    }
    client.shutdown().await;
    tracing::info!("tick-digits stopped");
    Ok(())
}
