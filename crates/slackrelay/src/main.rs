use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use slackrelay::config::{Config, Secrets};
use slackrelay::delay::DelayPolicy;
use slackrelay::delivery::{Dispatcher, SlackWebClient};
use slackrelay::event::MentionToken;
use slackrelay::filter::FilterPolicy;
use slackrelay::llm::{CompletionClient, OpenAICompatibleProvider, RateLimiter, RetryPolicy};
use slackrelay::relay::{RelayEngine, RelaySettings};
use slackrelay::server::{AppState, build_app};

#[derive(Parser)]
#[command(name = "slackrelay", version, about = "Relay Slack events to a completion service")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "SLACKRELAY_CONFIG", default_value = "slackrelay.yaml")]
    config: PathBuf,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    let secrets = Secrets::from_env()?;
    if secrets.completion_api_key.is_none() {
        warn!("OPENAI_API_KEY not set; completion calls will be unauthenticated");
    }

    let slack_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.slack.request_timeout_seconds))
        .build()?;
    let slack = Arc::new(SlackWebClient::new(
        slack_http,
        config.slack.api_base.clone(),
        secrets.slack_bot_token.clone(),
    ));

    let bot_user_id = match config.slack.bot_user_id.clone() {
        Some(id) => id,
        None => {
            let id = slack
                .auth_test()
                .await
                .context("resolving bot user id with auth.test")?;
            info!(bot_user_id = %id, "Resolved bot user id");
            id
        }
    };

    let provider = Arc::new(OpenAICompatibleProvider::new(
        reqwest::Client::new(),
        config.completion.base_url.clone(),
        secrets.completion_api_key.clone(),
    ));
    let completion = CompletionClient::new(
        provider,
        Arc::new(RateLimiter::new(config.completion.min_interval())),
        config.completion.model.clone(),
        config.completion.temperature,
        RetryPolicy::from(&config.completion),
    );
    let dispatcher = Dispatcher::new(
        slack,
        config.slack.fallback_text.clone(),
        config.slack.thread_replies,
    );
    let settings = RelaySettings {
        filter: FilterPolicy {
            mention_gating: config.slack.mention_gating,
            mention: MentionToken::for_user(&bot_user_id),
        },
        delay: DelayPolicy::from(&config.delay),
        system_prompt: config.completion.system_prompt.clone(),
        max_tokens: config.completion.max_tokens,
        dedup_ttl: Duration::from_secs(config.slack.dedup_ttl_seconds),
    };
    let relay = Arc::new(RelayEngine::new(settings, completion, dispatcher));

    let state = AppState {
        relay: relay.clone(),
        challenge_format: config.slack.challenge_response,
    };
    let app = build_app(state, config.server.request_timeout_seconds);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        %addr,
        model = %config.completion.model,
        mention_gating = config.slack.mention_gating,
        "slackrelay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    if !relay.shutdown(grace).await {
        warn!(
            pending = relay.in_flight(),
            "Shutdown grace period elapsed with relays still in flight"
        );
    }
    info!("slackrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
