//! slackircd - local IRC gateway to a Slack or Rocket.Chat workspace.

use slackirc::Gateway;
use slackirc::config::{Config, validate};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SLACKIRC_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Cancel `token` on SIGINT, SIGTERM or SIGHUP.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let (Ok(mut term), Ok(mut hup)) =
                (signal(SignalKind::terminate()), signal(SignalKind::hangup()))
            else {
                warn!("unable to install signal handlers, only ctrl-c will stop the gateway");
                let _ = tokio::signal::ctrl_c().await;
                token.cancel();
                return;
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = term.recv() => info!("received SIGTERM"),
                _ = hup.recv() => info!("received SIGHUP"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c");
        }
        token.cancel();
    });
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "slackirc.toml".to_string());

    let mut config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path, error = %e, "failed to load config");
            e
        })?
    } else {
        info!(path = %config_path, "no config file, using defaults and environment");
        Config::default()
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    let credentials = config.credentials()?;

    if let Err(errors) = validate(&config, &credentials) {
        for e in &errors {
            error!(error = %e, "invalid configuration");
        }
        anyhow::bail!("{} configuration error(s)", errors.len());
    }

    info!(
        listen = %config.listen.address,
        backend = ?config.backend.kind,
        autojoin = config.gateway.autojoin,
        "starting slackircd"
    );

    let backend = slackirc::backend::from_config(&config.backend)?;
    let gateway = Gateway::bind(config, credentials, backend).await?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    gateway.run(shutdown).await
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "slackircd stopped");
            ExitCode::FAILURE
        }
    }
}
