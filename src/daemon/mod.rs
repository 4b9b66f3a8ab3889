//! Component wiring.
//!
//! Three supervised components: the liveness gateway, the history poll loop
//! and the Telegram command listener (whose messages drain into a worker).
//! Supervisors restart a dead component with doubling backoff; ctrl-c aborts
//! everything.

use crate::bridge::{self, Bridge, BridgeState};
use crate::channels::{self, Channel, GreenApiClient, TelegramChannel};
use crate::config::Config;
use crate::gateway::{self, AppState};
use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Destination-chat messages waiting for the command worker.
const COMMAND_QUEUE_DEPTH: usize = 32;

pub async fn run(config: Config) -> Result<()> {
    let initial_backoff = config.reliability.initial_backoff_secs.max(1);
    let max_backoff = config.reliability.max_backoff_secs.max(initial_backoff);

    crate::health::mark_component_ok("daemon");

    let state = Arc::new(BridgeState::new(&config.bridge));
    let telegram = Arc::new(
        TelegramChannel::new(
            config.telegram.bot_token.clone(),
            config.telegram.chat_id.clone(),
        )
        .with_api_base(config.telegram.api_base.clone()),
    );
    let green = Arc::new(GreenApiClient::new(
        config.green_api.api_url.clone(),
        config.green_api.id_instance.clone(),
        config.green_api.api_token.clone(),
    ));

    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    {
        let host = config.gateway.host.clone();
        let port = config.gateway.port;
        let app_state = AppState {
            bridge: Arc::clone(&state),
        };
        handles.push(spawn_component_supervisor(
            "gateway",
            initial_backoff,
            max_backoff,
            move || {
                let host = host.clone();
                let app_state = app_state.clone();
                async move { gateway::run_gateway(&host, port, app_state).await }
            },
        ));
    }

    {
        let green = Arc::clone(&green);
        let telegram = Arc::clone(&telegram);
        let state = Arc::clone(&state);
        let bridge_cfg = config.bridge.clone();
        let source_chat = config.green_api.source_chat.clone();
        handles.push(spawn_component_supervisor(
            "bridge",
            initial_backoff,
            max_backoff,
            move || {
                let bridge = Bridge::new(
                    Arc::clone(&green),
                    Arc::clone(&telegram),
                    Arc::clone(&state),
                    bridge_cfg.clone(),
                    source_chat.clone(),
                );
                async move { bridge.run().await }
            },
        ));
    }

    {
        let (tx, rx) = tokio::sync::mpsc::channel(COMMAND_QUEUE_DEPTH);
        handles.push(channels::spawn_supervised_listener(
            Arc::clone(&telegram) as Arc<dyn Channel>,
            tx,
            initial_backoff,
            max_backoff,
        ));

        let state = Arc::clone(&state);
        let telegram = Arc::clone(&telegram);
        let bridge_cfg = config.bridge.clone();
        handles.push(tokio::spawn(async move {
            crate::health::mark_component_ok("commands");
            if let Err(e) = bridge::run_command_worker(rx, state, telegram, bridge_cfg).await {
                crate::health::mark_component_error("commands", e.to_string());
                tracing::error!("Command worker stopped: {e}");
            }
        }));
    }

    println!("wabridge daemon started");
    println!(
        "   Gateway:  http://{}:{}",
        config.gateway.host, config.gateway.port
    );
    println!(
        "   Bridge:   {} -> telegram chat {}",
        config.green_api.source_chat, config.telegram.chat_id
    );
    println!("   Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    crate::health::mark_component_error("daemon", "shutdown requested");

    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}

fn spawn_component_supervisor<F, Fut>(
    name: &'static str,
    initial_backoff_secs: u64,
    max_backoff_secs: u64,
    make_component: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut backoff = initial_backoff_secs.max(1);
        let max_backoff = max_backoff_secs.max(backoff);

        loop {
            crate::health::mark_component_ok(name);
            match make_component().await {
                Ok(()) => {
                    tracing::warn!("Component {name} exited unexpectedly; restarting");
                    crate::health::mark_component_error(name, "exited unexpectedly");
                    // Clean exit resets backoff: the component ran successfully.
                    backoff = initial_backoff_secs.max(1);
                }
                Err(e) => {
                    tracing::error!("Component {name} error: {e}; restarting");
                    crate::health::mark_component_error(name, e.to_string());
                }
            }

            crate::health::bump_component_restart(name);
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff = backoff.saturating_mul(2).min(max_backoff);
        }
    })
}
