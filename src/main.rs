//! Lesson Relay service binary.
//!
//! Wires Redis, the realtime hub and the budget gate behind one axum server:
//! `GET /ws` for client sockets, `/ops/*` for operators.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use lesson_relay::adapters::{
    ops_router, websocket_router, ChannelConnectionSink, OpsAppState, RedisBroker,
    RedisBudgetSettings, RedisUsageLedger, WebSocketState,
};
use lesson_relay::application::{BudgetGate, RealtimeHub};
use lesson_relay::config::{AppConfig, ServerConfig};
use lesson_relay::domain::resilience::BreakerRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.server);

    let instance_id = config.server.instance_id();
    let prefix = config.redis.channel_prefix.clone();
    let redis_timeout = config.redis.connect_timeout();

    let client = redis::Client::open(config.redis.url.as_str()).context("invalid redis url")?;
    let connecting = RedisBroker::connect(client.clone(), prefix.clone());
    let broker = tokio::time::timeout(redis_timeout, connecting)
        .await
        .context("timed out connecting broker to redis")??;
    let broker = Arc::new(broker);
    let ledger_conn = tokio::time::timeout(redis_timeout, client.get_multiplexed_tokio_connection())
        .await
        .context("timed out connecting ledger to redis")??;

    let sink = Arc::new(ChannelConnectionSink::new());
    let hub = RealtimeHub::new_shared(instance_id.clone(), broker.clone(), sink.clone());
    hub.register(broker.as_ref()).await.context("failed to subscribe hub")?;

    let breakers = Arc::new(BreakerRegistry::new(config.resilience.breaker_config()));
    let gate = BudgetGate::new(
        Arc::new(RedisUsageLedger::new(ledger_conn.clone(), prefix.clone())),
        Arc::new(RedisBudgetSettings::new(ledger_conn, prefix)),
        breakers,
        broker.clone(),
    )
    .with_unit_rates(config.budget.unit_rates()?)
    .with_retry_policy(config.resilience.retry_policy())
    .with_defaults(config.budget.defaults());

    let ws_state = WebSocketState::new(hub.clone(), sink, config.realtime.outbound_buffer);
    let ops_state = OpsAppState {
        gate: Arc::new(gate),
        hub,
    };

    let app = Router::new()
        .merge(websocket_router().with_state(ws_state))
        .nest("/ops", ops_router().with_state(ops_state))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(
        %addr,
        instance_id = %instance_id,
        environment = ?config.server.environment,
        "lesson relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    broker.shutdown().await;
    tracing::info!("lesson relay stopped");
    Ok(())
}

fn init_tracing(server: &ServerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&server.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if server.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
}
