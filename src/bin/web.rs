//! TradeDesk HTTP 服务
//!
//! 启动: cargo run --bin tradedesk-web
//! 端口：[web].port，或环境变量 TRADEDESK_WEB_PORT

#![cfg(feature = "web")]

use std::sync::Arc;

use anyhow::Context;
use tradedesk::config::load_config;
use tradedesk::{observability, web, OrchestrationContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let host = cfg.web.host.clone();
    let port = cfg.web.port;

    let ctx = OrchestrationContext::from_config(cfg)
        .await
        .context("Failed to initialize orchestration context")?;
    let app = web::router(Arc::new(ctx));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;
    tracing::info!("TradeDesk API: http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Received Ctrl+C, shutting down");
        })
        .await?;

    Ok(())
}
