//! TradeDesk 命令行：同步执行一次分析并打印对话与最终建议
//!
//! 用法：tradedesk [query...]；未给出 query 时使用 [app].default_query

use anyhow::Context;
use tradedesk::config::load_config;
use tradedesk::core::RunStatus;
use tradedesk::memory::{Message, Role};
use tradedesk::{observability, OrchestrationContext};

fn render(msg: &Message) -> String {
    match (msg.role, msg.is_routing()) {
        (_, true) => format!("  -> [{}] {}", msg.author, msg.content),
        (Role::User, _) => format!("[user] {}", msg.content),
        (Role::Tool, _) => format!("  [tool:{}] {}", msg.author, msg.content),
        (Role::Agent, _) | (Role::System, _) => format!("[{}] {}", msg.author, msg.content),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let query = if args.is_empty() {
        cfg.app.default_query.clone()
    } else {
        args.join(" ")
    };

    let ctx = OrchestrationContext::from_config(cfg)
        .await
        .context("Failed to initialize orchestration context")?;
    let run = ctx
        .controller()
        .run_sync(&query, "cli")
        .await
        .context("Analysis could not be started")?;

    for msg in run.conversation.messages() {
        println!("{}", render(msg));
    }
    println!();

    if run.status == RunStatus::Failed {
        let detail = run
            .error
            .map(|e| format!("{}: {}", e.kind, e.message))
            .unwrap_or(run.progress_note);
        anyhow::bail!("Analysis failed ({})", detail);
    }

    println!("=== Final recommendation ===");
    println!(
        "{}",
        run.final_result
            .as_deref()
            .unwrap_or("(no agent produced a recommendation)")
    );
    Ok(())
}
