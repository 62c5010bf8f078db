use defi_fund_manager::{
    advisor::Advisor,
    config::Settings,
    memory::DEFAULT_SESSION_ID,
    models::TurnRequest,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXIT_COMMANDS: &[&str] = &["q", "exit", "quit", "退出"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so answers stay readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env()?;
    let advisor = Advisor::from_settings(&settings).await?;
    info!("DeFi fund manager starting");

    println!("🤖 DeFi 智能理财顾问已启动 (输入 q / exit / quit / 退出 结束)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all("\n👤 你: ".as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if EXIT_COMMANDS.contains(&text.to_lowercase().as_str()) {
            println!("👋 再见！");
            break;
        }

        let response = advisor
            .handle_turn(TurnRequest {
                session_id: Some(DEFAULT_SESSION_ID.to_string()),
                text: text.to_string(),
            })
            .await;

        println!("\n🤖 顾问: {}", response.answer);
        if response.transaction.is_some() {
            println!("\n📝 交易已生成，请在钱包中确认签名。");
        }
    }

    Ok(())
}
