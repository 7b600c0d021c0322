//! Markdown to PDF Telegram Bot - Entry Point

use mdpdf_bot::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Markdown to PDF bot v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: mdpdf-bot");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN        Telegram bot token (required)");
        println!("  PDF_SERVICE_URL           Conversion endpoint (default: http://localhost:8000/convert)");
        println!("  PDF_SERVICE_TIMEOUT_SECS  PDF service timeout (default: 30)");
        println!("  FETCH_TIMEOUT_SECS        URL fetch timeout (default: 10)");
        println!("  DAILY_LIMIT               Conversions per day (default: 15)");
        println!("  HOURLY_LIMIT              Conversions per hour (default: 3)");
        println!("  PREMIUM_USER_IDS          Comma-separated premium users");
        println!("  ADMIN_USER_IDS            Comma-separated admins");
        println!("  USAGE_DB_PATH             Usage log database");
        println!("  BACKUP_DIR                Usage log backup directory");
        println!("  AUTO_BACKUP_ENABLED       Periodic backups (default: true)");
        println!("  BACKUP_INTERVAL_HOURS     Hours between backups (default: 24)");
        println!("  BACKUP_KEEP               Backups to keep (default: 7)");
        println!("  MAX_UPLOAD_BYTES          Upload / fetch size limit (default: 1048576)");
        println!("  SESSION_IDLE_HOURS        Drop sessions idle this long (default: 24)");
        println!("  RUST_LOG                  trace|debug|info|warn|error (default: info)");
        println!("  LOG_FORMAT                'json' for JSON logs");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Markdown to PDF bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    mdpdf_bot::telegram::run_telegram_bot(config).await?;

    Ok(())
}
