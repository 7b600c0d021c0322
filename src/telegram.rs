//! Telegram Bot integration for the markdown-to-PDF converter
//!
//! Collects markdown from text messages, `.md`/`.txt` uploads and URLs,
//! then hands the session to the converter on `/convert`.
//!
//! Features:
//! - Per-user sessions with `/start`, `/cancel`, `/status`
//! - Free-tier quotas with premium bypass
//! - Usage log with periodic backups and admin statistics
//!
//! Uses explicit Dispatcher pattern for reliable message polling. Updates
//! from one chat are handled in order, except `/cancel`, which bypasses the
//! chat queue so it never waits behind a running fetch or conversion.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    net::Download,
    prelude::*,
    types::{ChatAction, Document, InputFile, Update, UpdateKind},
};

use crate::config::Config;
use crate::converter::{Converter, Outbox, UserIdentity, OUTPUT_FILE_NAME};
use crate::error::{BotError, UserError};
use crate::fetcher::HttpFetcher;
use crate::intake::Intake;
use crate::pdf_service::HttpPdfBackend;
use crate::quota::QuotaLedger;
use crate::replies;
use crate::session::SessionStore;
use crate::usage::{self, UsageStore};

/// How often idle sessions and unused convert locks are swept
const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Shared state for all handlers
struct BotData {
    config: Config,
    sessions: Arc<SessionStore>,
    quota: Arc<QuotaLedger>,
    intake: Intake,
    converter: Converter,
    usage_store: Arc<UsageStore>,
}

/// Delivers finished PDFs into a chat
struct TelegramOutbox {
    bot: Bot,
    chat_id: ChatId,
}

#[async_trait]
impl Outbox for TelegramOutbox {
    async fn deliver_pdf(&self, pdf: &Path, fragment_count: usize) -> Result<()> {
        self.bot
            .send_chat_action(self.chat_id, ChatAction::UploadDocument)
            .await?;
        self.bot
            .send_document(
                self.chat_id,
                InputFile::file(pdf.to_path_buf()).file_name(OUTPUT_FILE_NAME),
            )
            .caption(replies::pdf_caption(fragment_count))
            .await?;
        Ok(())
    }
}

pub async fn run_telegram_bot(config: Config) -> Result<()> {
    tracing::info!("===========================================");
    tracing::info!("  Markdown to PDF bot - Starting...");
    tracing::info!("===========================================");
    tracing::info!("PDF service: {} (timeout {}s)", config.pdf_service_url, config.pdf_timeout_secs);
    tracing::info!("Fetch timeout: {}s", config.fetch_timeout_secs);
    tracing::info!(
        "Limits: {}/hour, {}/day",
        config.quota.hourly_limit,
        config.quota.daily_limit
    );
    tracing::info!("Usage database: {:?}", config.usage_db_path);
    tracing::info!("Admins: {:?}", config.admin_ids);

    let usage_store = Arc::new(UsageStore::open(&config.usage_db_path)?);
    let (usage_tx, _recorder) = usage::spawn_recorder(Arc::clone(&usage_store));

    let quota = Arc::new(QuotaLedger::new(config.quota));
    for user_id in &config.premium_ids {
        quota.set_premium(*user_id, true);
    }
    if !config.premium_ids.is_empty() {
        tracing::info!("Premium users: {:?}", config.premium_ids);
    }

    let sessions = Arc::new(SessionStore::new());
    let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout_secs, config.max_upload_bytes)?);
    let backend = Arc::new(HttpPdfBackend::new(&config.pdf_service_url, config.pdf_timeout_secs)?);

    let intake = Intake::new(Arc::clone(&sessions), fetcher, config.max_upload_bytes);
    let converter = Converter::new(Arc::clone(&sessions), Arc::clone(&quota), backend, usage_tx);

    let bot = Bot::new(config.telegram_token.clone());

    // Verify bot token by calling getMe
    tracing::info!("Verifying bot token...");
    match bot.get_me().await {
        Ok(me) => {
            tracing::info!(
                "Bot authenticated: @{} (ID: {})",
                me.username.as_deref().unwrap_or("unknown"),
                me.id
            );
        }
        Err(e) => {
            tracing::error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    }

    // Delete any existing webhook to ensure polling works
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    if config.auto_backup {
        usage::spawn_auto_backup(
            Arc::clone(&usage_store),
            config.backup_dir.clone(),
            config.backup_interval(),
            config.backup_keep,
        );
    } else {
        tracing::info!("Auto-backup disabled");
    }

    let handler_data = Arc::new(BotData {
        config,
        sessions,
        quota,
        intake,
        converter,
        usage_store,
    });

    spawn_sweeper(Arc::clone(&handler_data));

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![handler_data])
        .distribution_function(distribution_key)
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped");
    Ok(())
}

/// Drop abandoned sessions and unused convert locks
fn spawn_sweeper(data: Arc<BotData>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let purged = data.sessions.purge_idle(data.config.session_idle()).await;
            let locks = data.converter.prune_locks();
            if purged > 0 || locks > 0 {
                tracing::info!("Swept {} idle sessions, {} convert locks", purged, locks);
            }
        }
    });
}

/// Per-chat ordering key. `/cancel` gets no key so it is not queued
/// behind whatever the chat is currently doing.
fn distribution_key(upd: &Update) -> Option<ChatId> {
    if let UpdateKind::Message(msg) = &upd.kind {
        if msg.text().map(is_cancel).unwrap_or(false) {
            return None;
        }
    }
    upd.chat().map(|chat| chat.id)
}

/// Split `/cmd@botname args` into `("/cmd", "args")`
pub(crate) fn parse_command(text: &str) -> (&str, &str) {
    let parts: Vec<&str> = text.trim().splitn(2, char::is_whitespace).collect();
    let cmd = parts[0].split('@').next().unwrap_or(parts[0]);
    let args = parts.get(1).map(|a| a.trim()).unwrap_or("");
    (cmd, args)
}

pub(crate) fn is_cancel(text: &str) -> bool {
    text.trim_start().starts_with('/') && parse_command(text).0 == "/cancel"
}

/// Parse the single user id argument of an admin command
pub(crate) fn parse_user_arg(args: &str) -> Result<i64, UserError> {
    let arg = args.split_whitespace().next().ok_or_else(|| {
        UserError::InvalidArgument("expected a numeric user id".to_string())
    })?;
    arg.parse()
        .map_err(|_| UserError::InvalidArgument(format!("'{}' is not a user id", arg)))
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, data: Arc<BotData>) -> ResponseResult<()> {
    let user_id = msg.from.as_ref().map(|u| u.id.0).unwrap_or(0);
    let chat_id = msg.chat.id.0;
    let text_preview = msg
        .text()
        .unwrap_or("<non-text>")
        .chars()
        .take(50)
        .collect::<String>();

    tracing::info!(
        ">>> Message received: user={}, chat={}, text={:?}",
        user_id,
        chat_id,
        text_preview
    );

    if let Err(e) = handle_message(bot, msg, data).await {
        tracing::error!("Error handling message: {:#}", e);
    }

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, data: Arc<BotData>) -> Result<()> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let user = UserIdentity::new(from.id.0 as i64, from.username.clone(), from.first_name.clone());
    let chat_id = msg.chat.id;

    if let Some(text) = msg.text() {
        return handle_text(&bot, chat_id, &data, text, &user).await;
    }

    if let Some(doc) = msg.document() {
        return handle_document(&bot, chat_id, &data, doc, &user).await;
    }

    bot.send_message(
        chat_id,
        "I can only use text messages, .md/.txt files and links to raw markdown.",
    )
    .await?;
    Ok(())
}

async fn handle_text(
    bot: &Bot,
    chat_id: ChatId,
    data: &BotData,
    text: &str,
    user: &UserIdentity,
) -> Result<()> {
    if text.trim_start().starts_with('/') {
        return handle_command(bot, chat_id, data, text, user).await;
    }

    match data.intake.submit_text(user.id, text).await {
        Ok(accepted) => {
            tracing::debug!(
                "Fragment {} from user {} ({}, {} bytes)",
                accepted.fragment_count,
                user.id,
                accepted.origin.as_str(),
                accepted.bytes
            );
            bot.send_message(chat_id, replies::accepted(&accepted)).await?;
        }
        Err(e) => {
            tracing::warn!("Rejected text from user {}: {}", user.id, e);
            bot.send_message(chat_id, replies::describe_error(&e)).await?;
        }
    }
    Ok(())
}

async fn handle_document(
    bot: &Bot,
    chat_id: ChatId,
    data: &BotData,
    doc: &Document,
    user: &UserIdentity,
) -> Result<()> {
    let file_name = doc.file_name.clone().unwrap_or_else(|| "file".to_string());
    let size = u64::from(doc.file.size);

    let download = async {
        let file = bot.get_file(&doc.file.id).await?;
        let mut dst: Vec<u8> = Vec::new();
        bot.download_file(&file.path, &mut dst).await?;
        anyhow::Ok(dst)
    };

    match data.intake.submit_file(user.id, &file_name, size, download).await {
        Ok(accepted) => {
            tracing::info!(
                "File {} accepted from user {} as fragment {}",
                file_name,
                user.id,
                accepted.fragment_count
            );
            bot.send_message(chat_id, replies::accepted(&accepted)).await?;
        }
        Err(e) => {
            tracing::warn!("Rejected file {} from user {}: {}", file_name, user.id, e);
            bot.send_message(chat_id, replies::describe_error(&e)).await?;
        }
    }
    Ok(())
}

async fn handle_command(
    bot: &Bot,
    chat_id: ChatId,
    data: &BotData,
    text: &str,
    user: &UserIdentity,
) -> Result<()> {
    let (cmd, args) = parse_command(text);

    match cmd {
        "/start" => {
            data.sessions.start(user.id).await;
            tracing::info!("Session started for user {}", user.id);
            bot.send_message(chat_id, replies::WELCOME).await?;
        }

        "/cancel" => {
            if data.sessions.cancel(user.id).await {
                tracing::info!("Session cancelled for user {}", user.id);
            }
            bot.send_message(chat_id, replies::CANCELLED).await?;
        }

        "/convert" => {
            handle_convert(bot, chat_id, data, user).await?;
        }

        "/status" => {
            let snapshot = data.sessions.snapshot(user.id).await;
            bot.send_message(chat_id, replies::session_status(snapshot.as_ref()))
                .await?;
        }

        "/quota" => {
            let status = data.quota.status(user.id);
            bot.send_message(chat_id, replies::quota_status(&status)).await?;
        }

        "/help" => {
            let mut help = replies::HELP.to_string();
            if data.config.is_admin(user.id) {
                help.push_str("\n\n");
                help.push_str(replies::ADMIN_HELP);
            }
            bot.send_message(chat_id, help).await?;
        }

        "/backup" | "/stats" | "/premium" | "/unpremium" => {
            let reply = match handle_admin(data, cmd, args, user).await {
                Ok(reply) => reply,
                Err(e) => replies::describe_error(&e),
            };
            bot.send_message(chat_id, reply).await?;
        }

        _ => {
            bot.send_message(chat_id, "Unknown command. Use /help to see what I can do.")
                .await?;
        }
    }

    Ok(())
}

async fn handle_convert(
    bot: &Bot,
    chat_id: ChatId,
    data: &BotData,
    user: &UserIdentity,
) -> Result<()> {
    if let Err(e) = data.converter.precheck(user.id).await {
        bot.send_message(chat_id, replies::describe_error(&e)).await?;
        return Ok(());
    }

    let progress = bot.send_message(chat_id, replies::PROCESSING).await?;

    let outbox = TelegramOutbox {
        bot: bot.clone(),
        chat_id,
    };
    let result = data.converter.convert(user, &outbox).await;

    if let Err(e) = bot.delete_message(chat_id, progress.id).await {
        tracing::debug!("Failed to delete progress message: {}", e);
    }

    match result {
        Ok(report) => {
            tracing::info!(
                "Delivered PDF to user {}: {} fragments, {} bytes in, {} bytes out",
                user.id,
                report.fragment_count,
                report.input_length,
                report.pdf_bytes
            );
            bot.send_message(chat_id, replies::DONE).await?;
        }
        Err(e) => {
            bot.send_message(chat_id, replies::describe_error(&e)).await?;
        }
    }
    Ok(())
}

async fn handle_admin(
    data: &BotData,
    cmd: &str,
    args: &str,
    user: &UserIdentity,
) -> Result<String, BotError> {
    if !data.config.is_admin(user.id) {
        tracing::warn!("Non-admin {} tried {}", user.id, cmd);
        return Err(UserError::NotAdmin.into());
    }

    match cmd {
        "/backup" => {
            let path = usage::run_backup(
                Arc::clone(&data.usage_store),
                data.config.backup_dir.clone(),
                data.config.backup_keep,
            )
            .await
            .map_err(|e| BotError::fatal(format!("backup failed: {:#}", e)))?;
            Ok(format!("💾 Backup written to {}", path.display()))
        }
        "/stats" => {
            let stats = data
                .usage_store
                .stats()
                .map_err(|e| BotError::fatal(format!("stats failed: {:#}", e)))?;
            Ok(format!(
                "{}\nActive sessions: {}",
                replies::usage_stats(&stats),
                data.sessions.active_count().await
            ))
        }
        "/premium" => {
            let target = parse_user_arg(args)?;
            data.quota.set_premium(target, true);
            tracing::info!("Admin {} granted premium to {}", user.id, target);
            Ok(format!("⭐ User {} is now premium.", target))
        }
        "/unpremium" => {
            let target = parse_user_arg(args)?;
            data.quota.set_premium(target, false);
            tracing::info!("Admin {} revoked premium from {}", user.id, target);
            Ok(format!("User {} is back on the free tier.", target))
        }
        other => Err(UserError::InvalidArgument(format!("unknown admin command {}", other)).into()),
    }
}
