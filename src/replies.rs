//! Reply Texts
//!
//! Everything the bot says to users. Errors arrive as structured variants
//! and are turned into text here, always with a hint about what to do next.

use crate::error::{BotError, ExternalFailure, QuotaError, Stage, TransientError, UserError};
use crate::intake::Accepted;
use crate::quota::QuotaStatus;
use crate::session::{FragmentOrigin, SessionSnapshot};
use crate::usage::UsageStats;

pub const WELCOME: &str = "Welcome to the Markdown to PDF bot!\n\n\
    Send your markdown (it can span several messages).\n\
    You can also upload .md / .txt files or send a link to a raw file \
    (GitHub, Gist, GitLab and Bitbucket links are converted automatically).\n\n\
    /convert - build the PDF\n\
    /status - see what you have sent\n\
    /cancel - discard everything";

pub const HELP: &str = "Commands:\n\n\
    /start - start a new document\n\
    /convert - convert what you sent to PDF\n\
    /status - fragments received so far\n\
    /cancel - discard the current document\n\
    /quota - remaining conversions\n\
    /help - this message\n\n\
    Content:\n\
    - Text messages are appended as markdown\n\
    - .md and .txt files are appended as-is\n\
    - A message starting with a URL downloads that link";

pub const CANCELLED: &str = "❌ Cancelled. Use /start to begin again.";

pub const PROCESSING: &str = "⏳ Converting your markdown...";

pub const DONE: &str = "✨ Done! Use /start to convert another document.";

pub const ADMIN_HELP: &str = "Admin commands:\n\n\
    /backup - back up the usage log now\n\
    /stats - usage statistics\n\
    /premium <user_id> - grant unlimited conversions\n\
    /unpremium <user_id> - revoke premium";

/// Acknowledge a new fragment
pub fn accepted(accepted: &Accepted) -> String {
    let what = match accepted.origin {
        FragmentOrigin::TypedText => "Message".to_string(),
        FragmentOrigin::UploadedFile => "File".to_string(),
        FragmentOrigin::FetchedUrl => format!(
            "Content from {}",
            accepted.fetched_from.as_deref().unwrap_or("URL")
        ),
    };
    format!(
        "✅ {} received as fragment #{}.\n\nSend more or use /convert to create the PDF.",
        what, accepted.fragment_count
    )
}

/// Caption attached to the delivered PDF
pub fn pdf_caption(fragment_count: usize) -> String {
    format!(
        "✅ Conversion complete!\n📄 {} fragment{} converted.",
        fragment_count,
        if fragment_count == 1 { "" } else { "s" }
    )
}

/// `/status` output
pub fn session_status(snapshot: Option<&SessionSnapshot>) -> String {
    match snapshot {
        Some(s) if !s.is_empty() => format!(
            "📊 Current document:\n\n\
            📝 Fragments: {}\n\
            📏 Characters: {}\n\n\
            First fragment preview:\n{}\n\n\
            Use /convert to create the PDF or /cancel to discard.",
            s.fragments.len(),
            s.total_chars(),
            s.preview()
        ),
        Some(_) => "Session active but nothing received yet. Send some markdown.".to_string(),
        None => "Nothing received yet. Use /start to begin.".to_string(),
    }
}

/// `/quota` output
pub fn quota_status(status: &QuotaStatus) -> String {
    if status.is_premium {
        return "⭐ Premium: unlimited conversions.".to_string();
    }
    format!(
        "Remaining conversions:\n\n\
        This hour: {}/{} (window resets in {} min)\n\
        Today: {}/{}",
        status.hourly_remaining(),
        status.hourly_limit,
        status.hourly_reset_minutes,
        status.daily_remaining(),
        status.daily_limit
    )
}

/// `/stats` output
pub fn usage_stats(stats: &UsageStats) -> String {
    format!(
        "📈 Usage statistics:\n\n\
        Conversions logged: {}\n\
        Distinct users: {}\n\
        Successful: {}\n\
        Failed: {}\n\
        Premium users: {}",
        stats.total_records, stats.distinct_users, stats.successes, stats.failures, stats.premium_users
    )
}

/// User-facing explanation for any error
pub fn describe_error(err: &BotError) -> String {
    match err {
        BotError::User(e) => describe_user_error(e),
        BotError::Quota(e) => describe_quota_error(e),
        BotError::Transient(e) => describe_transient(e),
        BotError::Cancelled => {
            "🚫 The document was cancelled while converting, so the PDF was discarded.\n\
            Use /start to begin again."
                .to_string()
        }
        BotError::Fatal(_) => "❌ Something went wrong during conversion.\n\
            Your document was discarded; use /start to try again."
            .to_string(),
    }
}

fn describe_user_error(err: &UserError) -> String {
    match err {
        UserError::NoSession => "No document to convert. Use /start to begin.".to_string(),
        UserError::EmptySession => {
            "You haven't sent any markdown yet. Send text, a .md/.txt file or a URL first."
                .to_string()
        }
        UserError::NotStarted => "Use /start to begin a markdown-to-PDF conversion.".to_string(),
        UserError::UnsupportedFileType { name } => format!(
            "❌ {} is not supported. Only .md and .txt files are accepted.",
            name
        ),
        UserError::FileTooLarge { size, max } => format!(
            "❌ File is too large ({} bytes, maximum {}). Split it into smaller files.",
            size, max
        ),
        UserError::NotUtf8 { name } => format!(
            "❌ {} is not UTF-8 text. Save it as UTF-8 and send it again.",
            name
        ),
        UserError::NotAdmin => "This command is only available to administrators.".to_string(),
        UserError::InvalidArgument(detail) => format!("Invalid argument: {}", detail),
    }
}

fn describe_quota_error(err: &QuotaError) -> String {
    match err {
        QuotaError::HourlyExceeded {
            limit,
            minutes_remaining,
        } => format!(
            "⏳ Hourly limit reached ({} conversions per hour).\n\
            Try again in {} minute{}. Your document is kept.",
            limit,
            minutes_remaining,
            if *minutes_remaining == 1 { "" } else { "s" }
        ),
        QuotaError::DailyExceeded { limit } => format!(
            "📅 Daily limit reached ({} conversions per day).\n\
            Try again tomorrow. Your document is kept.",
            limit
        ),
    }
}

fn describe_transient(err: &TransientError) -> String {
    match (err.stage, &err.failure) {
        (Stage::Fetch, ExternalFailure::Timeout { secs }) => format!(
            "⏱️ The URL did not respond within {}s. Try again or send the content directly.",
            secs
        ),
        (Stage::Fetch, ExternalFailure::Connection(_)) => {
            "🔌 Could not connect to that host. Check the link and try again.".to_string()
        }
        (Stage::Fetch, ExternalFailure::HttpStatus { status }) => format!(
            "🌐 The URL returned HTTP {}. Make sure the file is public.",
            status
        ),
        (Stage::Fetch, ExternalFailure::Other(detail)) => {
            format!("❌ Could not get the content: {}", detail)
        }
        (Stage::Render, ExternalFailure::Timeout { secs }) => format!(
            "⏱️ The PDF service did not answer within {}s.\n\
            Your document is kept; send /convert to retry.",
            secs
        ),
        (Stage::Render, ExternalFailure::Connection(_)) => "🔌 The PDF service is unreachable.\n\
            Your document is kept; send /convert again in a moment."
            .to_string(),
        (Stage::Render, ExternalFailure::HttpStatus { status }) => format!(
            "⚠️ The PDF service returned HTTP {}.\n\
            Your document is kept; send /convert to retry.",
            status
        ),
        (Stage::Render, ExternalFailure::Other(detail)) => format!(
            "❌ PDF conversion failed: {}\nYour document is kept; send /convert to retry.",
            detail
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Fragment;

    #[test]
    fn test_every_error_has_next_step() {
        let errors: Vec<BotError> = vec![
            UserError::NoSession.into(),
            UserError::NotStarted.into(),
            QuotaError::DailyExceeded { limit: 15 }.into(),
            TransientError::render(ExternalFailure::Timeout { secs: 30 }).into(),
            BotError::Cancelled,
            BotError::fatal("disk full"),
        ];
        for err in &errors {
            let text = describe_error(err);
            assert!(
                text.contains('/') || text.contains("Try again"),
                "no next step in: {}",
                text
            );
        }
    }

    #[test]
    fn test_fetch_failures_are_distinct() {
        let texts: Vec<String> = [
            ExternalFailure::Timeout { secs: 10 },
            ExternalFailure::Connection("refused".into()),
            ExternalFailure::HttpStatus { status: 404 },
            ExternalFailure::Other("boom".into()),
        ]
        .into_iter()
        .map(|f| describe_error(&TransientError::fetch(f).into()))
        .collect();

        for (i, a) in texts.iter().enumerate() {
            for b in texts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(texts[2].contains("404"));
    }

    #[test]
    fn test_hourly_message_has_minutes() {
        let text = describe_error(
            &QuotaError::HourlyExceeded {
                limit: 3,
                minutes_remaining: 1,
            }
            .into(),
        );
        assert!(text.contains("1 minute."));
    }

    #[test]
    fn test_session_status() {
        assert!(session_status(None).contains("/start"));

        let snapshot = SessionSnapshot {
            generation: 1,
            fragments: vec![
                Fragment::new(FragmentOrigin::TypedText, "# Title"),
                Fragment::new(FragmentOrigin::TypedText, "body"),
            ],
        };
        let text = session_status(Some(&snapshot));
        assert!(text.contains("Fragments: 2"));
        assert!(text.contains("Characters: 11"));
        assert!(text.contains("# Title"));
    }

    #[test]
    fn test_pdf_caption_plural() {
        assert!(pdf_caption(1).contains("1 fragment converted"));
        assert!(pdf_caption(3).contains("3 fragments converted"));
    }
}
