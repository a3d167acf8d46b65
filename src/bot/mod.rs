use crate::logging::{LogFormat, LoggingContext, Sink};
use anyhow::{Context, Result};
use tracing::info;

/// Runs the bot process until a shutdown signal arrives.
pub async fn run(logging: &LoggingContext) -> Result<()> {
    let sinks: Vec<String> = logging.handlers().iter().map(|h| describe(&h.sink)).collect();
    let format = match logging.format() {
        LogFormat::Json => "json",
        LogFormat::Pattern(_) => "pattern",
    };
    info!(
        level = %logging.level(),
        bot_level = %logging.effective_level(module_path!()),
        format,
        handlers = ?sinks,
        "Bot is ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received, stopping bot");
    Ok(())
}

fn describe(sink: &Sink) -> String {
    match sink {
        Sink::Stdout => "stdout".to_string(),
        Sink::Stderr => "stderr".to_string(),
        Sink::File(path) => format!("file:{}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_describe_sinks() {
        assert_eq!(describe(&Sink::Stdout), "stdout");
        assert_eq!(describe(&Sink::Stderr), "stderr");
        assert_eq!(
            describe(&Sink::File(PathBuf::from("/var/log/bot.log"))),
            "file:/var/log/bot.log"
        );
    }
}
