use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

mod bot;
mod config;
mod logging;

const APP_NAME: &str = "bot-bootstrap";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    /// Minimum log level, overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,
}

fn get_config_path(args: &Args) -> Option<String> {
    find_config_path(args, |key| std::env::var(key).ok(), dirs::home_dir())
}

/// Looks for the config in order: `--config`, `CONFIG_FILE`, then an existing
/// `config.toml` under `$XDG_CONFIG_HOME` or `~/.config`.
fn find_config_path(
    args: &Args,
    env: impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Some(path) = env("CONFIG_FILE") {
        return Some(path);
    }

    env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .into_iter()
        .chain(home.map(|home| home.join(".config")))
        .map(|dir| dir.join(APP_NAME).join(CONFIG_FILE_NAME))
        .find(|path| path.exists())
        .map(|path| path.display().to_string())
}

fn apply_args(args: &Args, mut config: config::Config) -> config::Config {
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = get_config_path(&args);
    let config = match &config_path {
        Some(path) => config::Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => config::Config::default(),
    };
    let config = apply_args(&args, config);

    let logging = logging::LoggingContext::new(config.logging)
        .context("Invalid logging configuration")?;
    logging.install().context("Failed to initialize logging")?;

    info!("Starting {}...", APP_NAME);
    match &config_path {
        Some(path) => info!("Loaded config from: {}", path),
        None => info!("No config file found, using default logging configuration"),
    }

    bot::run(&logging).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{HandlerConfig, HandlerKind, LoggingContext};
    use std::{collections::HashMap, path::Path};
    use tracing::debug;
    use tracing_subscriber::filter::LevelFilter;

    fn write_config(dir: &Path) -> String {
        let path = dir.join(APP_NAME).join(CONFIG_FILE_NAME);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "").unwrap();
        path.display().to_string()
    }

    fn lookup(vars: HashMap<&'static str, String>) -> impl Fn(&str) -> Option<String> {
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_args() {
        let args = Args::parse_from([APP_NAME, "--config", "/etc/bot.toml", "-l", "debug"]);
        assert_eq!(args.config.as_deref(), Some("/etc/bot.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));

        let args = Args::parse_from([APP_NAME]);
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_config_discovery_order() {
        let xdg = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let xdg_config = write_config(xdg.path());
        let home_config = write_config(&home.path().join(".config"));
        let no_args = Args::parse_from([APP_NAME]);
        let home_dir = || Some(home.path().to_path_buf());

        let flag = Args::parse_from([APP_NAME, "-c", "/etc/bot.toml"]);
        let all_env = HashMap::from([
            ("CONFIG_FILE", "/srv/bot.toml".to_string()),
            ("XDG_CONFIG_HOME", xdg.path().display().to_string()),
        ]);
        assert_eq!(
            find_config_path(&flag, lookup(all_env.clone()), home_dir()).as_deref(),
            Some("/etc/bot.toml")
        );
        assert_eq!(
            find_config_path(&no_args, lookup(all_env), home_dir()).as_deref(),
            Some("/srv/bot.toml")
        );

        let xdg_env = HashMap::from([("XDG_CONFIG_HOME", xdg.path().display().to_string())]);
        assert_eq!(
            find_config_path(&no_args, lookup(xdg_env), home_dir()),
            Some(xdg_config)
        );

        assert_eq!(
            find_config_path(&no_args, lookup(HashMap::new()), home_dir()),
            Some(home_config.clone())
        );

        let empty_xdg = tempfile::tempdir().unwrap();
        let empty_env =
            HashMap::from([("XDG_CONFIG_HOME", empty_xdg.path().display().to_string())]);
        assert_eq!(
            find_config_path(&no_args, lookup(empty_env), home_dir()),
            Some(home_config)
        );

        assert_eq!(find_config_path(&no_args, lookup(HashMap::new()), None), None);
    }

    #[test]
    fn test_log_level_flag_overrides_config() {
        let config = config::Config::from_toml("[logging]\nlevel = \"warn\"").unwrap();

        let unchanged = apply_args(&Args::parse_from([APP_NAME]), config.clone());
        assert_eq!(unchanged.logging.level, "warn");

        let args = Args::parse_from([APP_NAME, "-l", "debug"]);
        let config = apply_args(&args, config);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_log_level_flag_lets_debug_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.log");

        let mut config = config::Config::default();
        config.logging.use_rust_log = false;
        config.logging.format = "{level} {message}".to_string();
        config.logging.handlers = vec![HandlerConfig {
            kind: HandlerKind::File,
            path: Some(path.clone()),
            level: None,
        }];

        let args = Args::parse_from([APP_NAME, "--log-level", "debug"]);
        let ctx = LoggingContext::new(apply_args(&args, config).logging).unwrap();
        assert_eq!(ctx.level(), LevelFilter::DEBUG);

        tracing::subscriber::with_default(ctx.subscriber().unwrap(), || {
            debug!(target: "bot", "connecting");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "DEBUG connecting\n");
    }
}
