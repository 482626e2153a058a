//! nest-auth — collect Google credentials for homebridge-nest.
//!
//! Opens a browser on home.nest.com, watches the network while the operator
//! signs in with Google, captures the `iframerpc` issueToken URL and the Google
//! cookies, writes them to the plugin's config.json and checks them against
//! the Nest API.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod browser;
mod capture;
mod collect;
mod cookies;
mod operator;
mod plugin_config;
mod report;
mod settings;
mod validate;

use browser::ChromeSession;
use collect::{CollectOptions, collect_auth};
use operator::StdinOperator;
use report::Narrator;
use settings::Settings;

const DEFAULT_SETTINGS: &str = "nest-auth.yaml";

#[derive(Parser)]
#[command(name = "nest-auth")]
#[command(author, version, about = "Collect Google issueToken and cookies for homebridge-nest")]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[arg(long, global = true)]
    dry_run: bool,

    /// Settings file (browser, login markers, validation). Optional.
    #[arg(short, long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the browser and collect credentials (default)
    Collect {
        /// homebridge config file to update (default from settings: config.json)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Skip the Nest API check after saving
        #[arg(long)]
        no_validate: bool,

        /// Replace the config file instead of merging googleAuth into it
        #[arg(long)]
        overwrite: bool,

        /// Print tokens and cookie values in full
        #[arg(long)]
        show_secrets: bool,

        /// Chrome/Chromium binary
        #[arg(long, value_name = "PATH")]
        chrome: Option<PathBuf>,

        #[arg(long)]
        headless: bool,
    },

    /// Check the cookies stored in the config file against the Nest API
    Validate {
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Print the stored googleAuth
    Show {
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        #[arg(long)]
        show_secrets: bool,
    },

    /// Check the settings file
    Check,
}

/// Settings path: explicit --settings must exist; the default may be absent.
fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    match &cli.settings {
        Some(path) => Settings::load(path),
        None => Settings::load_or_default(Path::new(DEFAULT_SETTINGS)),
    }
}

fn settings_path(cli: &Cli) -> PathBuf {
    cli.settings
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `check` reports a broken settings file instead of failing to load it.
    let checking = matches!(cli.command, Some(Commands::Check));
    let settings = if checking {
        Settings::default()
    } else {
        load_settings(&cli)?
    };
    init_logging((!checking).then_some(&settings), &cli);

    if cli.dry_run && !checking {
        tracing::info!(
            settings = %settings_path(&cli).display(),
            output = %settings.output.display(),
            "dry-run: settings loaded, not starting"
        );
        return Ok(());
    }

    match &cli.command {
        None => run_collect(settings, CollectArgs::default()).await,
        Some(Commands::Collect {
            output,
            no_validate,
            overwrite,
            show_secrets,
            chrome,
            headless,
        }) => {
            run_collect(
                settings,
                CollectArgs {
                    output: output.clone(),
                    no_validate: *no_validate,
                    overwrite: *overwrite,
                    show_secrets: *show_secrets,
                    chrome: chrome.clone(),
                    headless: *headless,
                },
            )
            .await
        }
        Some(Commands::Validate { output }) => {
            let path = output.clone().unwrap_or_else(|| settings.output.clone());
            run_validate(&settings, &path).await
        }
        Some(Commands::Show {
            output,
            show_secrets,
        }) => {
            let path = output.clone().unwrap_or_else(|| settings.output.clone());
            run_show(&path, *show_secrets)
        }
        Some(Commands::Check) => run_check(&settings_path(&cli)),
    }
}

#[derive(Default)]
struct CollectArgs {
    output: Option<PathBuf>,
    no_validate: bool,
    overwrite: bool,
    show_secrets: bool,
    chrome: Option<PathBuf>,
    headless: bool,
}

async fn run_collect(mut settings: Settings, args: CollectArgs) -> anyhow::Result<()> {
    if let Some(chrome) = args.chrome {
        settings.browser.executable = Some(chrome);
    }
    if args.headless {
        settings.browser.headless = true;
    }
    let output = args.output.unwrap_or_else(|| settings.output.clone());
    let narrator = Narrator::new(args.show_secrets);
    let options = CollectOptions {
        output: output.clone(),
        validate: settings.validation.enabled && !args.no_validate,
        overwrite: args.overwrite,
        narrator,
    };

    narrator.banner(&output);
    tracing::info!("launching browser");
    let mut session = ChromeSession::launch(&settings.browser).await?;
    let operator = StdinOperator::new();

    let outcome = collect_auth(&mut session, &operator, &settings, &options).await?;
    tracing::info!(
        cookie_pairs = outcome.auth.cookies.split("; ").count(),
        issue_token_len = outcome.auth.issue_token.len(),
        "collection finished"
    );

    println!();
    println!("=== Authentication Process Complete ===");
    println!("Configuration saved to: {}", outcome.output.display());
    match &outcome.validation {
        Some(v) if v.is_valid() => {
            println!("Tokens validated. You can now use them with the homebridge-nest plugin.")
        }
        Some(_) => println!("Tokens saved, but the Nest API did not accept them."),
        None => println!("Validation skipped."),
    }
    Ok(())
}

async fn run_validate(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let auth = plugin_config::read_google_auth(path)?
        .ok_or_else(|| anyhow::anyhow!("no googleAuth found in {}", path.display()))?;
    let client = validate::build_client(&settings.validation)?;
    let v = validate::validate_cookies(
        &client,
        &settings.validation,
        &settings.browser.user_agent,
        &auth.cookies,
    )
    .await;
    Narrator::new(false).validation(&v);
    if !v.is_valid() {
        tracing::error!(outcome = ?v, "stored cookies rejected");
        std::process::exit(1);
    }
    Ok(())
}

fn run_show(path: &Path, show_secrets: bool) -> anyhow::Result<()> {
    match plugin_config::read_google_auth(path)? {
        Some(auth) => {
            Narrator::new(show_secrets).stored_auth(path, &auth);
            Ok(())
        }
        None => anyhow::bail!("no googleAuth found in {}", path.display()),
    }
}

fn run_check(settings_path: &Path) -> anyhow::Result<()> {
    match Settings::load(settings_path) {
        Ok(_) => {
            tracing::info!("settings valid");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!("settings invalid: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Init tracing on stderr. `--quiet`/`--verbose` win; then NEST_AUTH_LOG_LEVEL,
/// settings `log_level`, RUST_LOG. JSON output via settings `log_format: json`
/// or NEST_AUTH_LOG_FORMAT=json.
fn init_logging(settings: Option<&Settings>, cli: &Cli) {
    let use_json = match settings.and_then(|s| s.log_format.as_deref()) {
        Some("json") => true,
        _ => std::env::var("NEST_AUTH_LOG_FORMAT").as_deref() == Ok("json"),
    };
    let filter = if cli.quiet {
        EnvFilter::new("error")
    } else if cli.verbose {
        EnvFilter::new("nest_auth=debug,chromiumoxide=info")
    } else {
        let env_level = std::env::var("NEST_AUTH_LOG_LEVEL")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        match (env_level, settings) {
            (Some(level), _) => EnvFilter::new(format!("nest_auth={}", level)),
            (None, Some(s)) if s.log_level != "info" => {
                EnvFilter::new(format!("nest_auth={}", s.log_level))
            }
            _ => EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("nest_auth=info")),
        }
    };
    if use_json {
        let json_fmt = tracing_subscriber::fmt::format()
            .json()
            .with_current_span(false)
            .with_span_list(false);
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false)
                    .event_format(json_fmt),
            )
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .with(filter)
            .init();
    }
}
