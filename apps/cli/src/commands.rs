//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use webmark_core::{
    FetchContext, FetchOutcome, ProgressReporter, RenderOptions, SilentProgress, fetch_all,
    fetch_raw, render, search,
};
use webmark_shared::{
    AppConfig, ConfigStore, FetchOptions, FetchRequest, init_config, load_config,
    load_config_from,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Webmark: web pages and API descriptions as clean Markdown.
#[derive(Parser)]
#[command(
    name = "webmark",
    version,
    about = "Fetch web pages and OpenAPI documents and convert them to Markdown.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.webmark/webmark.toml.
    #[arg(long, global = true, env = "WEBMARK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Settings given on the command line. These win over the config file.
#[derive(clap::Args, Debug, Default)]
pub(crate) struct Overrides {
    /// Per-request timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Retries after the first failed attempt.
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// User-Agent header for plain HTTP fetches.
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Maximum fetches in flight at once.
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Fetch through the headless browser.
    #[arg(long, global = true)]
    pub stealth: bool,
}

impl Overrides {
    pub(crate) fn apply(&self, config: &mut AppConfig) {
        let settings = &mut config.settings;
        if let Some(timeout_ms) = self.timeout_ms {
            settings.timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            settings.retry.retries = retries;
        }
        if let Some(user_agent) = &self.user_agent {
            settings.user_agent.clone_from(user_agent);
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency.max_concurrent = concurrency;
        }
        if self.stealth {
            settings.stealth.enabled = true;
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch pages and print them as Markdown.
    Fetch {
        /// URLs to fetch.
        urls: Vec<String>,

        /// Configured website to fetch (repeatable).
        #[arg(short, long = "site")]
        sites: Vec<String>,

        /// Print results as JSON instead of Markdown.
        #[arg(long)]
        json: bool,

        /// Omit reading time, word count, language and summary.
        #[arg(long)]
        no_metrics: bool,

        /// Write the output to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Summarize an OpenAPI or Swagger document from a URL or local file.
    #[command(name = "openapi")]
    OpenApi {
        /// URL or file path of the document.
        source: String,

        /// Print the processed document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Rank configured websites against a query.
    Search {
        /// Free-text query.
        query: String,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List configured websites.
    Sites,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout
/// carries only the converted documents.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "webmark=warn",
        1 => "webmark=info",
        2 => "webmark=debug",
        _ => "webmark=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config: config_path,
        overrides,
        command,
        ..
    } = cli;

    match command {
        Command::Sites => cmd_sites(&resolve_config(config_path.as_deref(), &overrides)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path.as_deref(), &overrides),
        },
        command => {
            let config = resolve_config(config_path.as_deref(), &overrides)?;
            let include_metrics = config.settings.content.include_metrics;
            let ctx = FetchContext::new(ConfigStore::new(config))?;
            let result = run_with_context(&ctx, command, &overrides, include_metrics).await;
            ctx.shutdown().await;
            result
        }
    }
}

/// Commands that fetch. The caller owns the context and shuts it down
/// whatever the outcome.
async fn run_with_context(
    ctx: &FetchContext,
    command: Command,
    overrides: &Overrides,
    include_metrics: bool,
) -> Result<()> {
    match command {
        Command::Fetch {
            urls,
            sites,
            json,
            no_metrics,
            out,
        } => {
            let output = OutputOptions {
                json,
                include_metrics: include_metrics && !no_metrics,
                out,
            };
            cmd_fetch(ctx, &urls, &sites, overrides, &output).await
        }
        Command::OpenApi { source, json } => cmd_openapi(ctx, &source, overrides, json).await,
        Command::Search { query, json } => cmd_search(ctx, &query, json).await,
        Command::Sites | Command::Config { .. } => Ok(()),
    }
}

/// Load the config file (explicit path or the default location) and apply
/// command-line overrides.
fn resolve_config(path: Option<&Path>, overrides: &Overrides) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

struct OutputOptions {
    json: bool,
    include_metrics: bool,
    out: Option<PathBuf>,
}

async fn cmd_fetch(
    ctx: &FetchContext,
    urls: &[String],
    sites: &[String],
    overrides: &Overrides,
    output: &OutputOptions,
) -> Result<()> {
    let requests = build_requests(&ctx.config(), urls, sites, overrides)?;
    info!(count = requests.len(), "fetching");

    let results = if requests.len() > 1 {
        let reporter = CliProgress::new(requests.len());
        let results = fetch_all(ctx, &requests, &reporter).await;
        reporter.finish();
        results
    } else {
        fetch_all(ctx, &requests, &SilentProgress).await
    };

    let mut outcomes = Vec::with_capacity(results.len());
    let mut failed = 0usize;
    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(outcome) => outcomes.push((website_name(&ctx.config(), request), outcome)),
            Err(e) => {
                failed += 1;
                eprintln!("error: {e}");
            }
        }
    }

    let text = if output.json {
        let list: Vec<&FetchOutcome> = outcomes.iter().map(|(_, o)| o).collect();
        serde_json::to_string_pretty(&list)?
    } else {
        outcomes
            .iter()
            .map(|(site, outcome)| {
                render(
                    outcome,
                    RenderOptions {
                        website: site.as_deref(),
                        include_metrics: output.include_metrics,
                    },
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    emit(&text, output.out.as_deref())?;

    if failed > 0 {
        return Err(eyre!("{failed} of {} fetches failed", requests.len()));
    }
    Ok(())
}

/// Requests for explicit URLs first, then for named websites.
fn build_requests(
    config: &AppConfig,
    urls: &[String],
    sites: &[String],
    overrides: &Overrides,
) -> Result<Vec<FetchRequest>> {
    if urls.is_empty() && sites.is_empty() {
        return Err(eyre!("nothing to fetch: pass a URL or --site <name>"));
    }

    let mut requests = Vec::with_capacity(urls.len() + sites.len());
    for url in urls {
        let options = FetchOptions {
            stealth: config.settings.stealth.enabled,
            ..FetchOptions::default()
        };
        requests.push(FetchRequest::new(url).with_options(options));
    }
    for name in sites {
        let site = config
            .website(name)
            .ok_or_else(|| eyre!("no website named '{name}' in the config"))?;
        let mut options = FetchOptions::for_website(&config.settings, site);
        if overrides.stealth {
            options.stealth = true;
        }
        if let Some(retries) = overrides.retries {
            options.retries = Some(retries);
        }
        if let Some(timeout_ms) = overrides.timeout_ms {
            options.timeout = Some(Duration::from_millis(timeout_ms));
        }
        if overrides.user_agent.is_some() {
            options.user_agent.clone_from(&overrides.user_agent);
        }
        requests.push(FetchRequest::new(&site.url).with_options(options));
    }
    Ok(requests)
}

fn website_name(config: &AppConfig, request: &FetchRequest) -> Option<String> {
    config
        .websites
        .iter()
        .find(|site| site.url == request.url)
        .map(|site| site.name.clone())
}

async fn cmd_openapi(
    ctx: &FetchContext,
    source: &str,
    overrides: &Overrides,
    json: bool,
) -> Result<()> {
    let (content, origin) = if source.starts_with("http://") || source.starts_with("https://") {
        let options = FetchOptions {
            stealth: overrides.stealth,
            ..FetchOptions::default()
        };
        let raw = fetch_raw(ctx, &FetchRequest::new(source).with_options(options))
            .await
            .map_err(|e| e.at(source))?;
        (raw.body, raw.url)
    } else {
        let content = std::fs::read_to_string(source)
            .wrap_err_with(|| format!("failed to read {source}"))?;
        (content, source.to_string())
    };

    let document = webmark_openapi::process(&content, Some(&origin))?;
    info!(valid = document.is_valid, format = %document.source_format, "processed API description");
    if let Some(errors) = &document.errors {
        for error in errors {
            warn!(%error, "validation issue");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        println!("{}", document.formatted);
    }
    Ok(())
}

async fn cmd_search(ctx: &FetchContext, query: &str, json: bool) -> Result<()> {
    let candidates = ctx.config().enabled_websites().count();
    let reporter = CliProgress::new(candidates);
    let result = search(ctx, query, &reporter).await;
    reporter.finish();
    let hits = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No matching websites.");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!("{}. {} ({:.1})", rank + 1, hit.name, hit.score);
        println!("   {}", hit.url);
        if let Some(title) = &hit.title {
            println!("   Title:   {title}");
        }
        if let Some(summary) = &hit.summary {
            println!("   Summary: {summary}");
        }
    }
    Ok(())
}

fn cmd_sites(config: &AppConfig) -> Result<()> {
    if config.websites.is_empty() {
        println!("No websites configured. Add [[websites]] entries to the config file.");
        return Ok(());
    }
    for site in &config.websites {
        let state = if site.enabled { "" } else { " (disabled)" };
        println!("{}{state}", site.name);
        println!("  {}", site.url);
        if let Some(description) = &site.description {
            println!("  {description}");
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let config = resolve_config(path, overrides)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn emit(text: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, text)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} [{pos}/{len}] {msg}") {
            bar.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✔"]),
            );
        }
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn started(&self, url: &str) {
        self.bar.set_message(format!("Fetching {url}"));
    }

    fn finished(&self, url: &str, success: bool) {
        self.bar.inc(1);
        if !success {
            self.bar.println(format!("  failed: {url}"));
        }
    }
}
