//! Binary entry point for the murmur feed CLI.
#![forbid(unsafe_code)]

mod config;
mod ui;

use std::error::Error;
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use murmur::{
    cli::{
        bench_post, bench_timeline, load_follows, load_tweets, BenchReport, LoadSummary,
        TimelineBenchConfig, TweetLoadConfig,
    },
    http::{self, ServeOptions},
    service::{FeedService, ServiceOptions, ServiceStats},
    storage::StoreOptions,
    timeline::{cursor, FanoutMode, TimelineQuery, TweetPage},
    types::UserId,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use config::{CliConfig, Profile, ProfileUpdate};
use ui::{format_duration, Theme, Ui};

const DEFAULT_DB_FILE: &str = "murmur.db";

#[derive(Parser, Debug)]
#[command(
    name = "murmur",
    version,
    about = "Follow graph and home timelines over SQLite",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ThemeArg::Auto,
        help = "Color theme for text output"
    )]
    theme: ThemeArg,

    #[arg(short, long, global = true, help = "Suppress decorations and progress bars")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "MURMUR_DB",
        value_name = "PATH",
        help = "SQLite database file"
    )]
    db: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        conflicts_with = "db",
        help = "Use a private in-memory database"
    )]
    in_memory: bool,

    #[arg(
        long,
        global = true,
        env = "MURMUR_CONFIG",
        value_name = "FILE",
        help = "CLI config file (defaults to the user config directory)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "MURMUR_PROFILE",
        value_name = "NAME",
        help = "Profile to read settings from"
    )]
    profile: Option<String>,

    #[arg(long, global = true, help = "Storage connection pool size")]
    pool_size: Option<usize>,

    #[arg(
        long,
        global = true,
        value_name = "FOLLOWERS",
        help = "Follower count at which an author's tweets are pulled instead of pushed"
    )]
    celebrity_threshold: Option<usize>,

    #[arg(long, global = true, help = "Entries kept per cached timeline segment")]
    segment_depth: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Where fan-out runs")]
    fanout_mode: Option<FanoutModeArg>,
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long, help = "Cursor returned by the previous page")]
    cursor: Option<String>,

    #[arg(long, help = "Page size")]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ProfileSetCmd {
    #[arg(value_name = "NAME")]
    name: String,

    #[arg(long, value_name = "PATH")]
    database: Option<PathBuf>,

    #[arg(long)]
    pool_size: Option<usize>,

    #[arg(long)]
    celebrity_threshold: Option<usize>,

    #[arg(long)]
    segment_depth: Option<usize>,

    #[arg(long, value_name = "SECS")]
    max_staleness_secs: Option<u64>,

    #[arg(long, value_name = "SEGMENTS")]
    cache_capacity: Option<usize>,

    #[arg(long, value_enum)]
    fanout_mode: Option<FanoutModeArg>,

    #[arg(long, value_name = "MS")]
    fanout_target_latency_ms: Option<u64>,

    #[arg(long)]
    default_page_size: Option<usize>,

    #[arg(long)]
    max_page_size: Option<usize>,

    #[arg(long, value_name = "MS")]
    read_deadline_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    #[command(about = "List configured profiles")]
    List,

    #[command(about = "Show one profile")]
    Show {
        #[arg(value_name = "NAME")]
        name: String,
    },

    #[command(about = "Create or update a profile")]
    Set(ProfileSetCmd),

    #[command(about = "Delete a profile")]
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    #[command(about = "Make a profile the default, or clear the default")]
    Use {
        #[arg(value_name = "NAME")]
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Make FOLLOWER follow FOLLOWEE")]
    Follow { follower: u64, followee: u64 },

    #[command(about = "Remove a follow edge")]
    Unfollow { follower: u64, followee: u64 },

    #[command(about = "Post a tweet")]
    Post { user: u64, text: String },

    #[command(about = "List a user's own tweets, newest first")]
    Tweets {
        user: u64,
        #[command(flatten)]
        page: PageArgs,
    },

    #[command(about = "Read a user's home timeline")]
    Timeline {
        user: u64,
        #[command(flatten)]
        page: PageArgs,
        #[arg(long, value_name = "MS", help = "Deadline for this read")]
        deadline_ms: Option<u64>,
    },

    #[command(about = "Bulk-load follower_id,followee_id rows from CSV")]
    LoadFollows {
        #[arg(value_name = "CSV")]
        path: PathBuf,
        #[arg(long, help = "The file has no header line")]
        no_header: bool,
    },

    #[command(about = "Post every tweet in a user_id,tweet_text CSV")]
    LoadTweets {
        #[arg(value_name = "CSV")]
        path: PathBuf,
        #[arg(long, help = "Stop after this many tweets")]
        target: Option<u64>,
    },

    #[command(about = "Measure post throughput from a tweet CSV")]
    BenchPost {
        #[arg(value_name = "CSV")]
        path: PathBuf,
        #[arg(long, default_value_t = 1_000_000, help = "Tweets to post")]
        target: u64,
    },

    #[command(about = "Measure home-timeline reads for random followers")]
    BenchTimeline {
        #[arg(long, default_value_t = 50_000, help = "Timeline reads to issue")]
        requests: u64,
        #[arg(long, help = "Page size per read")]
        limit: Option<usize>,
    },

    #[command(about = "Serve the JSON HTTP API")]
    Serve {
        #[arg(
            long,
            value_name = "HOST",
            default_value = "127.0.0.1",
            help = "Bind address host"
        )]
        host: IpAddr,
        #[arg(long, value_name = "PORT", default_value_t = 7878, help = "Bind port")]
        port: u16,
    },

    #[command(about = "Print row counts, cache occupancy and counters")]
    Stats,

    #[command(about = "Manage CLI profiles", subcommand)]
    Profile(ProfileCommand),

    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ThemeArg {
    Auto,
    Light,
    Dark,
    Plain,
}

impl From<ThemeArg> for Theme {
    fn from(theme: ThemeArg) -> Self {
        match theme {
            ThemeArg::Auto => Theme::Auto,
            ThemeArg::Light => Theme::Light,
            ThemeArg::Dark => Theme::Dark,
            ThemeArg::Plain => Theme::Plain,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FanoutModeArg {
    Inline,
    Background,
}

impl From<FanoutModeArg> for FanoutMode {
    fn from(mode: FanoutModeArg) -> Self {
        match mode {
            FanoutModeArg::Inline => FanoutMode::Inline,
            FanoutModeArg::Background => FanoutMode::Background,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    let ui = Ui::new(cli.theme.into(), cli.quiet);
    let mut config = CliConfig::load(cli.open.config.clone())?;

    let command = match cli.command {
        Command::Profile(cmd) => return run_profile(cmd, &mut config, &ui, cli.format),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "murmur", &mut io::stdout());
            return Ok(());
        }
        other => other,
    };

    let profile = selected_profile(&config, cli.open.profile.as_deref())?;
    let opts = build_service_options(&cli.open, &config, profile);
    let svc = FeedService::open(opts)?;

    match command {
        Command::Follow { follower, followee } => {
            svc.follow(UserId(follower), UserId(followee))?;
            ui.success(&format!("{follower} now follows {followee}"));
        }
        Command::Unfollow { follower, followee } => {
            if svc.unfollow(UserId(follower), UserId(followee))? {
                ui.success(&format!("{follower} no longer follows {followee}"));
            } else {
                ui.warn(&format!("{follower} did not follow {followee}"));
            }
        }
        Command::Post { user, text } => {
            let tweet = svc.post_tweet(UserId(user), &text)?;
            emit(cli.format, &tweet, || {
                ui.success(&format!(
                    "posted tweet {} at {}",
                    tweet.tweet_id, tweet.tweet_ts
                ))
            })?;
        }
        Command::Tweets { user, page } => {
            let result = svc.user_tweets(UserId(user), page.cursor.as_deref(), page.limit)?;
            emit(cli.format, &result, || {
                print_page(&ui, &format!("tweets by {user}"), &result)
            })?;
        }
        Command::Timeline {
            user,
            page,
            deadline_ms,
        } => {
            let result = match deadline_ms {
                Some(ms) => svc.home_timeline_with(TimelineQuery {
                    user: UserId(user),
                    cursor: page.cursor.as_deref().map(cursor::decode_key).transpose()?,
                    limit: page.limit.unwrap_or(svc.options().default_page_size),
                    deadline: Some(Instant::now() + Duration::from_millis(ms)),
                })?,
                None => svc.home_timeline(UserId(user), page.cursor.as_deref(), page.limit)?,
            };
            emit(cli.format, &result, || {
                print_page(&ui, &format!("home timeline of {user}"), &result)
            })?;
        }
        Command::LoadFollows { path, no_header } => {
            let progress = ui.progress(None, "loading follows");
            let summary = load_follows(&svc, &path, !no_header, &progress)?;
            progress.finish_and_clear();
            emit(cli.format, &summary, || print_load(&ui, "follows", &summary))?;
        }
        Command::LoadTweets { path, target } => {
            let progress = ui.progress(target, "posting tweets");
            let summary = load_tweets(&svc, &TweetLoadConfig { path, target }, &progress)?;
            progress.finish_and_clear();
            emit(cli.format, &summary, || print_load(&ui, "tweets", &summary))?;
        }
        Command::BenchPost { path, target } => {
            let progress = ui.progress(Some(target), "posting tweets");
            let cfg = TweetLoadConfig {
                path,
                target: Some(target),
            };
            let report = bench_post(&svc, &cfg, &progress)?;
            progress.finish_and_clear();
            emit(cli.format, &report, || print_bench(&ui, &report))?;
        }
        Command::BenchTimeline { requests, limit } => {
            let progress = ui.progress(Some(requests), "reading timelines");
            let cfg = TimelineBenchConfig { requests, limit };
            let report = bench_timeline(&svc, cfg, &progress)?;
            progress.finish_and_clear();
            emit(cli.format, &report, || print_bench(&ui, &report))?;
        }
        Command::Serve { host, port } => {
            let svc = Arc::new(svc);
            ui.info(&format!("serving on http://{host}:{port} (Ctrl-C to stop)"));
            if let Err(err) = http::serve(Arc::clone(&svc), ServeOptions { host, port }).await {
                eprintln!("http server terminated: {err}");
                return Err(Box::new(err));
            }
            return Ok(());
        }
        Command::Stats => {
            let stats = svc.stats()?;
            emit(cli.format, &stats, || print_stats(&ui, &stats))?;
        }
        Command::Profile(_) | Command::Completions { .. } => {}
    }

    svc.shutdown();
    Ok(())
}

fn init_tracing(quiet: bool) {
    let default = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn selected_profile<'a>(
    config: &'a CliConfig,
    requested: Option<&str>,
) -> Result<Option<&'a Profile>, Box<dyn Error>> {
    match requested.or_else(|| config.default_profile_name()) {
        Some(name) => match config.profile(name) {
            Some(profile) => Ok(Some(profile)),
            None => Err(format!("profile '{name}' not found").into()),
        },
        None => Ok(None),
    }
}

/// Flags win over the profile, the profile wins over built-in defaults.
fn build_service_options(
    args: &OpenArgs,
    config: &CliConfig,
    profile: Option<&Profile>,
) -> ServiceOptions {
    let store = if args.in_memory {
        StoreOptions::memory()
    } else {
        let path = args
            .db
            .clone()
            .or_else(|| profile.and_then(|p| p.database.clone()))
            .or_else(|| config.default_db_path().cloned())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_FILE));
        StoreOptions::file(path)
    };
    let mut opts = ServiceOptions::new(store);

    if let Some(profile) = profile {
        if let Some(size) = profile.pool_size {
            opts = opts.pool_size(size);
        }
        if let Some(threshold) = profile.celebrity_threshold {
            opts = opts.celebrity_threshold(threshold);
        }
        if let Some(depth) = profile.segment_depth {
            opts = opts.segment_depth(depth);
        }
        if let Some(secs) = profile.max_staleness_secs {
            opts = opts.max_staleness(Duration::from_secs(secs));
        }
        if let Some(capacity) = profile.cache_capacity {
            opts = opts.cache_capacity(capacity);
        }
        if let Some(mode) = profile.fanout_mode {
            opts = opts.fanout_mode(mode.into());
        }
        if let Some(ms) = profile.fanout_target_latency_ms {
            opts = opts.fanout_target_latency(Duration::from_millis(ms));
        }
        if let Some(size) = profile.default_page_size {
            opts = opts.default_page_size(size);
        }
        if let Some(size) = profile.max_page_size {
            opts = opts.max_page_size(size);
        }
        if let Some(ms) = profile.read_deadline_ms {
            opts = opts.read_deadline(Some(Duration::from_millis(ms)));
        }
    }

    if let Some(size) = args.pool_size {
        opts = opts.pool_size(size);
    }
    if let Some(threshold) = args.celebrity_threshold {
        opts = opts.celebrity_threshold(threshold);
    }
    if let Some(depth) = args.segment_depth {
        opts = opts.segment_depth(depth);
    }
    if let Some(mode) = args.fanout_mode {
        opts = opts.fanout_mode(mode.into());
    }
    opts
}

fn run_profile(
    cmd: ProfileCommand,
    config: &mut CliConfig,
    ui: &Ui,
    format: OutputFormat,
) -> Result<(), Box<dyn Error>> {
    match cmd {
        ProfileCommand::List => {
            let profiles: Vec<&Profile> = config.profiles().collect();
            let default = config.default_profile_name().map(str::to_string);
            emit(format, &profiles, || {
                if profiles.is_empty() {
                    ui.info("no profiles configured");
                    return;
                }
                ui.list(
                    "profiles",
                    profiles.iter().map(|p| {
                        if default.as_deref() == Some(p.name.as_str()) {
                            format!("{} (default)", p.name)
                        } else {
                            p.name.clone()
                        }
                    }),
                );
            })?;
        }
        ProfileCommand::Show { name } => {
            let profile = config
                .profile(&name)
                .ok_or_else(|| format!("profile '{name}' not found"))?;
            emit(format, profile, || print_profile(ui, profile))?;
        }
        ProfileCommand::Set(cmd) => {
            let update = ProfileUpdate {
                database: cmd.database,
                pool_size: cmd.pool_size,
                celebrity_threshold: cmd.celebrity_threshold,
                segment_depth: cmd.segment_depth,
                max_staleness_secs: cmd.max_staleness_secs,
                cache_capacity: cmd.cache_capacity,
                fanout_mode: cmd.fanout_mode,
                fanout_target_latency_ms: cmd.fanout_target_latency_ms,
                default_page_size: cmd.default_page_size,
                max_page_size: cmd.max_page_size,
                read_deadline_ms: cmd.read_deadline_ms,
            };
            config.upsert_profile(&cmd.name, update)?;
            let path = config.persist()?;
            ui.success(&format!("saved profile '{}' to {}", cmd.name, path.display()));
        }
        ProfileCommand::Delete { name } => {
            config.delete_profile(&name)?;
            let path = config.persist()?;
            ui.success(&format!("deleted profile '{name}' from {}", path.display()));
        }
        ProfileCommand::Use { name } => {
            config.set_default_profile(name.as_deref())?;
            let path = config.persist()?;
            match name {
                Some(name) => ui.success(&format!("default profile is now '{name}'")),
                None => ui.success("cleared the default profile"),
            }
            tracing::debug!(path = %path.display(), "cli.profile.use");
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize + ?Sized,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_page(ui: &Ui, title: &str, page: &TweetPage) {
    ui.tweets(title, &page.tweets);
    if page.partial {
        ui.warn("deadline reached; page may be short");
    }
    if let Some(next) = &page.next_cursor {
        ui.info(&format!("next cursor: {next}"));
    }
}

fn print_load(ui: &Ui, what: &str, summary: &LoadSummary) {
    ui.success(&format!(
        "loaded {} {what} ({} rows read, {} skipped)",
        summary.inserted, summary.rows_read, summary.skipped
    ));
}

fn print_bench(ui: &Ui, report: &BenchReport) {
    ui.section(
        report.name,
        [
            ("operations", report.operations.to_string()),
            ("timeouts", report.timeouts.to_string()),
            (
                "elapsed",
                format_duration(Duration::from_secs_f64(report.seconds)),
            ),
            ("ops/sec", format!("{:.1}", report.ops_per_sec)),
        ],
    );
}

fn print_stats(ui: &Ui, stats: &ServiceStats) {
    ui.section(
        "storage",
        [
            ("follows", stats.store.follows),
            ("tweets", stats.store.tweets),
        ],
    );
    ui.section(
        "derived state",
        [
            ("followee sets", stats.index.followee_sets),
            ("follower sets", stats.index.follower_sets),
            ("follower counts", stats.index.follower_counts),
            ("segments", stats.cache.segments),
            ("segment entries", stats.cache.entries),
            ("fan-out backlog", stats.fanout_backlog),
        ],
    );
}

fn print_profile(ui: &Ui, profile: &Profile) {
    fn show<T: std::fmt::Display>(value: Option<T>) -> String {
        value.map_or_else(|| "-".to_string(), |v| v.to_string())
    }
    ui.section(
        &format!("profile {}", profile.name),
        [
            (
                "database",
                show(profile.database.as_ref().map(|p| p.display())),
            ),
            ("pool_size", show(profile.pool_size)),
            ("celebrity_threshold", show(profile.celebrity_threshold)),
            ("segment_depth", show(profile.segment_depth)),
            ("max_staleness_secs", show(profile.max_staleness_secs)),
            ("cache_capacity", show(profile.cache_capacity)),
            (
                "fanout_mode",
                show(profile.fanout_mode.map(|m| format!("{m:?}").to_lowercase())),
            ),
            (
                "fanout_target_latency_ms",
                show(profile.fanout_target_latency_ms),
            ),
            ("default_page_size", show(profile.default_page_size)),
            ("max_page_size", show(profile.max_page_size)),
            ("read_deadline_ms", show(profile.read_deadline_ms)),
        ],
    );
}
