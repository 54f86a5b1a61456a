use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use labvault::config::LoggingConfig;
use labvault::{BackupEngine, Config, GitCli, HealthCheck};

#[derive(Parser)]
#[command(name = "labvault")]
#[command(about = "Mirror every GitLab group and project to local disk")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror all projects that are not yet on disk
    Backup {
        #[command(flatten)]
        source: SourceArgs,

        /// Skip projects that belong to no group
        #[arg(long)]
        no_ungrouped: bool,

        /// Number of clones to run at once
        #[arg(long)]
        parallel: Option<usize>,

        /// Timeout for a single clone in seconds (0 disables)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show where every project would be mirrored, without cloning
    Plan {
        #[command(flatten)]
        source: SourceArgs,

        /// Skip projects that belong to no group
        #[arg(long)]
        no_ungrouped: bool,
    },

    /// System health check and diagnostics
    Doctor {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Write a configuration file
    Init {
        /// GitLab server URL
        #[arg(long)]
        url: Option<String>,

        /// Backup root directory
        #[arg(short, long)]
        output: Option<String>,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

/// Where to read from and write to; overrides the configuration file
#[derive(Args)]
struct SourceArgs {
    /// GitLab server URL (e.g. https://gitlab.example.com)
    #[arg(long, env = "GITLAB_URL")]
    url: Option<String>,

    /// GitLab access token
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Backup root directory
    #[arg(short, long)]
    output: Option<String>,
}

impl SourceArgs {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(url) = self.url {
            config.gitlab.url = Some(url);
        }
        if let Some(token) = self.token {
            config.gitlab.token = Some(token);
        }
        if let Some(output) = self.output {
            config.backup.output_directory = output;
            config.expand_paths()?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Backup {
            source,
            no_ungrouped,
            parallel,
            timeout,
        } => {
            source.apply(&mut config)?;
            if no_ungrouped {
                config.backup.include_ungrouped = false;
            }
            if let Some(parallel) = parallel {
                config.mirror.max_parallel = parallel;
            }
            if let Some(timeout) = timeout {
                config.mirror.timeout = timeout;
            }
            init_logging(cli.verbose, &config.logging)?;
            cmd_backup(&config).await
        }
        Commands::Plan {
            source,
            no_ungrouped,
        } => {
            source.apply(&mut config)?;
            if no_ungrouped {
                config.backup.include_ungrouped = false;
            }
            init_logging(cli.verbose, &config.logging)?;
            cmd_plan(&config).await
        }
        Commands::Doctor { source } => {
            source.apply(&mut config)?;
            init_logging(cli.verbose, &config.logging)?;
            cmd_doctor(&config).await
        }
        Commands::Init { url, output, force } => {
            init_logging(cli.verbose, &config.logging)?;
            cmd_init(cli.config, url, output, force)
        }
    }
}

/// Initialize logging: stderr always, plus the configured log file
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let file_layer = match &logging.file {
        Some(path) => {
            let path = Path::new(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(logging.color),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Run a full backup
async fn cmd_backup(config: &Config) -> Result<()> {
    info!("Starting labvault v{}", env!("CARGO_PKG_VERSION"));

    let health = HealthCheck::preflight(config);
    if !health.all_passed() {
        print_health_report(&health);
        println!();
        println!("❌ Cannot start backup - fix the errors above first");
        std::process::exit(1);
    }

    let engine = BackupEngine::new(config, Arc::new(GitCli::new()))?;
    let summary = engine.run().await?;

    if !summary.is_clean() {
        std::process::exit(1);
    }

    Ok(())
}

/// Print the backup plan
async fn cmd_plan(config: &Config) -> Result<()> {
    let engine = BackupEngine::new(config, Arc::new(GitCli::new()))?;
    let plan = engine.collect_plan().await;

    println!(
        "📦 Backup plan: {} projects in {} groups",
        plan.total_projects(),
        plan.total_groups
    );

    let shared = plan.shared_destinations();
    let mut destinations = plan.destinations(engine.output_root()).into_iter();
    for bucket in &plan.buckets {
        println!();
        println!("📁 {} ({})", bucket.dir, bucket.label);
        for (project, (name, destination)) in
            bucket.projects.iter().zip(destinations.by_ref())
        {
            if let Some(owner) = shared.get(&project.id) {
                println!("   ❌ {} -> {} (shared with {})", name, destination.display(), owner);
                continue;
            }
            let icon = if destination.exists() { "⏭️ " } else { "📥" };
            println!("   {} {} -> {}", icon, name, destination.display());
        }
    }

    if !plan.listing_errors.is_empty() {
        println!();
        println!("⚠️  Incomplete listings, the plan may be missing projects:");
        for listing_error in &plan.listing_errors {
            println!("   {}", listing_error);
        }
    }

    Ok(())
}

/// System health check and diagnostics
async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);
    Ok(())
}

/// Write a configuration file
fn cmd_init(
    config_path: Option<PathBuf>,
    url: Option<String>,
    output: Option<String>,
    force: bool,
) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        return Err(anyhow!(
            "Configuration already exists at {:?}. Use --force to overwrite",
            config_path
        ));
    }

    let mut config = Config::default();
    config.gitlab.url = url;
    if let Some(output) = output {
        config.backup.output_directory = output;
    }

    config.save(&config_path)?;
    info!("Configuration saved to: {:?}", config_path);

    println!("✅ labvault configuration initialized");
    println!("   Config: {:?}", config_path);
    println!("   Backup directory: {}", config.backup.output_directory);
    println!(
        "   Next: export {}=<token> and run 'labvault backup'",
        labvault::config::TOKEN_ENV_VAR
    );

    Ok(())
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    use labvault::health::CheckResult;

    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning { "⚠️ " } else { "✅" }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 labvault System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
