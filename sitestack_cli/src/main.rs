use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use sitestack::{ConfigOverrides, Deployer, Error, Result, SiteConfig, StaticSiteStack, SyncPlan};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// sitestack - deploy a static website to S3 behind CloudFront
#[derive(Parser)]
#[command(name = "sitestack")]
#[command(version, about = "Deploy a static website to S3 behind CloudFront", long_about = None)]
struct Cli {
    /// Config file (defaults to ./sitestack.toml if present)
    #[arg(short, long, global = true, env = "SITESTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory of built site files
    #[arg(long, global = true, env = "SITESTACK_SOURCE")]
    source: Option<PathBuf>,

    #[arg(long, global = true, env = "SITESTACK_REGION")]
    region: Option<String>,

    #[arg(long, global = true, env = "SITESTACK_STACK_NAME")]
    stack_name: Option<String>,

    /// Physical S3 bucket name
    #[arg(long, global = true, env = "SITESTACK_BUCKET_NAME")]
    bucket_name: Option<String>,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all logging except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the CloudFormation template without deploying
    Synth {
        /// Output directory for the template
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show which files a deploy would upload or delete
    Diff,

    /// Create or update the stack, upload the site and print its URL
    Deploy,

    /// Delete the stack, its bucket and the bucket's contents
    Destroy,
}

/// the filter for the chosen verbosity. `None` defers to `RUST_LOG`.
fn log_filter(verbose: bool, quiet: bool) -> Option<&'static str> {
    if quiet {
        Some("error")
    } else if verbose {
        Some("debug")
    } else {
        None
    }
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = match log_filter(verbose, quiet) {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn map_error_to_exit_code(e: &Error) -> i32 {
    match e {
        Error::MissingSource(_) | Error::NotADirectory(_) | Error::EmptySource(_) => 3,
        Error::Provider(_) | Error::StackFailed { .. } => 4,
        Error::Io(_) | Error::Json(_) => 1,
        _ => 2,
    }
}

fn print_plan(plan: &SyncPlan) {
    for (key, reason) in plan.uploads.iter() {
        println!("upload  {key} ({reason:?})");
    }
    for key in plan.deletes.iter() {
        println!("delete  {key}");
    }
    println!(
        "{} to upload, {} to delete, {} unchanged",
        plan.uploads.len(),
        plan.deletes.len(),
        plan.unchanged
    );
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let output_dir = match &cli.command {
        Commands::Synth { out } => out.clone(),
        _ => None,
    };
    ConfigOverrides {
        stack_name: cli.stack_name.clone(),
        region: cli.region.clone(),
        bucket_name: cli.bucket_name.clone(),
        source_dir: cli.source.clone(),
        output_dir,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = SiteConfig::load(cli.config.as_deref())?;
    config.apply(overrides(&cli));

    match cli.command {
        Commands::Synth { .. } => {
            let stack = StaticSiteStack::synth(&config)?;
            let path = stack.write_template(&config.output_dir)?;
            println!("{}", path.display());
        }
        Commands::Diff => {
            let stack = StaticSiteStack::synth(&config)?;
            let deployer = Deployer::from_region(&stack.region).await;
            print_plan(&deployer.diff(&stack).await?);
        }
        Commands::Deploy => {
            let stack = StaticSiteStack::synth(&config)?;
            stack.write_template(&config.output_dir)?;
            let deployer = Deployer::from_region(&stack.region).await;
            let report = deployer.deploy(&stack).await?;
            println!("{}", report.url);
        }
        Commands::Destroy => {
            config.validate()?;
            sitestack::stack::validate_stack_name(&config.stack_name)?;
            let deployer = Deployer::from_region(&config.region).await;
            deployer.destroy(&config.stack_name).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli).await {
        error!("Error: {}", e);
        process::exit(map_error_to_exit_code(&e));
    }
}
