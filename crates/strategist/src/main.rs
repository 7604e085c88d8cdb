//! Strategist CLI - Reddit research to SEO content strategy.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use llm::{AIProvider, AnthropicProvider, RateLimitedProvider};
use strategist::reddit::{CollectRequest, Collector, Dataset, RedditClient, SortOrder, TimeFilter};
use strategist::server::{run_server, ServerState};
use strategist::{
    Orchestrator, PipelineError, Report, ReportWriter, StageEvent, StageKind, StageStatus,
    StrategistConfig, TemplateStore,
};

/// Strategist CLI - Turn Reddit discussions into SEO content strategy reports.
#[derive(Parser)]
#[command(name = "strategist")]
#[command(about = "Reddit research to SEO content strategy pipeline")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "STRATEGIST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect posts for a query and save them as a dataset
    Collect {
        /// Search query
        #[arg(long)]
        query: String,

        /// Max posts to collect
        #[arg(long)]
        limit: Option<usize>,

        /// Sort order (relevance, hot, top, new, comments)
        #[arg(long, default_value = "relevance")]
        sort: SortOrder,

        /// Time window (hour, day, week, month, year, all)
        #[arg(long, default_value = "all")]
        time_filter: TimeFilter,

        /// List a subreddit instead of searching site-wide
        #[arg(long)]
        subreddit: Option<String>,

        /// Dataset output file
        #[arg(long)]
        out: PathBuf,
    },

    /// Analyze a saved dataset
    Analyze {
        /// Dataset file from `collect`
        #[arg(long)]
        input: PathBuf,

        /// Query to report on (defaults to the dataset's query)
        #[arg(long)]
        query: Option<String>,

        /// Report output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Collect and analyze in one step
    Run {
        /// Search query
        #[arg(long)]
        query: String,

        /// Max posts to collect
        #[arg(long)]
        limit: Option<usize>,

        /// Sort order (relevance, hot, top, new, comments)
        #[arg(long, default_value = "relevance")]
        sort: SortOrder,

        /// Time window (hour, day, week, month, year, all)
        #[arg(long, default_value = "all")]
        time_filter: TimeFilter,

        /// List a subreddit instead of searching site-wide
        #[arg(long)]
        subreddit: Option<String>,

        /// Report output directory
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Serve the HTTP API
    Serve {
        /// Listen address
        #[arg(long)]
        addr: Option<String>,
    },

    /// List prompt templates and their required variables
    Templates {
        /// Show only this stage (task name or alias such as `trend`)
        #[arg(long)]
        stage: Option<StageKind>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("strategist=debug,llm=debug,info")
    } else {
        EnvFilter::new("strategist=info,llm=info,warn")
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let config = StrategistConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Collect {
            query,
            limit,
            sort,
            time_filter,
            subreddit,
            out,
        } => {
            let request = CollectRequest {
                query,
                subreddit,
                sort,
                time_filter,
                limit: limit.unwrap_or(config.reddit.default_limit),
            };
            run_collect(&config, &request, &out).await
        }
        Commands::Analyze {
            input,
            query,
            output,
        } => {
            let dataset = Dataset::load(&input)
                .with_context(|| format!("Failed to load dataset {}", input.display()))?;
            let query = query.unwrap_or_else(|| dataset.query.clone());
            run_analyze(&config, dataset, &query, output).await
        }
        Commands::Run {
            query,
            limit,
            sort,
            time_filter,
            subreddit,
            output,
        } => {
            let request = CollectRequest {
                query: query.clone(),
                subreddit,
                sort,
                time_filter,
                limit: limit.unwrap_or(config.reddit.default_limit),
            };
            let dataset = collect(&config, &request).await?;
            run_analyze(&config, dataset, &query, output).await
        }
        Commands::Serve { addr } => run_serve(&config, addr).await,
        Commands::Templates { stage } => run_templates(&config, stage),
    }
}

fn build_collector(config: &StrategistConfig) -> Result<RedditClient> {
    let credentials = config.reddit_credentials()?;
    Ok(RedditClient::new(credentials)?
        .with_request_delay(Duration::from_millis(config.reddit.request_delay_ms)))
}

fn build_orchestrator(config: &StrategistConfig) -> Result<Orchestrator> {
    let mut provider = match &config.llm.api_key {
        Some(key) => AnthropicProvider::new(key.clone())?,
        None => AnthropicProvider::from_env()?,
    }
    .with_timeout(Duration::from_secs(config.llm.timeout_secs))?;
    if let Some(url) = &config.llm.base_url {
        provider = provider.with_base_url(url.clone());
    }

    let provider: Arc<dyn AIProvider> = Arc::new(RateLimitedProvider::per_minute(
        Arc::new(provider),
        config.llm.requests_per_minute,
    ));

    let templates = match &config.pipeline.templates_dir {
        Some(dir) => TemplateStore::from_dir(dir)?,
        None => TemplateStore::new()?,
    };

    Ok(Orchestrator::with_templates(
        config.to_pipeline_config(),
        provider,
        templates,
    )?)
}

async fn collect(config: &StrategistConfig, request: &CollectRequest) -> Result<Dataset> {
    let client = build_collector(config)?;

    println!(
        "{} Collecting posts for {}",
        "→".cyan(),
        request.query.bold()
    );
    let dataset = client.collect(request).await?;
    println!(
        "{} Collected {} posts, {} comments",
        "✓".green(),
        dataset.posts.len(),
        dataset.comment_count()
    );
    Ok(dataset)
}

async fn run_collect(
    config: &StrategistConfig,
    request: &CollectRequest,
    out: &Path,
) -> Result<()> {
    let dataset = collect(config, request).await?;
    dataset.save(out)?;
    println!("{} Dataset saved to {}", "✓".green(), out.display());
    Ok(())
}

async fn run_analyze(
    config: &StrategistConfig,
    dataset: Dataset,
    query: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let writer = ReportWriter::new(output.unwrap_or_else(|| config.output_dir.clone()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let ctx = orchestrator
        .context(Arc::new(dataset), query)
        .with_events(tx)
        .with_cancel(cancel.clone());

    println!(
        "{} Analyzing {} posts for {}",
        "→".cyan(),
        ctx.posts().len(),
        query.bold()
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let result = tokio::select! {
        result = orchestrator.execute(&ctx) => result,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            Err(PipelineError::Cancelled)
        }
    };
    drop(ctx);
    let _ = printer.await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {e}", "✗".red());
            return Err(e.into());
        }
    };

    let written = writer.write(&report)?;
    print_summary(&report);
    println!("{} Markdown: {}", "✓".green(), written.markdown.display());
    println!("{} JSON: {}", "✓".green(), written.json.display());
    Ok(())
}

async fn run_serve(config: &StrategistConfig, addr: Option<String>) -> Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let collector: Arc<dyn Collector> = Arc::new(build_collector(config)?);

    if config.server.api_token.is_none() {
        tracing::warn!("STRATEGIST_API_TOKEN not set - API is open");
    }

    let state = Arc::new(ServerState {
        orchestrator,
        collector,
        writer: Some(ReportWriter::new(config.output_dir.clone())),
        api_token: config.server.api_token.clone(),
        default_limit: config.reddit.default_limit,
    });

    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    run_server(state, &addr).await
}

fn run_templates(config: &StrategistConfig, stage: Option<StageKind>) -> Result<()> {
    let store = match &config.pipeline.templates_dir {
        Some(dir) => TemplateStore::from_dir(dir)?,
        None => TemplateStore::new()?,
    };

    println!("{}\n", "Prompt templates".bold());
    let selected = store
        .templates()
        .iter()
        .filter(|t| stage.is_none_or(|s| t.stage == s));
    for template in selected {
        println!("{} ({})", template.name.cyan(), template.stage.title());
        println!("   {}", template.description);
        println!("   variables: {}", template.required_variables.join(", "));
        let deps: Vec<_> = template
            .stage
            .depends_on()
            .iter()
            .map(ToString::to_string)
            .collect();
        if !deps.is_empty() {
            println!("   depends on: {}", deps.join(", "));
        }
        println!();
    }
    Ok(())
}

fn print_event(event: &StageEvent) {
    match event {
        StageEvent::Started { stage } => {
            println!("  {} {}", "…".dimmed(), stage.title());
        }
        StageEvent::Retrying {
            stage,
            attempt,
            delay,
            error,
        } => {
            println!(
                "  {} {} attempt {attempt} failed ({error}), retrying in {}s",
                "↻".yellow(),
                stage.title(),
                delay.as_secs()
            );
        }
        StageEvent::Completed {
            stage,
            status,
            duration,
        } => {
            let note = if *status == StageStatus::ShortCircuited {
                " (insufficient data)"
            } else {
                ""
            };
            println!(
                "  {} {}{note} in {:.1}s",
                "✓".green(),
                stage.title(),
                duration.as_secs_f64()
            );
        }
        StageEvent::Failed { stage, error } => {
            println!("  {} {}: {error}", "✗".red(), stage.title());
        }
    }
}

fn print_summary(report: &Report) {
    let usage = report.total_usage();
    println!("\n{}", "Report Summary".bold());
    println!("   Query: {}", report.query);
    println!("   Posts analyzed: {}", report.posts_analyzed);
    println!(
        "   Tokens: {} in / {} out",
        usage.input_tokens, usage.output_tokens
    );
    let failed = report.failed_stages();
    if !failed.is_empty() {
        let names: Vec<_> = failed.iter().map(|s| s.title()).collect();
        println!("   {} {}", "Incomplete:".yellow(), names.join(", "));
    }
}
