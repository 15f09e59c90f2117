use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use copyforge::cli::commands::{analyses, analyze, config, recover, serve, status};
use copyforge::cli::{CommandContext, load_config, non_blank};
use copyforge::types::RequestDraft;

#[derive(Parser)]
#[command(name = "copyforge")]
#[command(
    version,
    about = "Resilient LLM pipeline that generates marketing-copy analyses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, global = true, help = "Configuration file (TOML)")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        #[arg(long, help = "Bind address (default from config)")]
        host: Option<String>,
        #[arg(long, short, help = "Port (default from config)")]
        port: Option<u16>,
    },

    /// Run one analysis and print the result
    Analyze {
        #[arg(long, short, help = "Market segment (required)")]
        segment: String,
        #[arg(long, help = "Product name")]
        product: Option<String>,
        #[arg(long, help = "Target audience")]
        audience: Option<String>,
        #[arg(long, help = "Product price")]
        price: Option<f64>,
        #[arg(long, help = "Revenue goal")]
        revenue_goal: Option<f64>,
        #[arg(long, help = "Marketing budget")]
        marketing_budget: Option<f64>,
        #[arg(long, help = "Launch window, e.g. '90 dias'")]
        launch_window: Option<String>,
        #[arg(long, help = "Known competitors")]
        competitors: Option<String>,
        #[arg(long, help = "Free-form additional context")]
        extra: Option<String>,
        #[arg(long, help = "Research query (synthesized when omitted)")]
        query: Option<String>,
        #[arg(long, help = "Reuse a session id")]
        session: Option<String>,
        #[arg(long, short, help = "Write the result JSON to this file")]
        output: Option<PathBuf>,
        #[arg(long, short, help = "Write the markdown report to this file")]
        report: Option<PathBuf>,
        #[arg(long, help = "Print the result JSON instead of a summary")]
        json: bool,
    },

    /// List stored analyses
    List {
        #[arg(long, short, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Show one stored analysis
    Show {
        id: String,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json, markdown"
        )]
        format: String,
    },

    /// Delete a stored analysis
    Delete { id: String },

    /// Store statistics
    Stats {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Provider, search, store and recorder health
    Status {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
        #[arg(long, help = "Probe every generation provider")]
        check: bool,
    },

    /// Consolidate the recorded steps of a session
    Recover {
        #[arg(help = "Session id; omit to list recorded sessions")]
        session: Option<String>,
        #[arg(long, short, help = "Write the bundle JSON to this file")]
        output: Option<PathBuf>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a configuration template
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mcopyforge encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "copyforge=debug,info"
    } else if cli.quiet {
        "error"
    } else {
        "copyforge=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Commands::Config { action } = &cli.command {
        match action {
            ConfigAction::Show { format } => config::show(format)?,
            ConfigAction::Path => config::path()?,
            ConfigAction::Init { global, force } => config::init(*global, *force)?,
        }
        return Ok(());
    }

    let settings = load_config(cli.config.as_deref())?;
    let rt = Runtime::new()?;

    match cli.command {
        Commands::Serve { host, port } => {
            rt.block_on(serve::run(settings, host, port))?;
        }
        Commands::Analyze {
            segment,
            product,
            audience,
            price,
            revenue_goal,
            marketing_budget,
            launch_window,
            competitors,
            extra,
            query,
            session,
            output,
            report,
            json,
        } => {
            let draft = RequestDraft {
                segment: non_blank(Some(segment)),
                product: non_blank(product),
                audience: non_blank(audience),
                price,
                revenue_goal,
                marketing_budget,
                launch_window: non_blank(launch_window),
                competitors: non_blank(competitors),
                extra_data: non_blank(extra),
                query: non_blank(query),
                session_id: non_blank(session),
            };
            rt.block_on(analyze::run(
                &settings,
                analyze::AnalyzeOptions {
                    draft,
                    output,
                    report,
                    json,
                    quiet: cli.quiet,
                },
            ))?;
        }
        Commands::List {
            limit,
            offset,
            format,
        } => {
            let ctx = CommandContext::new(settings)?;
            rt.block_on(analyses::list(&ctx, limit, offset, &format))?;
        }
        Commands::Show { id, format } => {
            let ctx = CommandContext::new(settings)?;
            rt.block_on(analyses::show(&ctx, &id, &format))?;
        }
        Commands::Delete { id } => {
            let ctx = CommandContext::new(settings)?;
            rt.block_on(analyses::delete(&ctx, &id))?;
        }
        Commands::Stats { format } => {
            let ctx = CommandContext::new(settings)?;
            rt.block_on(analyses::stats(&ctx, &format))?;
        }
        Commands::Status { format, check } => {
            rt.block_on(status::run(&settings, &format, check))?;
        }
        Commands::Recover {
            session,
            output,
            format,
        } => {
            let ctx = CommandContext::new(settings)?;
            match session {
                Some(session) => recover::run(&ctx, &session, output.as_deref(), &format)?,
                None => recover::sessions(&ctx)?,
            }
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
