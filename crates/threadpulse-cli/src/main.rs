use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use threadpulse_core::{build_pipeline, load_config, AppContext, ThreadpulseConfig};
use threadpulse_schema::ChatMessage;
use threadpulse_server::state::AppState;
use threadpulse_server::{serve, ServiceRole};

#[derive(Parser)]
#[command(name = "threadpulse", version, about = "Reddit sentiment analysis service")]
struct Cli {
    #[arg(
        long,
        short = 'c',
        help = "Config file (defaults to ./threadpulse.yaml if present)"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Also write daily-rolling logs to this directory")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the HTTP services")]
    Serve {
        #[arg(long, value_enum, default_value_t = Role::All)]
        role: Role,
        #[arg(
            long,
            help = "Listen address; with --role all, serves every route on this one address"
        )]
        bind: Option<String>,
    },
    #[command(about = "Analyze one subreddit/topic and print the JSON result")]
    Analyze {
        #[arg(long)]
        subreddit: String,
        #[arg(long)]
        topic: String,
    },
    #[command(about = "Local chat REPL (history is kept in this process)")]
    Chat,
    #[command(about = "Validate the config file")]
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Analysis and chat services on their configured addresses.
    All,
    Analysis,
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref())?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;

    match command {
        Commands::Validate => {
            println!("{}", describe(&config));
        }
        Commands::Serve { role, bind } => {
            run_services(&config, role, bind).await?;
        }
        Commands::Analyze { subreddit, topic } => {
            let pipeline = build_pipeline(&config);
            let report = pipeline.report(&subreddit, &topic).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Chat => {
            run_repl(&config).await?;
        }
    }

    Ok(())
}

fn init_tracing(
    log_dir: Option<&std::path::Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "threadpulse.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn describe(config: &ThreadpulseConfig) -> String {
    let present = |v: &Option<String>| if v.is_some() { "set" } else { "missing" };
    format!(
        "Config valid. analysis on {}, chat on {}; reddit credentials {}; model dir {}; \
         chat provider {:?} (key {}), mode {:?}, tool backend {:?}.",
        config.server.analysis_bind,
        config.server.chat_bind,
        if config.source.client_id.is_some() && config.source.client_secret.is_some() {
            "set"
        } else {
            "missing"
        },
        present(&config.classifier.model_dir),
        config.chat.provider.provider_type,
        present(&config.chat.provider.api_key),
        config.chat.mode,
        config.chat.tool.backend,
    )
}

async fn run_services(config: &ThreadpulseConfig, role: Role, bind: Option<String>) -> Result<()> {
    let state = AppState::from(AppContext::from_config(config));

    match (role, bind) {
        (Role::All, None) => {
            let analysis = serve(
                state.clone(),
                ServiceRole::Analysis,
                &config.server.analysis_bind,
            );
            let chat = serve(state, ServiceRole::Chat, &config.server.chat_bind);
            tokio::try_join!(analysis, chat)?;
        }
        (Role::All, Some(addr)) => serve(state, ServiceRole::All, &addr).await?,
        (Role::Analysis, bind) => {
            let addr = bind.unwrap_or_else(|| config.server.analysis_bind.clone());
            serve(state, ServiceRole::Analysis, &addr).await?;
        }
        (Role::Chat, bind) => {
            let addr = bind.unwrap_or_else(|| config.server.chat_bind.clone());
            serve(state, ServiceRole::Chat, &addr).await?;
        }
    }
    Ok(())
}

async fn run_repl(config: &ThreadpulseConfig) -> Result<()> {
    let ctx = AppContext::from_config(config);

    println!("threadpulse chat. Type 'quit' to exit.");
    println!("Try: What do people think of the iPhone 16 on r/apple?");
    println!("---");

    let mut history: Vec<ChatMessage> = Vec::new();
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let resp = ctx.chat.respond(input, std::mem::take(&mut history)).await;
        println!("{}", resp.ai_response);
        history = resp.new_chat_history;
    }

    Ok(())
}
