use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use steel_consult::{
    build_consultant, chat, constants, load_prompt_builder, web_server, ClientConfig, ProjectForm,
};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    gemini: GeminiArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the Gemini connection. Unset values fall back to the
/// GEMINI_* environment variables, then to built-in defaults.
#[derive(clap::Args, Debug)]
struct GeminiArgs {
    #[arg(long, global = true, help = "Gemini model name.")]
    model: Option<String>,
    #[arg(long, global = true, help = "Base URL of the generative language API.")]
    base_url: Option<String>,
    #[arg(long, global = true, help = "Request timeout in seconds (transport default if unset).")]
    timeout_secs: Option<u64>,
    #[arg(
        long,
        global = true,
        env = "STEEL_CONSULT_PROMPT_TEMPLATE",
        help = "Prompt template file to use instead of the bundled one."
    )]
    prompt_template: Option<PathBuf>,
}

impl GeminiArgs {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        config.timeout = self.timeout_secs.map(Duration::from_secs);
        config
    }
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the consultation web server.
    Start {
        #[arg(long, env = "STEEL_CONSULT_PORT", default_value_t = constants::DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[arg(long, default_value = "0.0.0.0", help = "Address to bind.")]
        bind: IpAddr,
        #[arg(long, help = "Directory with page templates.")]
        templates: Option<String>,
        #[arg(long, help = "Directory with static assets.")]
        static_dir: Option<String>,
        #[arg(
            long,
            env = "STEEL_CONSULT_SESSION_IDLE_SECS",
            default_value_t = constants::DEFAULT_SESSION_IDLE_SECS,
            help = "Close web sessions idle for this many seconds."
        )]
        session_idle_secs: u64,
    },
    /// Run a consultation in the terminal.
    Chat,
    /// Print the prompt that would be sent for a project and question.
    Prompt {
        #[arg(long)]
        plot_size: Option<String>,
        #[arg(long)]
        construction_type: Option<String>,
        #[arg(long)]
        stories: Option<String>,
        #[arg(long)]
        house_type: Option<String>,
        #[arg(long)]
        foundation_type: Option<String>,
        #[arg(long)]
        roof_type: Option<String>,
        #[arg(long)]
        special_requirements: Option<String>,
        /// The question to ask.
        message: String,
    },
}

// The main entry point of the application, using tokio's async runtime
#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for GEMINI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g., RUST_LOG=info,steel_consult=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("steel-consult starting with command: {:?}", cli.command);

    let prompt_template = cli.gemini.prompt_template.as_deref();

    match cli.command {
        Commands::Start {
            port,
            bind,
            templates,
            static_dir,
            session_idle_secs,
        } => {
            let config = cli.gemini.client_config();
            if config.api_key.is_empty() {
                warn!("GEMINI_API_KEY is not set; every answer will be an error message");
            }
            let consultant = build_consultant(config, prompt_template)?;
            let assets = web_server::WebAssets {
                templates_dir: templates.unwrap_or_else(|| constants::TEMPLATES_DIR.clone()),
                static_dir: static_dir.unwrap_or_else(|| constants::STATIC_DIR.clone()),
            };
            let addr = SocketAddr::new(bind, port);
            let sweeper = consultant.spawn_idle_sweeper(Duration::from_secs(session_idle_secs));

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = web_server::start_web_server(addr, consultant, assets).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, shutting down...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            sweeper.abort();
            info!("Shutdown complete.");
        }
        Commands::Chat => {
            let config = cli.gemini.client_config();
            if config.api_key.is_empty() {
                warn!("GEMINI_API_KEY is not set; every answer will be an error message");
            }
            let consultant = build_consultant(config, prompt_template)?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            chat::run_chat(consultant, stdin, tokio::io::stdout())
                .await
                .context("Chat session failed")?;
        }
        Commands::Prompt {
            plot_size,
            construction_type,
            stories,
            house_type,
            foundation_type,
            roof_type,
            special_requirements,
            message,
        } => {
            let form = ProjectForm {
                plot_size,
                construction_type,
                stories,
                house_type,
                foundation_type,
                roof_type,
                special_requirements,
                first_query: Some(message),
            };
            let validated = form.validate().context("Invalid project parameters")?;
            let builder = load_prompt_builder(prompt_template)?;
            let prompt = builder
                .build(&validated.first_query, &validated.params)
                .context("Failed to render prompt")?;
            println!("{}", prompt);
        }
    }

    Ok(())
}
