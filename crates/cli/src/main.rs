// Keypanel CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Every run reconciles from the persisted token first, then
// dispatches one action and renders the resulting panel view.

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use keypanel_core::{ActionOutcome, FileTokenStore, PanelController, SessionStore};
use keypanel_gateway::{GatewayConfig, HttpGateway, DEFAULT_BASE_URL};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "keypanel")]
#[command(about = "Keypanel CLI - Sign in and manage your API keys")]
#[command(version)]
pub struct Cli {
    /// Auth gateway base URL
    #[arg(long, env = "API_GATEWAY_URL", default_value = DEFAULT_BASE_URL)]
    pub api_url: String,

    /// Where the session token is kept (default: ~/.keypanel/token.json)
    #[arg(long, env = "KEYPANEL_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Print API key secrets in full instead of masked
    #[arg(long)]
    pub show_secrets: bool,

    /// Only print the outcome message
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the session state and API keys
    Status,

    /// Sign in and store the session token
    Login {
        /// Account email
        #[arg(long, short)]
        email: String,

        /// Account password
        #[arg(long, env = "KEYPANEL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Forget the stored session token
    Logout,

    /// Create an account
    Register {
        /// Account email
        #[arg(long, short)]
        email: String,

        /// Account password
        #[arg(long, env = "KEYPANEL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Password reset
    Reset {
        #[command(subcommand)]
        command: commands::account::ResetCommand,
    },

    /// Confirm an email address with the token from the verification mail
    VerifyEmail {
        /// Verification token
        token: String,
    },

    /// Manage API keys
    Keys {
        #[command(subcommand)]
        command: commands::keys::KeysCommand,
    },
}

fn default_token_file() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    home.join(".keypanel").join("token.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keypanel=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let token_file = cli.token_file.clone().unwrap_or_else(default_token_file);
    let session = SessionStore::open(FileTokenStore::new(&token_file))
        .with_context(|| format!("Failed to read session token: {}", token_file.display()))?;
    let session = Arc::new(session);

    let config = GatewayConfig::new(&cli.api_url);
    tracing::debug!(base_url = %config.base_url, "using auth gateway");
    let gateway = HttpGateway::new(&config, session.clone());
    let panel = PanelController::new(Arc::new(gateway), session);

    panel.init().await;

    let outcome = match cli.command {
        Commands::Status => ActionOutcome::Applied,
        Commands::Login { email, password } => {
            commands::account::login(&panel, &email, &password).await
        }
        Commands::Logout => commands::account::logout(&panel),
        Commands::Register { email, password } => {
            commands::account::register(&panel, &email, &password).await
        }
        Commands::Reset { command } => commands::account::reset(&panel, command).await,
        Commands::VerifyEmail { token } => commands::account::verify_email(&panel, &token).await,
        Commands::Keys { command } => commands::keys::run(&panel, command).await,
    };
    tracing::debug!(?outcome, "action finished");

    let view = panel.view();
    let format = output::OutputFormat::from_str(&cli.output);
    let options = output::RenderOptions {
        show_secrets: cli.show_secrets,
        quiet: cli.quiet,
    };
    print!("{}", output::render_view(&view, format, options)?);

    if view.message.is_error() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
