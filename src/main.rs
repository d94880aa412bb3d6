use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trailmate::backend::{AuthService, BackendClient, ProfileDirectory};
use trailmate::config::{AppConfig, ConfigError};
use trailmate::db::{self, PgProfileDirectory};
use trailmate::services::markers::SessionMarkers;
use trailmate::services::profile::ProfileSetupGate;
use trailmate::storage::FileStorage;
use trailmate::{AuthError, AuthState, GuardDecision, RouteGuard, SessionContext, SessionError, SessionStore};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("backend client setup failed: {0}")]
    Backend(#[from] AuthError),
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Parser, Debug)]
#[command(name = "trailmate", about = "Trailmate session CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in with email and password.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TRAILMATE_PASSWORD", hide_env_values = true)]
        password: String,
        /// Keep the session past the temporary-session TTL.
        #[arg(long)]
        remember: bool,
    },
    /// Create an account.
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TRAILMATE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// Restore the stored session and print the route decision.
    Status,
    /// Re-run the profile-setup check for the signed-in user.
    RefreshProfile,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = AppConfig::from_env()?;
    let store = build_store(&config).await?;

    let ctx = SessionContext::mount(store);
    ctx.ready().await;
    let store = ctx.store();

    match cli.command {
        Command::Login { email, password, remember } => {
            store.sign_in(&email, &password, remember).await?;
        }
        Command::Signup { email, password } => {
            store.sign_up(&email, &password).await?;
        }
        Command::Logout => store.sign_out().await?,
        Command::Status => {}
        Command::RefreshProfile => {
            store.refresh_profile_setup().await?;
        }
    }

    print_status(&store.snapshot());
    ctx.unmount();
    Ok(())
}

async fn build_store(config: &AppConfig) -> Result<SessionStore, CliError> {
    let storage = Arc::new(FileStorage::new(&config.storage_path));
    let backend = Arc::new(BackendClient::from_config(config, storage.clone())?);

    let directory: Arc<dyn ProfileDirectory> = match &config.database_url {
        Some(url) => {
            let pool = db::init_pool(url).await?;
            tracing::info!("profile lookups use direct database access");
            Arc::new(PgProfileDirectory::new(pool))
        }
        None => backend.clone(),
    };
    let auth: Arc<dyn AuthService> = backend;

    Ok(SessionStore::new(
        auth,
        ProfileSetupGate::new(directory),
        SessionMarkers::new(storage),
        config.session_settings(),
    ))
}

fn print_status(state: &AuthState) {
    let guard = RouteGuard::new();
    let decision = guard.evaluate(state);
    match &state.user {
        Some(user) => println!("user: {} ({})", user.email.as_deref().unwrap_or("-"), user.id),
        None => println!("user: signed out"),
    }
    match state.needs_profile_setup() {
        Some(needs_setup) => println!("needs profile setup: {needs_setup}"),
        None => println!("needs profile setup: unknown"),
    }
    match guard.redirect_path(decision) {
        Some(path) => println!("route: {decision:?} -> {path}"),
        None if decision == GuardDecision::RenderChildren => println!("route: {decision:?}"),
        None => println!("route: {decision:?} (pending)"),
    }
}
