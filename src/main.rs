use anyhow::{Context, anyhow};
use brosfiles_uploader::error::UploadError;
use brosfiles_uploader::services::auth::AuthClient;
use brosfiles_uploader::services::form::fetch_upload_form;
use brosfiles_uploader::utils::validation::read_selected_file;
use brosfiles_uploader::{
    ConsoleUi, ReqwestTransport, SessionContext, UploadForm, UploadSequencer, UploadUi,
    UploaderConfig,
};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "brosfiles")]
#[command(about = "Upload files to a BrosFiles server through signed URLs", long_about = None)]
struct Cli {
    /// Server base URL (overrides BROSFILES_URL)
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file. Only the first FILE is uploaded.
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Mark the file as private
        #[arg(long)]
        private: bool,

        /// CSRF token to send instead of the one from the upload page
        #[arg(long)]
        csrf_token: Option<String>,

        /// Size limit in bytes instead of the one from the upload page
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Do not load the upload page; build the form from flags only
        #[arg(long)]
        no_form: bool,
    },

    /// Sign in and store the tokens
    Login {
        username: String,

        /// Password (default: BROSFILES_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },

    /// Get a new access token with the stored refresh token
    Refresh,

    /// Forget the stored tokens
    Logout,

    /// Show whether a session is stored
    Whoami,
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brosfiles_uploader=info,brosfiles=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Upload failures were already shown through the console alert
        if e.downcast_ref::<UploadError>().is_none() {
            error!("❌ {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = UploaderConfig::from_env();
    if let Some(url) = cli.url {
        config.base_url = url;
    }

    // One client for everything so cookies from the upload page are reused
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .build()?;

    let mut session = SessionContext::init(&config.session_file)
        .with_context(|| format!("loading session from {}", config.session_file.display()))?;

    match cli.command {
        Commands::Upload {
            files,
            private,
            csrf_token,
            max_file_size,
            no_form,
        } => {
            let upload_url = config.upload_url();
            let transport = Arc::new(ReqwestTransport::from_client(client));
            let bearer = session.access_token().map(str::to_string);

            let mut form = if no_form {
                let token = csrf_token
                    .clone()
                    .ok_or_else(|| anyhow!("--csrf-token is required with --no-form"))?;
                UploadForm::new(token, Some(config.max_file_size), private)
            } else {
                info!("📝 Loading upload form from {}", upload_url);
                fetch_upload_form(transport.as_ref(), &upload_url, bearer.as_deref()).await?
            };

            if let Some(token) = csrf_token {
                form.csrf_token = token;
            }
            if let Some(limit) = max_file_size {
                form.max_file_size = limit;
            }
            form.is_private |= private;

            if files.len() > 1 {
                warn!("Only one file per upload, ignoring {} more", files.len() - 1);
            }
            let ui = Arc::new(ConsoleUi::new(&config.base_url));
            let file = match read_selected_file(&files[0], form.max_file_size).await {
                Ok(file) => file,
                Err(e) => {
                    ui.alert(&e.to_string());
                    return Err(e.into());
                }
            };
            let receipt = UploadSequencer::new(vec![file], &form, upload_url, transport, ui)?
                .with_bearer_token(bearer)
                .upload()
                .await?;

            info!("🎉 {} uploaded", receipt.filename);
        }

        Commands::Login { username, password } => {
            let password = password
                .or_else(|| std::env::var("BROSFILES_PASSWORD").ok())
                .ok_or_else(|| anyhow!("pass --password or set BROSFILES_PASSWORD"))?;

            AuthClient::new(client, &config)
                .sign_in(&mut session, &username, &password)
                .await?;
        }

        Commands::Refresh => {
            AuthClient::new(client, &config)
                .refresh_session(&mut session)
                .await?;
        }

        Commands::Logout => {
            session.clear()?;
            info!("👋 Signed out");
        }

        Commands::Whoami => {
            if session.is_authenticated() {
                println!("Signed in (session: {})", session.path().display());
            } else {
                println!("Not signed in");
            }
        }
    }

    Ok(())
}
