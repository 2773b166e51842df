mod bot;
mod config;
mod gate;
mod pay;
mod plan;
mod services;
mod state;
mod web;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use teloxide::prelude::*;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;
use crate::gate::TelegramGate;
use crate::services::payment_service::PaymentService;
use crate::services::sweeper::Sweeper;
pub use crate::state::AppState;

#[derive(Parser)]
#[command(name = "clubgate")]
#[command(about = "Telegram subscription bot with paid channel access", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot, the webhook server and the background sweeper
    Serve,
    /// Administrative tools
    Admin {
        #[command(subcommand)]
        subcommand: AdminCommands,
    },
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Confirm an invoice by hand, as if the provider had called back
    ConfirmInvoice {
        /// Provider invoice id
        invoice_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        println!("⚠️  Warning: Failed to load .env file: {}", e);
    }

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "clubgate_bot=debug,axum=info,tower_http=info,sqlx=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stdout))
        .init();

    let settings = Arc::new(Settings::from_env()?);
    let pool = clubgate_db::connect(&settings.database_url).await?;
    info!("database initialized");

    match cli.command {
        Commands::Serve => {
            run_server(pool, settings).await?;
        }
        Commands::Admin { subcommand } => match subcommand {
            AdminCommands::ConfirmInvoice { invoice_id } => {
                let payments = PaymentService::new(pool, settings);
                match payments.confirm_payment(&invoice_id).await {
                    Ok(sub) => {
                        println!(
                            "Invoice {} confirmed: plan {} active until {}",
                            invoice_id, sub.plan, sub.expires_at
                        );
                    }
                    Err(e) => {
                        println!("Failed to confirm invoice {}: {}", invoice_id, e);
                    }
                }
            }
        },
    }

    Ok(())
}

async fn run_server(pool: clubgate_db::sqlx::PgPool, settings: Arc<Settings>) -> Result<()> {
    let bot = Bot::new(settings.bot_token.clone());
    let gate = Arc::new(TelegramGate::new(bot.clone()));
    let state = AppState::new(pool, settings, gate);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                let _ = shutdown_tx.send(());
            }
        });
    }

    let web_handle = {
        let state = state.clone();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = web::serve(state, rx).await {
                error!("webhook server error: {:#}", e);
            }
        })
    };

    let sweeper_handle = {
        let sweeper = Sweeper::new(state.clone());
        let rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            sweeper.run(rx).await;
        })
    };

    bot::run_bot(bot, shutdown_tx.subscribe(), state).await;

    // Bot exit (dispatch end or signal) takes the rest of the process down.
    let _ = shutdown_tx.send(());
    let _ = web_handle.await;
    let _ = sweeper_handle.await;
    info!("shutdown complete");
    Ok(())
}
