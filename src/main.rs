//! Command line entry point for club-push.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use dotenv::dotenv;
use log::debug;
use log::info;
use tracing_appender::non_blocking::WorkerGuard;
use uuid::Uuid;

use club_push::config::Config;
use club_push::logging::setup_logging;
use club_push::model::AudienceFilter;
use club_push::model::Message;
use club_push::model::UserId;
use club_push::push::gateway_transport::GatewayTransport;
use club_push::repository::Repository;
use club_push::service::Services;
use club_push::service::notification_service::DispatchOptions;

#[derive(Parser)]
#[command(name = "club-push", about = "Send push notifications to club members")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a notification to everyone or to the members of one sport.
    Send {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        /// Restrict the audience to members following this sport.
        #[arg(long)]
        sport: Option<String>,
        /// Portal path opened when the notification is clicked.
        #[arg(long)]
        url: Option<String>,
        /// Member sending the notification; enables the sender quota.
        #[arg(long)]
        sender: Option<Uuid>,
    },
    /// Show how many notifications a member may still send.
    Quota {
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let init_start = Instant::now();
    let (config, _log_guard) = load_config()?;
    let services = setup_services(&config, init_start)?;

    match cli.command {
        Command::Send {
            title,
            body,
            sport,
            url,
            sender,
        } => {
            let mut message = Message::new(title, body)?;
            if let Some(url) = url {
                message = message.with_url(url)?;
            }
            let audience = sport.map_or(AudienceFilter::Everyone, AudienceFilter::BySport);

            let summary = match sender {
                Some(sender) => {
                    services
                        .notification
                        .dispatch_as(UserId(sender), message, audience)
                        .await?
                }
                None => services.notification.dispatch(message, audience).await?,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Quota { user } => {
            let window_start = services.quota.window_start(chrono::Utc::now());
            let remaining = services
                .quota
                .remaining_quota(&UserId(user), window_start)
                .await?;
            println!("{remaining}");
        }
    }

    Ok(())
}

fn load_config() -> Result<(Config, WorkerGuard)> {
    debug!("Loading configuration...");
    let mut config = Config::new();
    config.load()?;
    let guard = setup_logging(&config)?;
    info!("Starting club-push...");
    Ok((config, guard))
}

fn setup_services(config: &Config, init_start: Instant) -> Result<Services> {
    debug!("Setting up Services...");
    let repository = Arc::new(Repository::from_config(config)?);
    let transport = Arc::new(GatewayTransport::from_config(config)?);
    let options = DispatchOptions::from_config(config)?;

    let services = Services::new(repository, transport, options);
    debug!(
        "Services setup complete ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );
    Ok(services)
}
