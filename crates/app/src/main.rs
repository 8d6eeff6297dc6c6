//! Service binary: Postgres + Redis Streams wiring for the registration module
//! and the outbox relay.

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use clean_core::RegistrationId;
use clean_infra::config::{AppConfig, FromEnv};
use clean_infra::db::{apply_schema, connect, PgTransactionManager};
use clean_infra::outbox::{OutboxManager, PgOutboxStore, OUTBOX_SCHEMA};
use clean_infra::publisher::RedisStreamsPublisher;
use clean_infra::Shutdown;
use clean_registration::{
    ConfirmRegistration, CreateRegistration, FetchRegistration, PgRegistrationRepository,
    RegistrationModule, REGISTRATION_SCHEMA,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Registration service with a transactional outbox relay")]
struct Args {
    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the outbox relay until interrupted (default).
    Serve,
    /// Run a single outbox delivery cycle and exit.
    Drain,
    /// Create a registration.
    Register {
        #[arg(long)]
        email: String,
    },
    /// Confirm a registration.
    Confirm {
        #[arg(long)]
        id: RegistrationId,
    },
    /// Print a registration as JSON.
    Show {
        #[arg(long)]
        id: RegistrationId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    clean_observability::init();

    let args = Args::parse();
    let config = AppConfig::from_env().context("loading configuration")?;

    let pool = connect(&config.database).await.context("connecting to postgres")?;
    apply_schema(&pool, "outbox", OUTBOX_SCHEMA).await?;
    apply_schema(&pool, "registrations", REGISTRATION_SCHEMA).await?;
    let transactions = PgTransactionManager::new(pool);

    let publisher = RedisStreamsPublisher::connect(&config.broker.redis_url, config.broker.stream_prefix.clone())
        .await
        .context("connecting to redis")?;

    let outbox = OutboxManager::new(
        transactions.clone(),
        PgOutboxStore::new(),
        publisher,
        config.outbox.clone(),
    );
    let module = RegistrationModule::build(transactions, PgRegistrationRepository::new(), outbox.clone())?;

    match args.command.unwrap_or(Cmd::Serve) {
        Cmd::Serve => {
            let shutdown = Shutdown::new();
            outbox.start(&shutdown);
            info!(?module, "service ready");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            info!("interrupt received");
            shutdown.shutdown(config.shutdown_grace).await?;
        }
        Cmd::Drain => {
            let outcome = outbox.consume().await?;
            info!(?outcome, "outbox drained");
        }
        Cmd::Register { email } => {
            let id = module
                .commands()
                .dispatch(CreateRegistration { email })
                .await?;
            println!("{id}");
        }
        Cmd::Confirm { id } => {
            module
                .commands()
                .dispatch(ConfirmRegistration { id })
                .await?;
        }
        Cmd::Show { id } => {
            let view = module.queries().ask(FetchRegistration { id }).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
    }

    Ok(())
}
