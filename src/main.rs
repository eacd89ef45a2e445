use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slika::cli::{self, Cli, Commands, DbCommands, DlqCommands, TxCommands};
use slika::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => slika::start(config).await,
        Commands::Tx(TxCommands::Show { tx_id }) => cli::handle_tx_show(&config, tx_id).await,
        Commands::Tx(TxCommands::Cancel { tx_id }) => cli::handle_tx_cancel(&config, tx_id).await,
        Commands::Dlq(DlqCommands::List) => cli::handle_dlq_list(&config).await,
        Commands::Dlq(DlqCommands::Requeue { event_id }) => {
            cli::handle_dlq_requeue(&config, event_id).await
        }
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config),
    }
}
