//! marksync CLI - one bookmark sync device on the command line
//!
//! Each data directory is a device: its bookmark tree, its sync database and
//! the relay directory it shares with the other devices of its chain.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, OrderCommands, SetupCommands};
use crate::commands::add::{run_add, run_mkdir};
use crate::commands::common::Workspace;
use crate::commands::delete::run_delete;
use crate::commands::devices::{run_devices, run_forget};
use crate::commands::edit::{run_move, run_rename};
use crate::commands::list::run_list;
use crate::commands::order::{run_order_between, run_order_sort};
use crate::commands::setup::{
    run_reset, run_setup_join, run_setup_new, run_status, run_toggle, run_words,
};
use crate::commands::sync::run_sync;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("marksync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Order utilities need no device state.
    if let Commands::Order(command) = &cli.command {
        return match command {
            OrderCommands::Sort { keys } => run_order_sort(keys),
            OrderCommands::Between {
                parent,
                after,
                before,
            } => run_order_between(parent, after.as_deref(), before.as_deref()),
        };
    }

    let workspace = Workspace::resolve(cli.data_dir, cli.relay)?;

    match cli.command {
        Commands::Setup(SetupCommands::New { name }) => run_setup_new(&workspace, name).await,
        Commands::Setup(SetupCommands::Join { words, name }) => {
            run_setup_join(&workspace, &words, name).await
        }
        Commands::Words => run_words(&workspace),
        Commands::Status => run_status(&workspace),
        Commands::Toggle { setting, value } => run_toggle(&workspace, setting, value),
        Commands::Add {
            url,
            title,
            parent,
            index,
        } => run_add(&workspace, &url, title.as_deref(), parent, index),
        Commands::Mkdir {
            title,
            parent,
            index,
        } => run_mkdir(&workspace, &title, parent, index),
        Commands::Rename { id, title } => run_rename(&workspace, id, &title),
        Commands::Move { id, parent, index } => run_move(&workspace, id, parent, index),
        Commands::Delete { id } => run_delete(&workspace, id),
        Commands::List { verbose, json } => run_list(&workspace, verbose, json),
        Commands::Sync { watch } => run_sync(&workspace, watch).await,
        Commands::Devices { json } => run_devices(&workspace, json),
        Commands::Forget { object_id } => run_forget(&workspace, &object_id).await,
        Commands::Reset => run_reset(&workspace).await,
        Commands::Order(_) => Ok(()),
    }
}
