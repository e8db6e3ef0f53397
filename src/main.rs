use std::error::Error;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use regulation_workspace::backend::InMemoryChangeManagement;
use regulation_workspace::config::context::build_workspace;
use regulation_workspace::config::schema::load_config;
use regulation_workspace::data_types::VersionId;
use regulation_workspace::utils::setup_tracing;

#[derive(Debug, Parser)]
#[clap(about = "Inspect the workspace of a regulation version", version)]
struct Args {
    #[clap(short, long, default_value = "workspace.toml")]
    config_path: PathBuf,

    #[clap(long, help = "Emit logs as JSON")]
    json_logs: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the table catalog of a version
    Catalog {
        version: String,
        #[clap(long, help = "Bypass and repopulate the catalog cache")]
        refresh: bool,
    },
    /// Print one table of a version
    Table { version: String, name: String },
    /// List a folder of a version's working copy with its status against master
    Files { version: String, folder: String },
    /// Print a file of a version's working copy
    Read { version: String, path: String },
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn Error + Send + Sync>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = load_config(&args.config_path)?;

    let change_management = Arc::new(InMemoryChangeManagement::default());
    let version = match &args.command {
        Command::Catalog { version, .. }
        | Command::Table { version, .. }
        | Command::Files { version, .. }
        | Command::Read { version, .. } => VersionId::from(version.as_str()),
    };
    // Whoever runs this names an existing version
    if !version.is_master() {
        change_management.add_candidate(version.clone(), version.as_str());
    }

    let workspace = build_workspace(config, change_management)?;

    match &args.command {
        Command::Catalog { refresh, .. } => {
            print_json(&*workspace.catalogs.get_catalog(&version, *refresh).await?)?
        }
        Command::Table { name, .. } => {
            print_json(&workspace.catalogs.get_table(&version, name, false).await?)?
        }
        Command::Files { folder, .. } => {
            let files = workspace.files(&version).await?;
            print_json(&files.get_file_list(folder).await?)?
        }
        Command::Read { path, .. } => {
            let files = workspace.files(&version).await?;
            let (content, etag) = files.read_file_with_etag(path).await?;
            info!("ETag of {path}: {etag}");
            println!("{content}");
        }
    }

    workspace.release_version(&version).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = setup_tracing(args.json_logs) {
        eprintln!("Error setting up logging: {e}");
        exit(1);
    }

    if let Err(e) = run(args).await {
        error!("{e}");
        exit(1);
    }
}
