//! Running the CLI

// Allow exits because in this file we ideally handle all errors with known exit codes
#![allow(clippy::exit)]

use std::ops::ControlFlow;

use clap::Parser;

use crate::db::errors::StoreError;
use crate::db::models::commit::iterator::CommitFilter;
use crate::db::models::commit::picker::{pick_commit, CommitPicker};
use crate::db::models::commit::watch::{
    watch_commit, watch_commits, watch_commits_in_repo, Listener, WatchHandler,
};
use crate::db::models::commit::{Commit, CommitId, Manager};
use crate::db::{init, DatabaseConnection};

/// Strata is a transactional commit graph store. Point it at a Postgres
/// database with `--database-url` or the `DATABASE_URL` environment
/// variable.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database URL. Defaults to the DATABASE_URL environment variable.
    #[arg(long)]
    database_url: Option<String>,
    /// Strata cli subcommands
    #[command(subcommand)]
    subcommands: Subcommands,
}

///
#[derive(Clone, clap::Subcommand)]
enum Subcommands {
    /// Apply the embedded schema and exit.
    Migrate,
    /// List commits matching the given filters as JSON lines.
    List {
        /// Match the project name.
        #[arg(long)]
        project: Option<String>,
        /// Match the repo name.
        #[arg(long)]
        repo: Option<String>,
        /// Match the repo type.
        #[arg(long = "type")]
        repo_type: Option<String>,
        /// Match the commit-set id.
        #[arg(long)]
        commit_set: Option<String>,
        /// Match the branch name.
        #[arg(long)]
        branch: Option<String>,
    },
    /// Resolve a commit picker given as JSON and print the commit.
    Pick {
        /// The picker, e.g. '{"branch_head": {"repo": {...}, "name": "master"}}'.
        #[arg(long)]
        picker: String,
    },
    /// Stream a snapshot and then live changes as JSON lines.
    Watch {
        /// Watch only the commits of this repo id.
        #[arg(long, conflicts_with = "commit_id")]
        repo_id: Option<i64>,
        /// Watch only this commit id.
        #[arg(long)]
        commit_id: Option<CommitId>,
    },
}

///
fn init_tracing() {
    tracing_subscriber::fmt::init();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
}

/// Prints watch deliveries as JSON lines.
struct PrintHandler;

impl WatchHandler for PrintHandler {
    fn on_upsert(&mut self, commit: Commit) -> Result<(), StoreError> {
        print_commit(&commit);
        Ok(())
    }

    fn on_delete(&mut self, id: CommitId) -> Result<(), StoreError> {
        println!("{{\"deleted\":{id}}}");
        Ok(())
    }
}

fn print_commit(commit: &Commit) {
    match serde_json::to_string(commit) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(%err, "failed to encode commit"),
    }
}

async fn connect(cli: &Cli) -> anyhow::Result<DatabaseConnection> {
    init::connect(cli.database_url.as_deref()).await
}

/// Main entrypoint to application
///
/// # Errors
/// Errors if the database is unreachable or a subcommand fails.
#[tokio::main]
pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    tracing::debug!("Starting application");
    let cli = Cli::parse();

    match cli.subcommands.clone() {
        Subcommands::Migrate => {
            connect(&cli).await?;
            tracing::info!("schema applied");
            Ok(())
        }
        Subcommands::List {
            project,
            repo,
            repo_type,
            commit_set,
            branch,
        } => {
            let db = connect(&cli).await?;
            let filter = CommitFilter {
                repo_name: repo,
                repo_type,
                project_name: project,
                commit_set_id: commit_set,
                branch_name: branch,
            };
            db.for_each_commit(&filter, Vec::new(), |commit| {
                print_commit(&commit);
                Ok(ControlFlow::Continue(()))
            })
            .await?;
            Ok(())
        }
        Subcommands::Pick { picker } => {
            let db = connect(&cli).await?;
            let picker = CommitPicker::from_json(&picker)?;
            let mut tx = db.begin().await?;
            let commit = pick_commit(&mut tx, &picker).await?;
            tx.rollback().await?;
            print_commit(&commit);
            Ok(())
        }
        Subcommands::Watch { repo_id, commit_id } => {
            let db = connect(&cli).await?;
            let db_url = init::database_url(cli.database_url.as_deref())?;
            let listener = Listener::connect(&db_url).await?;
            let mut handler = PrintHandler;
            match (repo_id, commit_id) {
                (Some(repo_id), _) => {
                    watch_commits_in_repo(&db, &listener, repo_id, &mut handler).await?;
                }
                (_, Some(commit_id)) => {
                    watch_commit(&db, &listener, commit_id, &mut handler).await?;
                }
                _ => watch_commits(&db, &listener, &mut handler).await?,
            }
            Ok(())
        }
    }
}
