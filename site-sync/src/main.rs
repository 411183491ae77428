//! cwl - pull hosted sites to local directories and push them back.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use app_directory::{ApplicationDirectory, CloudwaysClient};
use clap::{Parser, Subcommand};
use site_sync::engine::restore_local_database;
use site_sync::site::{remove_site, resolve_site_arg};
use site_sync::{utils, Config, PullOptions, PushOptions, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "cwl", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull an application's files and database into a local site
    Pull {
        /// Application ID
        #[arg(short, long)]
        app: String,
        /// Site directory (defaults to <sites-root>/<slug>)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Stream a single tar archive before trying rsync
        #[arg(long)]
        archive: bool,
        /// The application is live; later pushes always go to a clone
        #[arg(long)]
        from_live: bool,
    },
    /// Push a local site to an application
    Push {
        /// Site name or directory (defaults to the current directory)
        site: Option<String>,
        /// Target application ID
        #[arg(long)]
        to_app: Option<String>,
        /// Label for a newly created clone
        #[arg(long)]
        new_label: Option<String>,
        #[arg(long, conflicts_with = "db_only")]
        files_only: bool,
        #[arg(long)]
        db_only: bool,
        /// Site URL on the target (defaults to its current siteurl)
        #[arg(long)]
        target_url: Option<String>,
    },
    /// Local database commands
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Test SSH and SFTP connectivity for an application
    Ssh {
        #[arg(short, long)]
        app: String,
    },
    /// List applications
    Apps,
    /// Clone an application on the hosting platform
    Clone {
        #[arg(short, long)]
        app: String,
        /// Server to create the clone on
        #[arg(short, long)]
        server: String,
        #[arg(long)]
        label: String,
    },
    /// Stop and delete a local site
    Rm {
        site: Option<String>,
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Import the pulled dump into the site's local database
    Import { site: Option<String> },
}

fn site_dir(config: &Config, site: Option<&str>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("reading current directory")?;
    Ok(resolve_site_arg(site, &config.sites.root, &cwd)?)
}

fn engine(config: &Config) -> Result<SyncEngine> {
    let client = CloudwaysClient::new(config.directory_config())?;
    Ok(SyncEngine::new(Arc::new(client), config.clone()))
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("Warning: {warning}");
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!("cwl v{}", env!("CARGO_PKG_VERSION"));

    Ok(report(run(args.command, &config).await))
}

/// Log a failed command once and turn it into an exit status.
fn report(result: Result<ExitCode>) -> ExitCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<ExitCode> {
    match command {
        Command::Pull {
            app,
            dir,
            archive,
            from_live,
        } => {
            let report = engine(config)?
                .synchronize_pull(
                    &app,
                    PullOptions {
                        directory: dir,
                        archive,
                        live_source: from_live,
                    },
                )
                .await?;
            print_warnings(&report.warnings);
            println!(
                "Pulled into {} via {} as {} ({})",
                report.local_directory.display(),
                report.outcome.method,
                report.outcome.candidate.identity.user,
                report.outcome.candidate.remote_path
            );
            match report.resolved_database_name {
                Some(name) => println!("Database {name} saved; run `cwl db import` to restore it"),
                None => println!("No database was pulled"),
            }
        }
        Command::Push {
            site,
            to_app,
            new_label,
            files_only,
            db_only,
            target_url,
        } => {
            let dir = site_dir(config, site.as_deref())?;
            let report = engine(config)?
                .synchronize_push(
                    &dir,
                    PushOptions {
                        target_app_id: to_app,
                        new_label,
                        files_only,
                        db_only,
                        target_url,
                    },
                )
                .await?;
            print_warnings(&report.warnings);
            if report.cloned {
                println!("Created application {} to push into", report.target_app_id);
            }
            println!("Pushed {} to application {}", dir.display(), report.target_app_id);
        }
        Command::Db {
            command: DbCommand::Import { site },
        } => {
            let dir = site_dir(config, site.as_deref())?;
            let report = restore_local_database(&dir, &config.database).await?;
            print_warnings(&report.warnings);
            println!("Imported {} into {}", report.dump.display(), report.db_name);
            if let Some(previous) = report.rewritten_from {
                println!("Replaced {previous} with the local URL");
            }
        }
        Command::Ssh { app } => {
            let report = engine(config)?.diagnose(&app).await?;
            println!("Testing connectivity to {}:{}", report.host, report.port);
            print!("{report}");
            return Ok(ExitCode::from(report.exit_code() as u8));
        }
        Command::Apps => {
            let client = CloudwaysClient::new(config.directory_config())?;
            for deployed in client.list_applications().await? {
                println!(
                    "{}\t{}\t{} {}",
                    deployed.app.id,
                    deployed.app.label,
                    deployed.server.label,
                    deployed.server.public_ip.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Clone { app, server, label } => {
            let client = CloudwaysClient::new(config.directory_config())?;
            let new_id = client.clone_application(&app, &server, &label).await?;
            println!("Created application {new_id}");
        }
        Command::Rm { site, yes } => {
            let dir = site_dir(config, site.as_deref())?;
            confirm_removal(&dir, yes)?;
            remove_site(&dir).await?;
            println!("Removed {}", dir.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn confirm_removal(dir: &Path, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to delete {} without --yes", dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_becomes_exit_status() {
        let status = |code: ExitCode| format!("{code:?}");
        assert_eq!(status(report(Ok(ExitCode::from(2)))), status(ExitCode::from(2)));
        assert_eq!(
            status(report(Err(anyhow::anyhow!("boom")))),
            status(ExitCode::FAILURE)
        );
    }

    #[test]
    fn test_removal_needs_confirmation() {
        assert!(confirm_removal(Path::new("/sites/shop"), false).is_err());
        assert!(confirm_removal(Path::new("/sites/shop"), true).is_ok());
    }
}
