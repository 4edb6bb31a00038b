use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use envault::cli::{Cli, Commands};
use envault::core::{
    sweep_orphaned_scratch, ArchiveReader, BackupJob, BackupManager, DeploymentConfig,
    RelationalDumpSpec, RestoreJob, RestoreManager,
};
use envault::utils::{default_output_path, format_bytes, parse_exclusions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Export { output, exclude } => {
            handle_export(&config_path, output, exclude).await?;
        }
        Commands::Import { archive } => {
            handle_import(&config_path, archive)?;
        }
        Commands::Inspect { archive } => {
            handle_inspect(&archive)?;
        }
    }

    Ok(())
}

async fn handle_export(
    config_path: &Path,
    output: Option<PathBuf>,
    exclude: Option<String>,
) -> Result<()> {
    let config = DeploymentConfig::load(config_path)?;
    let scratch_parent = config.scratch_dir();

    let swept = sweep_orphaned_scratch(&scratch_parent)?;
    if swept > 0 {
        println!("Cleaned up {} orphaned scratch director{}", swept, if swept == 1 { "y" } else { "ies" });
    }

    let output = output.unwrap_or_else(default_output_path);
    let exclusions = match exclude {
        Some(raw) => parse_exclusions(&raw),
        None => config.exclusions(),
    };

    let job = BackupJob {
        output_path: output,
        storage_root: config.storage_root()?,
        data_dump_command: config.data_dump_command()?,
        dump: RelationalDumpSpec {
            pg_dump_bin: config.pg_dump_bin().to_string(),
            connection_uri: config.connection_uri()?,
            redacted_uri: config.redacted_uri()?,
        },
        exclusions,
    };

    println!("Exporting deployment state");
    println!("  storage:  {}", job.storage_root.display());
    println!("  database: {}", job.dump.redacted_uri);
    println!("  excluded: {}", job.exclusions.join(", "));

    let manager = BackupManager::new(config.process_timeout(), scratch_parent);
    let path = manager.run(&job).await?;

    let size = fs::metadata(&path)?.len();
    println!("\nExport complete: {} ({})", path.display(), format_bytes(size));
    Ok(())
}

fn handle_import(config_path: &Path, archive: PathBuf) -> Result<()> {
    let config = DeploymentConfig::load(config_path)?;

    let job = RestoreJob {
        archive_path: archive,
        target_storage_root: config.storage_root()?,
        dump_target_dir: config.db_dir(),
    };

    println!("Importing {}", job.archive_path.display());
    let report = RestoreManager::new().run(&job)?;

    println!("Restored {} archive entries", report.entries_extracted);
    println!("  storage tree:    {}", report.storage_root.display());
    println!("  relational dump: {}", report.relational_dump.display());
    println!("  data dump:       {}", report.data_dump.display());
    println!();
    println!("Import complete. Run the data loader against the staged dumps,");
    println!("then restart your dependent services to activate the restored data.");
    Ok(())
}

fn handle_inspect(archive: &Path) -> Result<()> {
    let mut reader = ArchiveReader::open(archive)?;
    let names = reader.entry_names()?;

    println!("{} ({} entries)\n", archive.display(), names.len());
    for name in names {
        println!("  {}", name);
    }
    Ok(())
}
