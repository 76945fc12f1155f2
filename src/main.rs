//! swupd-manifest - build versioned update manifests from staged image trees

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use swupd::ops::{create_manifests, BundleStatus};
use swupd::{hash_path, AddressTable, BuildConfig, StateDir};

#[derive(Parser)]
#[command(name = "swupd-manifest")]
#[command(about = "generate versioned update manifests for an OS image")]
#[command(version)]
struct Cli {
    /// build configuration file
    #[arg(short, long, env = "SWUPD_CONFIG", default_value = "build.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// create the state directory and empty staging trees for a version
    Init {
        /// version to stage
        #[arg(short, long)]
        version: u32,
    },

    /// build and publish the manifests of a version
    Create {
        /// version to build
        #[arg(short, long)]
        version: u32,
    },

    /// print the content address of paths
    Hash {
        /// paths to hash (symlinks are not followed)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> swupd::Result<()> {
    match cli.command {
        Commands::Init { version } => {
            let config = BuildConfig::load(&cli.config)?;
            let state = StateDir::create(&config.state_dir)?;
            state.init_build_dirs(version, &config.bundle_names())?;
            println!(
                "initialized {} for version {}",
                state.version_image_path(version).display(),
                version
            );
        }

        Commands::Create { version } => {
            let config = BuildConfig::load(&cli.config)?;
            let table = AddressTable::new();
            let report = create_manifests(&config, version, &table)?;

            for bundle in &report.bundles {
                match &bundle.status {
                    BundleStatus::Updated { summary } => println!(
                        "{}: updated (+{} ~{} -{})",
                        bundle.name,
                        summary.added(),
                        summary.modified(),
                        summary.deleted()
                    ),
                    BundleStatus::Unchanged { version } => {
                        println!("{}: unchanged since {}", bundle.name, version)
                    }
                    BundleStatus::Failed(e) => println!("{}: skipped: {}", bundle.name, e),
                }
            }
            println!(
                "full: +{} ~{} -{}",
                report.full.added(),
                report.full.modified(),
                report.full.deleted()
            );
            println!("published version {} (previous {})", report.version, report.previous);
        }

        Commands::Hash { paths } => {
            for path in paths {
                let hashed = hash_path(&path)?;
                println!("{}\t{}\t{}", hashed.kind.flag(), hashed.digest, path.display());
            }
        }
    }

    Ok(())
}
