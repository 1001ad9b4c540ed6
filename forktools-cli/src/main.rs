use anyhow::Result;
use clap::{Parser, Subcommand};
use forktools_core::debugger::SessionMode;
use forktools_core::Config;
use std::path::PathBuf;

mod commands;

use commands::{changelog, drcrash, log_to_css, prune_deps};

#[derive(Parser)]
#[command(name = "forktools")]
#[command(version, about = "Maintenance tools for the downstream Envoy fork", long_about = None)]
struct Cli {
    /// Config file (defaults to ./forktools.toml when present)
    #[arg(long, global = true, env = "FORKTOOLS_CONFIG")]
    config: Option<PathBuf>,

    /// Git working directory
    #[arg(long, global = true, default_value = ".", env = "FORKTOOLS_REPO")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update the changelog based on git tags
    Changelog {
        /// Tag closest to head
        #[arg(short, long, requires = "bottom")]
        top: Option<String>,

        /// Tag previous to the head tag
        #[arg(short, long, requires = "top")]
        bottom: Option<String>,

        /// Changelog file to update
        #[arg(long, env = "FORKTOOLS_CHANGELOG")]
        changelog: Option<PathBuf>,

        /// Build properties file holding the builder version
        #[arg(long, env = "FORKTOOLS_BUILD_PROPERTIES")]
        properties: Option<PathBuf>,

        /// Print the new entry instead of writing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Write a repository locations file without unused dependencies
    PruneDeps {
        /// Envoy source tree the manifest paths are relative to
        #[arg(long, default_value = ".", env = "FORKTOOLS_ENVOY_ROOT")]
        root: PathBuf,

        /// Repository locations manifest
        #[arg(long, env = "FORKTOOLS_REPOSITORY_LOCATIONS")]
        locations: Option<PathBuf>,

        /// Build extensions config
        #[arg(long, env = "FORKTOOLS_BUILD_CONFIG")]
        build_config: Option<PathBuf>,

        /// Contrib extensions config
        #[arg(long, env = "FORKTOOLS_CONTRIB_CONFIG")]
        contrib_config: Option<PathBuf>,

        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show what would change in the output file without writing it
        #[arg(long)]
        check: bool,
    },

    /// Analyze an Envoy core dump
    Drcrash {
        /// Core file to analyze
        corefile: PathBuf,

        /// Print stacktrace and exit (the default)
        #[arg(short, long, conflicts_with = "debugger")]
        stacktrace: bool,

        /// Load coredump into debugger and you continue
        #[arg(short, long)]
        debugger: bool,

        /// Use this tag for the release instead of finding it from the coredump
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Highlight the identifiers found in a log in an SVG diagram
    LogToCss {
        /// Path to the logfile
        #[arg(long)]
        logfile: PathBuf,

        /// Path to the svg file
        #[arg(long)]
        svg: PathBuf,

        /// Path of the output file
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Changelog {
            top,
            bottom,
            changelog,
            properties,
            dry_run,
        } => {
            let tags = top.zip(bottom);
            changelog::run(tags, changelog, properties, dry_run, &cli.repo, &config)?;
        }
        Commands::PruneDeps {
            root,
            locations,
            build_config,
            contrib_config,
            output,
            check,
        } => {
            let mut deps = config.deps.clone();
            if let Some(path) = locations {
                deps.repository_locations = path;
            }
            if let Some(path) = build_config {
                deps.build_extensions = path;
            }
            if let Some(path) = contrib_config {
                deps.contrib_extensions = path;
            }
            if output.is_some() {
                deps.output = output;
            }
            prune_deps::run(&root, &deps, check)?;
        }
        Commands::Drcrash {
            corefile,
            stacktrace: _,
            debugger,
            tag,
        } => {
            let mode = if debugger {
                SessionMode::Interactive
            } else {
                SessionMode::StackTrace
            };
            drcrash::run(corefile, mode, tag, &cli.repo, &config)?;
        }
        Commands::LogToCss {
            logfile,
            svg,
            output,
        } => {
            log_to_css::run(logfile, svg, output, &config)?;
        }
    }

    Ok(())
}
