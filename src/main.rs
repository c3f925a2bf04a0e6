// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
//! soma-forge CLI - build planning and publishing for a conda package channel

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use soma_forge::apply::ApplyOptions;
use soma_forge::commands::{self, Globals};
use soma_forge::config;
use soma_forge::init::InitOptions;
use soma_forge::plan::PlanOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "soma-forge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(short, long, env = "SOMA_FORGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Recipe directory override
    #[arg(long, global = true)]
    recipes_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or reconfigure a build tree
    Init {
        /// Build tree directory
        directory: PathBuf,

        /// Environment name (see `environments`)
        environment: String,

        /// Package selection (names, globs, `all`, `selected`, `-name` to exclude)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        packages: Vec<String>,

        /// Python version
        #[arg(short, long, value_parser = ["3.10", "3.11", "3.12"])]
        python: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Compute the packaging plan of a build tree
    Plan {
        /// Build tree directory
        #[arg(default_value = ".")]
        directory: PathBuf,

        /// Only consider packages matching these patterns
        patterns: Vec<String>,

        /// Ignore incomplete source builds and unclean repositories
        #[arg(long)]
        force: bool,

        /// Do not run recipe tests
        #[arg(long)]
        no_test: bool,

        /// Publish built packages to this channel (directory or host:/path)
        #[arg(long)]
        publish: Option<String>,

        /// Run `conda index` on the channel after publishing
        #[arg(long, requires = "publish")]
        index: bool,
    },

    /// Apply the plan of a build tree, resuming after the last success
    Apply {
        /// Build tree directory
        #[arg(default_value = ".")]
        directory: PathBuf,

        /// Show pending actions without executing them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the progress of the plan of a build tree
    Status {
        /// Build tree directory
        #[arg(default_value = ".")]
        directory: PathBuf,
    },

    /// Check that the source build steps succeeded in order
    CheckBuild {
        /// Build tree directory
        #[arg(default_value = ".")]
        directory: PathBuf,
    },

    /// List selected recipes in build order
    Recipes {
        /// Package selection (names, globs, `all`, `selected`, `-name` to exclude)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        packages: Vec<String>,
    },

    /// Output a DOT graph of the recipes
    Graphviz {
        /// Only draw packages matching these patterns
        patterns: Vec<String>,

        /// Also draw external run requirements
        #[arg(long)]
        conda_forge: bool,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List environments or show one with inheritance applied
    Environments {
        /// Environment name
        name: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Only print this setting
        key: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        shell: clap_complete::Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.recipes_dir {
        settings.recipes_dir = Some(dir);
    }

    // Initialize logging
    let log_level = match cli.verbose {
        0 if cli.quiet => tracing::Level::ERROR,
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color);
    match settings.log_level.as_deref().map(EnvFilter::try_new) {
        Some(Ok(filter)) => subscriber.with_env_filter(filter).init(),
        Some(Err(e)) => {
            subscriber.with_max_level(log_level).init();
            tracing::warn!("Ignoring invalid log_level setting: {}", e);
        }
        None => subscriber.with_max_level(log_level).init(),
    }

    if cli.no_color {
        owo_colors::set_override(false);
    }

    let globals = Globals {
        settings,
        json: cli.json,
    };

    // Execute command
    match cli.command {
        Commands::Init { directory, environment, packages, python, force } => {
            let options = InitOptions {
                directory,
                environment,
                packages,
                python,
                force,
            };
            commands::init::run(&globals, &options)
        }
        Commands::Plan { directory, patterns, force, no_test, publish, index } => {
            let options = PlanOptions {
                patterns,
                force,
                test: !no_test,
                publish,
                publish_index: index,
            };
            commands::plan::run(&globals, &directory, &options)
        }
        Commands::Apply { directory, dry_run } => {
            commands::apply::run(&globals, &directory, ApplyOptions { dry_run })
        }
        Commands::Status { directory } => commands::status::run(&globals, &directory),
        Commands::CheckBuild { directory } => commands::check::run(&globals, &directory),
        Commands::Recipes { packages } => commands::recipes::run(&globals, &packages),
        Commands::Graphviz { patterns, conda_forge, output } => {
            commands::graphviz::run(&globals, &patterns, conda_forge, output)
        }
        Commands::Environments { name } => commands::environments::run(&globals, name.as_deref()),
        Commands::Config { key } => commands::config::run(&globals, key.as_deref()),
        Commands::Completions { shell } => commands::completions::run(shell, &mut Cli::command()),
    }
}
