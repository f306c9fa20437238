mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_DEFINITION_ERROR, EXIT_FAILURE, EXIT_INPUT_ERROR};
use imgplan_core::Registry;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "imgplan",
    version,
    about = "Resolve image definitions and plan OS image build manifests"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List distros, their architectures and image types.
    List {
        /// Only show this distro (e.g. fedora-42 or rhel-810).
        #[arg(long)]
        distro: Option<String>,
    },
    /// Print the manifest planned for an image type.
    Manifest {
        #[arg(long)]
        distro: String,
        #[arg(long)]
        arch: String,
        /// Image type name or alias.
        #[arg(long = "type")]
        image_type: String,
        /// Blueprint file (.toml, .json, .yaml).
        #[arg(long)]
        blueprint: Option<PathBuf>,
        /// Seed for generated partition and filesystem ids.
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Print the package-set chains instead of the manifest.
        #[arg(long, default_value_t = false)]
        chains: bool,
    },
    /// Write the plan for a build config into a directory.
    Build {
        #[arg(long)]
        distro: String,
        /// Image type name or alias.
        #[arg(long = "type")]
        image_type: String,
        /// Build config (.toml or .json) with blueprint, options, repositories and seed.
        #[arg(long)]
        config: PathBuf,
        /// Directory receiving manifest.json, chains.json and sources.json.
        #[arg(long)]
        output: PathBuf,
        /// Target architecture; defaults to the host's.
        #[arg(long)]
        arch: Option<String>,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("IMGPLAN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    let registry = Registry::from_env();
    let json_output = cli.json;

    let result = match cli.command {
        Commands::List { distro } => commands::list::run(&registry, distro.as_deref(), json_output),
        Commands::Manifest {
            distro,
            arch,
            image_type,
            blueprint,
            seed,
            chains,
        } => commands::manifest::run(
            &registry,
            &commands::Target {
                distro: &distro,
                arch: &arch,
                image_type: &image_type,
            },
            blueprint.as_deref(),
            seed,
            chains,
            json_output,
        ),
        Commands::Build {
            distro,
            image_type,
            config,
            output,
            arch,
        } => arch
            .map_or_else(|| commands::host_arch().map(str::to_owned), Ok)
            .and_then(|arch| {
                commands::build::run(
                    &registry,
                    &commands::Target {
                        distro: &distro,
                        arch: &arch,
                        image_type: &image_type,
                    },
                    &config,
                    &output,
                    json_output,
                )
            }),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("input error:") {
                EXIT_INPUT_ERROR
            } else if msg.starts_with("definition error:") {
                EXIT_DEFINITION_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
