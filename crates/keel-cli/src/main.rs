use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "keel",
    about = "keel — single-host blue/green deployments for docker compose",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a deployment into a self-contained executable.
    ///
    /// Inputs come from keel.toml ([deploy] section), then KEEL_* environment
    /// variables, then flags. The definition is resolved now, not when the
    /// artifact runs.
    Compile {
        #[command(flatten)]
        inputs: PlanArgs,
        /// keel binary to embed the plan into (default: this executable)
        #[arg(long, value_name = "PATH")]
        runtime: Option<PathBuf>,
    },
    /// Resolve inputs and print the plan as JSON instead of writing an artifact
    Plan {
        #[command(flatten)]
        inputs: PlanArgs,
    },
    /// Run a plan file directly
    Deploy {
        /// Plan written by `keel plan`
        #[arg(long, value_name = "FILE")]
        plan: PathBuf,
    },
    /// Show the plan embedded in an artifact
    Inspect {
        artifact: PathBuf,
        /// Also print the embedded application definition
        #[arg(long)]
        definition: bool,
    },
    /// Show the current and previous releases of a working directory
    Status {
        #[arg(short, long, env = "KEEL_WORKDIR")]
        workdir: PathBuf,
        /// Output format: text or json
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Plan inputs shared by `compile` and `plan`.
#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    /// Configuration file (default: ./keel.toml if present)
    #[arg(short, long, env = "KEEL_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Release version, unique per working directory
    #[arg(long = "version", env = "KEEL_VERSION", value_name = "VERSION")]
    pub release_version: Option<String>,
    /// Application definition fragment; repeat to merge several
    #[arg(short, long = "file", env = "KEEL_FILES", value_delimiter = ',', value_name = "FILE")]
    pub files: Vec<PathBuf>,
    /// Absolute path of the deployment working directory
    #[arg(short, long, env = "KEEL_WORKDIR")]
    pub workdir: Option<PathBuf>,
    /// Service whose health gates the release
    #[arg(short, long, env = "KEEL_PROBE")]
    pub probe: Option<String>,
    /// Health checks before giving up (default 30)
    #[arg(long, env = "KEEL_MAX_RETRIES")]
    pub max_retries: Option<u32>,
    /// Seconds between health checks (default 5)
    #[arg(long, env = "KEEL_INTERVAL_SECS")]
    pub interval_secs: Option<u64>,
    /// Release directories kept after a commit (default 3, minimum 2)
    #[arg(long, env = "KEEL_RETAIN")]
    pub retain: Option<usize>,
    /// Pin image references to content digests (default true)
    #[arg(long, env = "KEEL_PIN_DIGESTS", value_name = "BOOL")]
    pub pin_digests: Option<bool>,
    /// Shorthand for --pin-digests false
    #[arg(long, conflicts_with = "pin_digests")]
    pub no_pin_digests: bool,
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive("keel=info".parse()?);
    let json = std::env::var("KEEL_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    // Logs go to stderr; stdout carries summaries and plan output.
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing()?;

    // A compiled artifact runs its own plan and takes no arguments.
    if let Some(plan) = keel_plan::current_exe_plan().context("reading embedded plan")? {
        return commands::deploy::run(plan).await;
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Compile { inputs, runtime } => commands::compile::compile(inputs, runtime).await,
        Commands::Plan { inputs } => commands::compile::plan(inputs).await,
        Commands::Deploy { plan } => commands::deploy::deploy(&plan).await,
        Commands::Inspect {
            artifact,
            definition,
        } => commands::inspect::inspect(&artifact, definition),
        Commands::Status { workdir, format } => commands::status::status(&workdir, &format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn compile_flags_parse() {
        let cli = Cli::try_parse_from([
            "keel",
            "compile",
            "--version",
            "v3",
            "--file",
            "a.yml",
            "-f",
            "b.yml",
            "--workdir",
            "/srv/shop",
            "--probe",
            "web",
            "--no-pin-digests",
        ])
        .unwrap();
        let Commands::Compile { inputs, runtime } = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(inputs.release_version.as_deref(), Some("v3"));
        assert_eq!(inputs.files, vec![PathBuf::from("a.yml"), PathBuf::from("b.yml")]);
        assert!(inputs.no_pin_digests);
        assert!(runtime.is_none());
    }

    #[test]
    fn pin_digest_flags_conflict() {
        let result = Cli::try_parse_from([
            "keel",
            "plan",
            "--pin-digests",
            "true",
            "--no-pin-digests",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn inspect_takes_positional_artifact() {
        let cli = Cli::try_parse_from(["keel", "inspect", "./keel-deploy-v1", "--definition"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Inspect { definition: true, .. }
        ));
    }
}
