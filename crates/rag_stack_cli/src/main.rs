use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rag_stack_core::context::{load_raw_context, DeploymentContext, RawContext, CONFIG_PATH_ENV};
use rag_stack_core::stack::SlackRagStack;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "rag-stack",
    about = "Synthesize and package the Slack RAG assistant stack",
    long_about = "Validates the deployment context, synthesizes the stack manifest\n\
                  and packages the custom-resource Lambda binaries."
)]
struct Cli {
    /// JSON context file
    #[arg(long, env = CONFIG_PATH_ENV, global = true)]
    config: Option<PathBuf>,
    /// Context override as key=value; dotted keys reach nested objects
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE")]
    overrides: Vec<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the context and emit the stack manifest as JSON
    Synth {
        /// Write the manifest here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate the context and print the resolved values
    Validate,
    /// Build the custom-resource Lambda binaries and zip each as `bootstrap`
    PackageLambdas {
        /// Compilation target triple for Lambda binaries
        #[arg(long, default_value = "aarch64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zip archives are written to
        #[arg(long, default_value = "dist/lambda")]
        output_dir: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

const LAMBDA_PACKAGE: &str = "rag_stack_lambda";
const LAMBDA_BINARIES: [&str; 4] = [
    "delay_resource",
    "vector_index_resource",
    "index_manager",
    "invocation_logging_resource",
];

// ── context ────────────────────────────────────────────────────────

fn load_context(config: Option<&Path>, overrides: &[String]) -> Result<DeploymentContext> {
    let Some(path) = config else {
        bail!("no context file given; pass --config or set {CONFIG_PATH_ENV}");
    };
    let mut raw: RawContext = load_raw_context(path)?;
    raw.apply_overrides(overrides)?;
    let context = DeploymentContext::from_raw(raw)?;
    info!(
        stack = %context.stack_name,
        environment = %context.environment,
        fingerprint = %context.fingerprint(),
        "context validated"
    );
    Ok(context)
}

fn synth(context: DeploymentContext, output: Option<&Path>) -> Result<()> {
    let stack = SlackRagStack::from_context(context)?;
    let manifest = stack.synthesize();
    if !manifest.suppression_report.missed.is_empty() {
        warn!(
            missed = manifest.suppression_report.missed.len(),
            "some suppression targets matched nothing"
        );
    }

    let json = serde_json::to_string_pretty(&manifest).context("failed to serialize manifest")?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
            info!(
                path = %path.display(),
                resources = manifest.deployment_order.len(),
                "manifest written"
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── lambda packaging ───────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn run_cargo(args: &[&str]) -> Result<()> {
    eprintln!("+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .context("failed to execute cargo")?;
    if !status.success() {
        bail!("cargo {} exited with {status}", args.join(" "));
    }
    Ok(())
}

fn package_lambdas(target: &str, profile: BuildProfile, output_dir: &Path) -> Result<()> {
    ensure_rust_target_installed(target)?;

    step("Build custom resource lambda binaries");
    let mut cargo_args = vec!["build", "-p", LAMBDA_PACKAGE, "--target", target];
    for bin in LAMBDA_BINARIES {
        cargo_args.extend(["--bin", bin]);
    }
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args)?;

    step("Package lambda zip artifacts");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let mut packaged = Vec::with_capacity(LAMBDA_BINARIES.len());
    for bin in LAMBDA_BINARIES {
        let zip_path = output_dir.join(format!("{bin}.zip"));
        package_lambda_zip(&target_dir.join(bin), &zip_path)?;
        packaged.push(zip_path);
    }

    eprintln!("\nPackaged artifacts:");
    for path in packaged {
        eprintln!("- {}", path.display());
    }
    Ok(())
}

fn ensure_rust_target_installed(target: &str) -> Result<()> {
    let output = match Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output()
    {
        Ok(value) => value,
        Err(error) => {
            warn!(
                %error,
                "failed to run `rustup target list --installed`, skipping target preflight"
            );
            return Ok(());
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("failed to list installed rust targets: {}", stderr.trim());
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        bail!("rust target `{target}` is not installed; run `rustup target add {target}`");
    }
    Ok(())
}

fn package_lambda_zip(binary_path: &Path, zip_path: &Path) -> Result<()> {
    let binary = fs::read(binary_path)
        .with_context(|| format!("expected lambda binary at '{}'", binary_path.display()))?;
    let file = fs::File::create(zip_path)
        .with_context(|| format!("failed to create {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .context("failed to start bootstrap entry in lambda zip")?;
    zip.write_all(&binary)
        .context("failed to write bootstrap entry")?;
    zip.finish().context("failed to finish lambda zip")?;
    Ok(())
}

// ── main ───────────────────────────────────────────────────────────

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Synth { output } => {
            let context = load_context(cli.config.as_deref(), &cli.overrides)?;
            synth(context, output.as_deref())
        }
        Commands::Validate => {
            let context = load_context(cli.config.as_deref(), &cli.overrides)?;
            let resolved =
                serde_json::to_string_pretty(&context).context("failed to serialize context")?;
            println!("{resolved}");
            Ok(())
        }
        Commands::PackageLambdas {
            target,
            profile,
            output_dir,
        } => package_lambdas(&target, profile, &output_dir),
    }
}

fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse())
}
