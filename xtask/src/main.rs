use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the nola workspace",
    long_about = "Builds the remote builder function, deploys it through the nola CLI,\n\
                  and runs CI checks for the nola workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cross-compile the builder Lambda binary
    BuilderBuild {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Build the builder binary, then run `nola deploy` with it
    BuilderDeploy {
        /// Compilation target triple for the Lambda binary
        #[arg(long, default_value = DEFAULT_TARGET)]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

const DEFAULT_TARGET: &str = "x86_64-unknown-linux-gnu";
const BUILDER_PACKAGE: &str = "nola_lambda";
const BUILDER_BIN: &str = "builder_lambda";

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Check plus a cross-compiled builder binary
    All,
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

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn build_builder_binary(target: &str, profile: BuildProfile) -> PathBuf {
    ensure_rust_target_installed(target);

    step("Build builder lambda binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        BUILDER_PACKAGE,
        "--target",
        target,
        "--bin",
        BUILDER_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    let binary = Path::new("target")
        .join(target)
        .join(profile.dir_name())
        .join(BUILDER_BIN);
    if !binary.exists() {
        panic!("expected builder binary at '{}'", binary.display());
    }
    eprintln!("\nBuilt binary:\n- {}", binary.display());
    binary
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- builder-build`"
        );
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test nola_core");
    run_cargo(&["test", "-p", "nola_core"]);

    step("Test nola_lambda");
    run_cargo(&["test", "-p", "nola_lambda", "--features", "test-helpers"]);

    step("Test nola_cli");
    run_cargo(&["test", "-p", "nola_cli"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::BuilderBuild { target, profile } => {
            build_builder_binary(&target, profile);
        }
        Commands::BuilderDeploy { target, profile } => {
            let binary = build_builder_binary(&target, profile);
            step("Deploy builder function");
            let binary = binary.to_string_lossy();
            run_cargo(&["run", "-p", "nola_cli", "--", "deploy", "--binary", &binary]);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::All => {
                    ci_check();
                    build_builder_binary(DEFAULT_TARGET, BuildProfile::Release);
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
