use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nola_core::config::Config;
use nola_lambda::adapters::aws_lambda::LambdaFunctionGateway;
use nola_lambda::adapters::aws_s3::S3ObjectStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod aws;
mod commands;

use commands::build::run_build;
use commands::deploy::{run_deploy, DEFAULT_BUILDER_BINARY};

#[derive(Parser)]
#[command(
    name = "nola",
    version,
    about = "Build node dependencies on AWS Lambda",
    long_about = "Installs the dependencies of a package.json on a remote Lambda function\n\
                  and unpacks the resulting node_modules into the project."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependencies of the project in DIR (default: current directory)
    Build {
        /// Project directory holding package.json and .nola
        dir: Option<PathBuf>,
    },
    /// Create or update the remote build function
    Deploy {
        /// Compiled builder_lambda executable
        #[arg(long, env = "NOLA_BUILDER_BINARY", default_value = DEFAULT_BUILDER_BINARY)]
        binary: PathBuf,
    },
}

async fn run(command: Commands) -> Result<()> {
    let working_dir = std::env::current_dir().context("failed to resolve current directory")?;

    match command {
        Commands::Build { dir } => {
            let project_dir = match dir {
                Some(dir) => working_dir.join(dir),
                None => working_dir,
            };
            let config = Config::load(&project_dir).context("failed to load configuration")?;
            let sdk_config = aws::load_sdk_config(&config).await;
            let functions = LambdaFunctionGateway::new(&sdk_config);
            let store = S3ObjectStore::new(&sdk_config);

            let location = run_build(&project_dir, &config, &functions, &store)
                .with_context(|| format!("build failed for {}", project_dir.display()))?;
            println!(
                "Dependencies installed into {} (from s3://{}/{})",
                project_dir.join("node_modules").display(),
                location.bucket,
                location.key
            );
        }
        Commands::Deploy { binary } => {
            let config = Config::load(&working_dir).context("failed to load configuration")?;
            let sdk_config = aws::load_sdk_config(&config).await;
            let functions = LambdaFunctionGateway::new(&sdk_config);

            let action = run_deploy(&working_dir, &binary, &config, &functions)
                .context("deploy failed")?;
            println!("Function {} {action}", config.build_function_name);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nola=info,nola_cli=info,nola_lambda=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {error:?}");
            ExitCode::FAILURE
        }
    }
}
