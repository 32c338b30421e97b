use anyhow::{Context as _, Result};
use clap::Parser;
use roamload::config::LoaderConfig;
use roamload::logging::{DEFAULT_LOG_DIR, RunLogger};
use roamload::orchestrator::Loader;
use roamload::warehouse::PostgresWarehouse;
use std::io::{BufRead as _, Write as _};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "roamload",
    version,
    about = "Stage roaming usage exports into the warehouse and promote them"
)]
pub struct Cli {
    /// Directory holding the `.csv` exports. Asked for on stdin when omitted.
    pub input_dir: Option<PathBuf>,

    /// Read settings from this file instead of `./.env`
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Where the run's log file goes
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    pub log_dir: PathBuf,
}

/// Runs the loader and returns the process exit code.
pub fn run(cli: Cli) -> Result<u8> {
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
        }
        None => {
            // A missing .env is fine; settings may come from the environment.
            dotenvy::dotenv().ok();
        }
    }

    let job_name = std::env::var("JOB_NAME").unwrap_or_else(|_| "roamload".to_owned());
    let _logger = RunLogger::start(&cli.log_dir, &job_name)?;

    let config = match LoaderConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return Ok(e.exit_code());
        }
    };
    let input_dir = match cli.input_dir {
        Some(dir) => dir,
        None => prompt_input_dir()?,
    };
    tracing::info!(
        "Loading {} into {}.{} (if_exists={}, batch size {}, {} session(s))",
        input_dir.display(),
        config.database,
        config.staging_table,
        config.if_exists,
        config.batch_size,
        config.load_sessions
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let code = runtime.block_on(async {
        let warehouse = match PostgresWarehouse::connect(&config).await {
            Ok(warehouse) => warehouse,
            Err(e) => {
                tracing::error!("{e}");
                return e.exit_code();
            }
        };
        let loader = match Loader::new(&config, &warehouse, chrono::Local::now().naive_local()) {
            Ok(loader) => loader,
            Err(e) => {
                tracing::error!("{e}");
                return e.exit_code();
            }
        };
        loader.run(&input_dir).await.exit_code()
    });
    Ok(code)
}

#[expect(clippy::print_stdout)]
fn prompt_input_dir() -> Result<PathBuf> {
    print!("Input directory: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read the input directory")?;
    let dir = line.trim();
    anyhow::ensure!(!dir.is_empty(), "No input directory given");
    Ok(PathBuf::from(dir))
}
