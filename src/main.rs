//! Strata CLI entrypoint.
//!
//! This is the main entrypoint for the strata command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use strata_deploy::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use strata_deploy::config::{
    ConfigParser, ConfigValidator, ProgramConfig, ProgramHasher, StateBackend, find_config_file,
};
use strata_deploy::engine::{Deployment, DeploymentResult};
use strata_deploy::error::{Result, StrataError};
use strata_deploy::provider::ProviderRegistry;
use strata_deploy::state::{LocalStateStore, MemoryStateStore, StateStore, generate_holder_id};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, &formatter)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", formatter.error(&e.to_string()));
            // Distinguish bad input from failures while deploying
            if e.is_configuration_error() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose` when set. JSON output mode logs JSON
/// lines so stderr stays machine-readable too.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(config, warnings, formatter),
        Commands::Preview => cmd_preview(config, formatter).await,
        Commands::Up {
            yes,
            parallelism,
            allow_protected,
        } => cmd_up(config, yes, parallelism, allow_protected, formatter).await,
        Commands::Destroy { yes } => cmd_destroy(config, yes, formatter).await,
        Commands::State { command } => cmd_state(config, command, formatter).await,
    }
}

/// Initialize a new project.
fn cmd_init(path: &Path, force: bool) -> Result<ExitCode> {
    info!("Initializing new Strata project in: {}", path.display());

    let config_path = path.join("strata.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Program file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(ExitCode::FAILURE);
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    std::fs::write(&config_path, include_str!("../templates/strata.yaml"))?;
    eprintln!("Created: {}", config_path.display());

    // Keep state and secrets out of version control
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let missing: Vec<&str> = [".env", ".strata/"]
            .into_iter()
            .filter(|entry| !existing.lines().any(|line| line.trim() == *entry))
            .collect();
        if !missing.is_empty() {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Strata")?;
            for entry in missing {
                writeln!(file, "{entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, ".env\n.strata/\n")?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nProject initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Edit strata.yaml to declare your resources");
    eprintln!("  2. Run 'strata validate' to check the program");
    eprintln!("  3. Run 'strata preview' to see what will change");
    eprintln!("  4. Run 'strata up' to deploy");

    Ok(ExitCode::SUCCESS)
}

/// Validate the program file, reporting every problem found.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);

    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    if !result.is_valid() {
        return Ok(ExitCode::from(2));
    }

    // Graph errors (cycles, dangling parents) surface here rather than at `up`
    config.build_graph()?;
    Ok(ExitCode::SUCCESS)
}

/// Show what `up` would do.
async fn cmd_preview(config_path: Option<&PathBuf>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, store) = load_validated(config_path)?;
    let graph = config.build_graph()?;
    let deployment = build_deployment(&config, store, None, false);

    let plan = deployment.preview(&graph).await?;
    println!("{}", formatter.format_plan(&plan));

    Ok(ExitCode::SUCCESS)
}

/// Deploy the program.
async fn cmd_up(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<usize>,
    allow_protected: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, store) = load_validated(config_path)?;
    let graph = config.build_graph()?;
    let deployment = build_deployment(&config, store, parallelism, allow_protected);

    let plan = deployment.preview(&graph).await?;
    if !plan.has_changes() {
        println!("{}", formatter.success("No changes to apply."));
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", formatter.format_plan(&plan));
    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y", formatter)? {
        eprintln!("Deployment cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let _interrupt = cancel_on_interrupt(&deployment);
    let result = deployment.apply(&graph).await?;
    Ok(report(&result, formatter))
}

/// Destroy every resource in the stack.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, store) = load_validated(config_path)?;

    let Some(checkpoint) = store.load().await? else {
        println!("{}", formatter.success("No state recorded, nothing to destroy."));
        return Ok(ExitCode::SUCCESS);
    };
    if checkpoint.is_empty() {
        println!("{}", formatter.success("No resources to destroy."));
        return Ok(ExitCode::SUCCESS);
    }

    if formatter.format() == OutputFormat::Text {
        eprintln!("The following resources will be destroyed:");
        for resource in checkpoint.live_resources() {
            eprintln!("  - {} ({})", resource.urn.name(), resource.type_token);
        }
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
            formatter,
        )?
    {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    let deployment = build_deployment(&config, store, None, false);
    let _interrupt = cancel_on_interrupt(&deployment);
    let result = deployment.destroy().await?;
    Ok(report(&result, formatter))
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (_config, store) = load_validated(config_path)?;

    match command {
        StateCommands::Show => {
            if let Some(checkpoint) = store.load().await? {
                println!("{}", formatter.format_checkpoint(&checkpoint));
            } else {
                println!("{}", formatter.warning("No state found."));
            }
            if formatter.format() == OutputFormat::Text
                && let Some(lock) = store.get_lock_info().await?
            {
                println!("{}", formatter.format_lock(Some(&lock)));
            }
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("{}", formatter.format_lock(Some(&lock)));
        }
        StateCommands::Unlock { lock_id, force } => {
            let Some(current) = store.get_lock_info().await? else {
                println!("{}", formatter.format_lock(None));
                return Ok(ExitCode::SUCCESS);
            };

            match lock_id {
                _ if force => warn!(holder = %current.holder, "Force-releasing state lock"),
                Some(id) if id == current.lock_id => {}
                Some(_) => {
                    eprintln!(
                        "{}",
                        formatter.error(&format!("Lock ID does not match the lock held by {}", current.holder))
                    );
                    return Ok(ExitCode::FAILURE);
                }
                None => {
                    eprintln!("{}", formatter.error("Please provide --lock-id or use --force"));
                    return Ok(ExitCode::from(2));
                }
            }

            store.release_lock(&current.lock_id).await?;
            println!("{}", formatter.success("State unlocked."));
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the program file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads `.env` and the program, with environment overrides applied.
fn load_config(config_path: Option<&PathBuf>) -> Result<ProgramConfig> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading program from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(
        config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new(".")),
    );
    parser.load_dotenv()?;

    parser.load_with_env(&config_file)
}

/// Loads and validates the program, then opens its state store.
fn load_validated(config_path: Option<&PathBuf>) -> Result<(ProgramConfig, Arc<dyn StateStore>)> {
    let config = load_config(config_path)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => Arc::new(LocalStateStore::new(
            config.state.state_dir(),
            &config.project.stack,
        )),
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
    };
    debug!(backend = store.backend_type(), "Opened state store");

    Ok((config, store))
}

/// Builds the deployment driver from the engine settings.
fn build_deployment(
    config: &ProgramConfig,
    store: Arc<dyn StateStore>,
    parallelism: Option<usize>,
    allow_protected: bool,
) -> Deployment {
    let engine = &config.engine;
    Deployment::builder(store, ProviderRegistry::with_builtin())
        .parallelism(parallelism.unwrap_or(engine.parallelism))
        .step_timeout(engine.step_timeout())
        .deployment_timeout(engine.deployment_timeout())
        .retry(engine.retry.policy())
        .allow_protected_changes(allow_protected)
        .program_hash(ProgramHasher::new().hash_program(config))
        .build()
}

/// Cancels the deployment on Ctrl-C. The task ends with the runtime.
fn cancel_on_interrupt(deployment: &Deployment) -> tokio::task::JoinHandle<()> {
    let handle = deployment.cancellation_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted: waiting for running steps to finish...");
            handle.cancel();
        }
    })
}

/// Prints a deployment result and maps its status to an exit code.
fn report(result: &DeploymentResult, formatter: &OutputFormatter) -> ExitCode {
    println!("{}", formatter.format_result(result));
    if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Asks for confirmation on stderr. JSON output never prompts.
fn confirm(prompt: &str, expected: &str, formatter: &OutputFormatter) -> Result<bool> {
    if formatter.format() == OutputFormat::Json {
        return Err(StrataError::internal(
            "Confirmation required: pass --yes when using --output json",
        ));
    }

    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}
