//! Stackgraph CLI entrypoint.
//!
//! This is the main entrypoint for the stackgraph command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use stackgraph::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use stackgraph::config::{
    ConfigParser, ConfigValidator, DEFAULT_STATE_DIR, StackConfig, find_config_file,
};
use stackgraph::engine::{ConfigSource, HttpProvisioner, Provisioner, StackConfigSource};
use stackgraph::error::{ConfigError, Result, StackError};
use stackgraph::resource::ReferenceResolver;
use stackgraph::runner::StackRunner;
use stackgraph::state::{LocalStateStore, StateStore, generate_holder_id};

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the default level when set.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force),
        Commands::Validate { warnings } => cmd_validate(cli.config.as_ref(), warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(cli.config.as_ref(), detailed, &formatter).await,
        Commands::Apply { yes, continue_on_error } => {
            cmd_apply(cli.config.as_ref(), yes, continue_on_error, cli.output, &formatter).await
        }
        Commands::Outputs { name } => cmd_outputs(cli.config.as_ref(), name.as_deref(), &formatter).await,
        Commands::State { command } => cmd_state(cli.config.as_ref(), command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new stack in: {}", path.display());

    let config_path = path.join("stackgraph.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    let config_template = include_str!("../templates/stackgraph.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    let state_entry = format!("{DEFAULT_STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(DEFAULT_STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n# Stackgraph")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and fill in the engine endpoint and secrets");
    eprintln!("  2. Edit stackgraph.yaml with your resources");
    eprintln!("  3. Run 'stackgraph validate' to check the stack");
    eprintln!("  4. Run 'stackgraph plan' to see the execution batches");
    eprintln!("  5. Run 'stackgraph apply' to provision the stack");

    Ok(())
}

/// Validate the stack file.
fn cmd_validate(
    config_path: Option<&PathBuf>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, _) = load_stack(config_path)?;
    let source = StackConfigSource::new(config.config.clone());

    let validator = validator_for(&config, &source);
    let mut result = validator.check(&config);

    // Graph errors (cycles, unknown targets) only show up when planning.
    if result.is_valid() {
        let descriptors = config.descriptors()?;
        if let Err(e) = stackgraph::planner::plan(descriptors) {
            result.errors.push(stackgraph::config::ValidationError {
                field: String::from("resources"),
                message: e.to_string(),
            });
        }
    }

    for missing in missing_secrets(&config, &source) {
        result.warnings.push(format!(
            "Secret '{missing}' is not set ({})",
            StackConfigSource::secret_var(&missing)
        ));
    }

    print_output(&formatter.format_validation(&result, &config, show_warnings))?;

    match result.errors.first() {
        None => Ok(()),
        Some(first) => Err(StackError::Config(ConfigError::ValidationError {
            message: first.message.clone(),
            field: Some(first.field.clone()),
        })),
    }
}

/// Show the execution plan.
async fn cmd_plan(
    config_path: Option<&PathBuf>,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_stack(config_path)?;
    let source = StackConfigSource::new(config.config.clone());
    let validator = validator_for(&config, &source);

    let runner = StackRunner::new(&config, &state_store, Arc::new(source)).with_validator(validator);
    let preview = runner.preview().await?;

    print_output(&formatter.format_preview(&preview, detailed))
}

/// Provision the stack.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    continue_on_error: bool,
    format: OutputFormat,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, state_store) = load_stack(config_path)?;
    let source = StackConfigSource::new(config.config.clone());
    let validator = validator_for(&config, &source);

    let missing = missing_secrets(&config, &source);
    if let Some(key) = missing.first() {
        return Err(StackError::Config(ConfigError::MissingValue {
            key: StackConfigSource::secret_var(key),
        }));
    }

    let provisioner = create_provisioner(&config)?;

    let mut options = config.settings.execution_options();
    options.continue_on_error |= continue_on_error;

    let runner = StackRunner::new(&config, &state_store, Arc::new(source))
        .with_validator(validator)
        .with_options(options);

    let preview = runner.preview().await?;
    if preview.plan.is_empty() {
        eprintln!("Stack declares no resources.");
        return Ok(());
    }

    if format == OutputFormat::Text {
        eprintln!("{}", formatter.format_preview(&preview, false));
    }

    if !auto_approve {
        eprint!("Provision {} resources? [y/N]: ", preview.plan.resource_count());
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(());
        }
    }

    let report = runner.apply(provisioner, &generate_holder_id()).await?;
    print_output(&formatter.format_apply(&report))?;

    if report.is_success() {
        return Ok(());
    }
    let mut run = report.run;
    if run.errors.is_empty() {
        Err(StackError::internal(format!(
            "{} outputs could not be resolved",
            report.export_errors.len()
        )))
    } else {
        Err(run.errors.remove(0).error)
    }
}

/// Show recorded stack exports.
async fn cmd_outputs(
    config_path: Option<&PathBuf>,
    name: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_stack(config_path)?;

    let Some(state) = state_store.load().await? else {
        eprintln!("No state found. Run 'stackgraph apply' first.");
        return Ok(());
    };

    match name {
        Some(name) => {
            let value = state
                .exports
                .get(name)
                .ok_or_else(|| StackError::internal(format!("No output named '{name}' recorded")))?;
            print_output(&formatter.format_export(value))
        }
        None => print_output(&formatter.format_exports(&state.exports)),
    }
}

/// Run record commands.
async fn cmd_state(
    config_path: Option<&PathBuf>,
    command: StateCommands,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (_config, state_store) = load_stack(config_path)?;

    match command {
        StateCommands::Show => {
            if let Some(state) = state_store.load().await? {
                print_output(&formatter.format_state(&state))?;
            } else {
                eprintln!("No state found.");
            }
            if let Some(lock) = state_store.get_lock_info().await? {
                let status = if lock.is_expired() { "expired" } else { "held" };
                eprintln!(
                    "Lock {status} by {} since {} ({})",
                    lock.holder,
                    lock.acquired_at.to_rfc3339(),
                    lock.lock_id
                );
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match state_store.force_unlock().await? {
                    Some(lock) => eprintln!("{}", formatter.success(&format!("Removed lock held by {}", lock.holder))),
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                state_store.release_lock(&id).await?;
                eprintln!("{}", formatter.success("State unlocked."));
            } else {
                eprintln!("{}", formatter.warning("Please provide --lock-id or use --force"));
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Loads the stack file and opens its run record.
fn load_stack(config_path: Option<&PathBuf>) -> Result<(StackConfig, LocalStateStore)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading stack from: {}", config_file.display());

    let base = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let config = parser.load_with_env(&config_file)?;

    let lock_expiry = config
        .settings
        .resource_timeout_secs
        .saturating_mul(2)
        .try_into()
        .unwrap_or(i64::MAX);
    let state_store = LocalStateStore::with_base_dir(config.state.dir(base)).with_lock_expiry(lock_expiry);

    Ok((config, state_store))
}

/// Builds a validator that knows which config keys the environment supplies.
fn validator_for(config: &StackConfig, source: &StackConfigSource) -> ConfigValidator {
    let mut validator = ConfigValidator::new();
    let resolver = ReferenceResolver::new();
    for descriptor in config.descriptors().unwrap_or_default() {
        for requirement in resolver.config_requirements(&descriptor) {
            if !requirement.secret && source.get_config_value(&requirement.key).is_ok() {
                validator.add_external_key(requirement.key);
            }
        }
    }
    validator
}

/// Lists secrets the stack reads that the environment does not provide.
fn missing_secrets(config: &StackConfig, source: &StackConfigSource) -> Vec<String> {
    let resolver = ReferenceResolver::new();
    let mut missing: Vec<String> = Vec::new();

    let descriptors = config.descriptors().unwrap_or_default();
    let requirements = descriptors
        .iter()
        .flat_map(|d| resolver.config_requirements(d))
        .filter(|r| r.secret);
    for requirement in requirements {
        if source.get_secret(&requirement.key).is_err() && !missing.contains(&requirement.key) {
            warn!("Secret {} is not set", requirement.key);
            missing.push(requirement.key);
        }
    }
    missing
}

/// Creates the HTTP provisioning engine client.
fn create_provisioner(config: &StackConfig) -> Result<Arc<dyn Provisioner>> {
    let endpoint = config.engine.endpoint.as_deref().ok_or_else(|| {
        StackError::Config(ConfigError::MissingValue {
            key: String::from("engine.endpoint (or STACKGRAPH_ENGINE_ENDPOINT)"),
        })
    })?;

    let provisioner = HttpProvisioner::with_timeout(
        endpoint,
        ConfigParser::engine_token(),
        config.project.name.as_str(),
        config.project.environment.as_str(),
        config.engine.timeout_secs,
    )?;
    info!("Using provisioning engine at {}", provisioner.url());
    Ok(Arc::new(provisioner))
}

/// Writes formatted command output to stdout.
fn print_output(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    if !output.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}
