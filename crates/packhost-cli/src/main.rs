//! Command-line host for packhost packages.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use packhost_core::config::env_vars;
use packhost_core::{
    Culture, DylibLoader, EntityId, EntityIdTemplate, HostConfig, Package, PackageLoadOptions,
    PackageRegistry,
};
use serde::Serialize;

/// packhost - load versioned module packages.
#[derive(Parser, Debug)]
#[command(name = "packhost")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Config file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing one subdirectory per package.
    #[arg(short, long, global = true)]
    packages_dir: Option<PathBuf>,

    /// Culture for localized resources, e.g. en-US.
    #[arg(long, global = true)]
    culture: Option<String>,

    /// Library resolved from the host instead of the package (repeatable).
    #[arg(long = "shared", global = true, value_delimiter = ',')]
    shared: Vec<String>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Load all packages and list them.
    List {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Find a factory by module name, optionally with a version.
    Find {
        /// Module name, or factory id when no version is given.
        name: String,
        /// Module version.
        #[arg(long)]
        version: Option<String>,
    },
    /// Create a module and print its identity and description.
    Create {
        /// Module name.
        name: String,
        /// Module version.
        version: String,
    },
    /// Load a single package directory and show what it contains.
    Inspect {
        /// Package directory.
        #[arg(required = true)]
        path: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct PackageSummary {
    id: String,
    version: String,
    path: PathBuf,
    libraries: Vec<String>,
    modules: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = load_config(&args)?;
    let culture = config.culture();

    match args.command {
        Command::List { json } => list_packages(&config, culture, json).await,
        Command::Find { name, version } => find_factory(&config, culture, name, version).await,
        Command::Create { name, version } => create_module(&config, culture, name, version).await,
        Command::Inspect { path } => inspect_package(&config, culture, &path),
    }
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "packhost=debug" } else { "packhost=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file, then environment, then command-line flags.
fn load_config(args: &Args) -> Result<HostConfig> {
    let config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };
    let mut config = config.with_env_overrides();

    if let Some(dir) = &args.packages_dir {
        config.packages_dir = dir.clone();
    }
    if let Some(culture) = &args.culture {
        config.culture = Some(culture.clone());
    }
    if !args.shared.is_empty() {
        config.shared_libraries = args.shared.clone();
    }

    tracing::debug!(
        packages_dir = %config.packages_dir.display(),
        shared = ?config.shared_libraries,
        collectible = config.collectible,
        "Configuration loaded"
    );
    Ok(config)
}

async fn load_registry(config: &HostConfig, culture: Culture) -> Result<Arc<PackageRegistry>> {
    let registry = Arc::new(PackageRegistry::from_config(config));
    let report = registry
        .load_all_async(culture)
        .await
        .with_context(|| format!("Failed to load packages from {}", config.packages_dir.display()))?;

    for failure in &report.failed {
        eprintln!("Skipped {}: {}", failure.path.display(), failure.error);
    }
    Ok(registry)
}

fn summarize(package: &Package) -> PackageSummary {
    PackageSummary {
        id: package.package_id().to_string(),
        version: package.version().to_string(),
        path: package.root_dir().to_path_buf(),
        libraries: package.library_names(),
        modules: package.factories().keys().map(ToString::to_string).collect(),
    }
}

async fn list_packages(config: &HostConfig, culture: Culture, json: bool) -> Result<()> {
    let registry = load_registry(config, culture).await?;
    let summaries: Vec<PackageSummary> = registry
        .packages()
        .iter()
        .map(|package| summarize(package))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    println!("Packages in {}", registry.packages_dir().display());
    println!();

    if summaries.is_empty() {
        println!("No packages found.");
        return Ok(());
    }

    for summary in &summaries {
        println!("  {}@{}", summary.id, summary.version);
        println!("        Path: {}", summary.path.display());
        if summary.modules.is_empty() {
            println!("        Modules: (none)");
        } else {
            println!("        Modules: {}", summary.modules.join(", "));
        }
        println!();
    }
    println!("Total: {} package(s)", summaries.len());

    Ok(())
}

fn template(name: String, version: Option<&str>) -> Result<EntityIdTemplate> {
    Ok(match version {
        Some(version) => EntityId::parse_parts(name, version)?.into(),
        None => EntityIdTemplate::by_name(name),
    })
}

async fn find_factory(
    config: &HostConfig,
    culture: Culture,
    name: String,
    version: Option<String>,
) -> Result<()> {
    let template = template(name, version.as_deref())?;
    let registry = load_registry(config, culture).await?;

    let factory = registry
        .find_factory(&template)
        .with_context(|| format!("No factory found for {}", template))?;

    println!("Factory: {}", factory.factory_id());
    println!("Library: {}", factory.library_name());
    for module in factory.supported_modules() {
        println!("  {}", module);
    }
    Ok(())
}

async fn create_module(
    config: &HostConfig,
    culture: Culture,
    name: String,
    version: String,
) -> Result<()> {
    let id = EntityId::parse_parts(name, &version)?;
    let registry = load_registry(config, culture).await?;

    let factory = registry
        .find_factory(&EntityIdTemplate::from(&id))
        .with_context(|| format!("No factory found for {}", id))?;
    let module = factory
        .create(&id)
        .with_context(|| format!("Factory {} did not create {}", factory.factory_id(), id))?;

    println!("Module: {}", module.module_id());
    println!("Description: {}", module.description());
    Ok(())
}

fn inspect_package(config: &HostConfig, culture: Culture, path: &Path) -> Result<()> {
    let registry = PackageRegistry::from_config(config);
    let options = PackageLoadOptions::new(culture).with_collectible(config.collectible);
    let package = Package::load(
        path,
        &options,
        Arc::clone(registry.shared_scope()),
        Arc::new(DylibLoader::new()),
    )?;

    let optional = |dir: Option<&Path>| {
        dir.map(|d| d.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!("Package: {}", package.identity());
    println!("  Root: {}", package.root_dir().display());
    println!("  Root library: {}", package.root_library_path().display());
    println!("  Culture dir: {}", optional(package.culture_dir()));
    println!("  Native dir: {}", optional(package.native_dir()));
    println!("  Library dir: {}", optional(package.library_dir()));
    println!("  Libraries: {}", package.library_names().join(", "));
    println!("  Native handles: {}", package.native_handle_count());
    println!("  Loaded at: {}", package.loaded_at().to_rfc3339());
    println!("  Factories:");
    for (module, factory) in package.factories().iter() {
        println!("    {} -> {}", module, factory.factory_id());
    }

    package.dispose();
    Ok(())
}
