use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use jv_deps::{
    DependencyConfiguration, OwnerReport, PlatformSelector, ReadsReport, Settings,
    SplitPackageReport, SystemSetting, UnitSummary,
};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "jvdeps")]
#[command(about = "Module and package dependency index", long_about = None)]
struct Cli {
    /// TOML settings file; flags given here override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Platform home to catalog, or `none` to disable the platform
    #[arg(long, global = true)]
    system: Option<String>,
    /// Application module path
    #[arg(long = "module-path", global = true)]
    module_path: Option<String>,
    /// Module path whose units take precedence over the platform
    #[arg(long = "upgrade-module-path", global = true)]
    upgrade_module_path: Option<String>,
    /// Class path; `dir/*` selects every jar in `dir`
    #[arg(long = "class-path", global = true)]
    class_path: Option<String>,
    /// Comma separated root names, ALL-MODULE-PATH or ALL-DEFAULT
    #[arg(long = "add-modules", global = true, value_delimiter = ',')]
    add_modules: Vec<String>,
    /// Release used for multi-release jars
    #[arg(long = "multi-release", global = true)]
    multi_release: Option<u16>,
    /// Archive or class directory to analyze (repeatable)
    #[arg(long = "root", global = true)]
    roots: Vec<PathBuf>,
    /// Root every platform unit and every unit on the module path
    #[arg(long = "all-modules", global = true)]
    all_modules: bool,
    /// Log debug events to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the units of the configuration
    Modules {
        #[arg(long)]
        json: bool,
    },
    /// Resolve root names and print the participating units
    Resolve {
        names: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print the units a unit reads
    Reads {
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Report packages shared by a unit and class path archives
    SplitPackages {
        #[arg(long)]
        json: bool,
    },
    /// Find the unit or archive holding a class
    Owner {
        /// Class name such as `p.q.Foo` or `p/q/Foo`
        class: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    if let Err(error) = real_main() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&cli)?;
    let fallback = detect_java_home()
        .map(PlatformSelector::Home)
        .unwrap_or(PlatformSelector::None);
    let configuration = settings
        .builder(fallback)?
        .build()
        .context("failed to build dependency configuration")?;

    let result = run_command(&cli.command, &configuration);
    configuration.close();
    result
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    if let Some(system) = &cli.system {
        settings.system = Some(system.parse::<SystemSetting>()?);
    }
    if let Some(paths) = &cli.module_path {
        settings.module_path = env::split_paths(paths).collect();
    }
    if let Some(paths) = &cli.upgrade_module_path {
        settings.upgrade_module_path = env::split_paths(paths).collect();
    }
    if let Some(class_path) = &cli.class_path {
        settings.class_path = vec![class_path.clone()];
    }
    if !cli.add_modules.is_empty() {
        settings.add_modules = cli.add_modules.clone();
    }
    if let Some(release) = cli.multi_release {
        settings.multi_release = Some(release);
    }
    if !cli.roots.is_empty() {
        settings.roots = cli.roots.clone();
    }
    settings.all_modules |= cli.all_modules;
    Ok(settings)
}

fn run_command(command: &Commands, configuration: &DependencyConfiguration) -> Result<()> {
    match command {
        Commands::Modules { json } => {
            let summaries: Vec<UnitSummary> = configuration
                .units()
                .values()
                .map(|unit| UnitSummary::from_unit(unit))
                .collect();
            if *json {
                return print_json(&summaries);
            }
            for summary in summaries {
                let marker = if summary.platform { " (platform)" } else { "" };
                println!("{}{marker} {}", summary.name, summary.location);
            }
            Ok(())
        }
        Commands::Resolve { names, json } => {
            let roots: BTreeSet<String> = names.iter().cloned().collect();
            let units = configuration.resolve(&roots)?;
            let names: Vec<&str> = units.iter().map(|unit| unit.name()).collect();
            if *json {
                return print_json(&names);
            }
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Commands::Reads { name, json } => {
            let unit = configuration
                .find_unit(name)
                .ok_or_else(|| anyhow!("module {name} is not part of the configuration"))?;
            let report = ReadsReport::collect(configuration, unit)?;
            if *json {
                return print_json(&report);
            }
            for read in &report.reads {
                println!("{} -> {read}", report.unit);
            }
            Ok(())
        }
        Commands::SplitPackages { json } => {
            let report = SplitPackageReport::collect(configuration);
            if *json {
                return print_json(&report);
            }
            if report.is_empty() {
                println!("no split packages");
            }
            for (package, origins) in &report.packages {
                println!("{package}");
                for origin in origins {
                    println!("    {origin}");
                }
            }
            Ok(())
        }
        Commands::Owner { class, json } => {
            let report = OwnerReport::lookup(configuration, class);
            if *json {
                return print_json(&report);
            }
            match report {
                OwnerReport::Unit { class, name, location } => {
                    println!("{class} -> {name} ({location})")
                }
                OwnerReport::Unnamed { class, path } => println!("{class} -> {path}"),
                OwnerReport::Unknown { class } => println!("{class} -> not found"),
            }
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("failed to serialize report")?;
    println!("{payload}");
    Ok(())
}

fn detect_java_home() -> Option<PathBuf> {
    if let Ok(path) = env::var("JAVA_HOME") {
        let candidate = PathBuf::from(path);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(java_path) = which::which("java") {
        let java_path = java_path.canonicalize().unwrap_or(java_path);
        if let Some(bin_dir) = java_path.parent() {
            if let Some(home) = bin_dir.parent() {
                return Some(home.to_path_buf());
            }
        }
    }

    None
}
