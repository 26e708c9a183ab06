//! CLI entry point for nginx-ui-settings-ctl: inspect and migrate app.ini.

use clap::{Parser, Subcommand};
use nginx_ui_settings::config::AnySection;
use nginx_ui_settings::env::ENV_PREFIX;
use nginx_ui_settings::migrate::{migrate_file, MigrationOutcome};
use nginx_ui_settings::settings::{resolve_source, Settings, CONFIG_FILE};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nginx-ui-settings-ctl", about = "nginx-ui settings inspection tool")]
struct Cli {
    /// Directory holding app.ini.
    #[arg(long, global = true, default_value = ".")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate the settings
    Check,
    /// Print one section as JSON
    Show {
        section: String,
        /// Include protected fields
        #[arg(long, default_value_t = false)]
        reveal: bool,
    },
    /// Rewrite a legacy app.ini into the sectioned layout
    Migrate,
    /// List the registered sections, their fields and env variables
    Sections,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let rc = match cli.command {
        Commands::Check => run_check(cli.data_dir),
        Commands::Show { section, reveal } => run_show(cli.data_dir, &section, reveal),
        Commands::Migrate => run_migrate(cli.data_dir),
        Commands::Sections => run_sections(),
    };
    std::process::exit(rc);
}

fn run_check(data_dir: PathBuf) -> i32 {
    match Settings::load(data_dir) {
        Ok(settings) => {
            eprintln!(
                "OK: {} sections loaded from {}",
                settings.snapshot().iter().count(),
                settings.source().display()
            );
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            1
        }
    }
}

fn run_show(data_dir: PathBuf, section: &str, reveal: bool) -> i32 {
    let settings = match Settings::load(data_dir) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            return 1;
        }
    };
    let value = if reveal {
        settings.get_json(section)
    } else {
        settings.redacted_json(section)
    };
    match value {
        Ok(v) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&v).unwrap_or_else(|_| v.to_string())
            );
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            1
        }
    }
}

fn run_migrate(data_dir: PathBuf) -> i32 {
    let source = resolve_source(&data_dir);
    let dest = data_dir.join(CONFIG_FILE);
    match migrate_file(&source, &dest) {
        Ok(MigrationOutcome::Migrated) => {
            eprintln!("Migrated {} -> {}", source.display(), dest.display());
            0
        }
        Ok(MigrationOutcome::Unchanged) => {
            eprintln!("{} is already in the sectioned layout", source.display());
            0
        }
        Err(e) => {
            eprintln!("Error ({}): {}", e.kind(), e);
            1
        }
    }
}

fn run_sections() -> i32 {
    for section in AnySection::defaults() {
        println!("[{}]", section.name());
        for spec in section.fields() {
            let mut notes = Vec::new();
            if spec.is_protected() {
                notes.push("protected");
            }
            if spec.allows_shadow() {
                notes.push("shadow");
            }
            let notes = if notes.is_empty() {
                String::new()
            } else {
                format!("  ({})", notes.join(", "))
            };
            println!(
                "  {:<28} {:<16} {}{}",
                spec.ini_key(),
                spec.kind.to_string(),
                spec.env_key(ENV_PREFIX, section.name()),
                notes
            );
        }
    }
    0
}
