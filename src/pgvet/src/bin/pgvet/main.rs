use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use pgvet::diagnostics::{Diagnostic, Span};
use pgvet::manifest::ManifestConfig;
use pgvet::{Config, Manifest, Session};

/// Validate embedded SQL against a disposable PostgreSQL sandbox.
#[derive(Parser, Debug)]
#[command(name = "pgvet")]
#[command(about = "Validate embedded SQL against a disposable PostgreSQL sandbox")]
struct Args {
    /// Path to the pgvet configuration file
    #[arg(short, long, default_value = "pgvet.config.json")]
    config: PathBuf,

    /// Connection URL of the disposable sandbox server (loopback only)
    #[arg(long, default_value = "postgres://localhost:5432/pgvet_sandbox")]
    sandbox_url: String,

    /// Emit diagnostics as JSON instead of a rendered report
    #[arg(long)]
    json: bool,

    /// Manifest JSON file to validate, or `-` for stdin
    manifest: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    let json = args.json;
    match run(args).await {
        Ok(diagnostics) if diagnostics.is_empty() => ExitCode::SUCCESS,
        Ok(diagnostics) => {
            if !json {
                eprintln!(
                    "{}: validation failed with {} diagnostic{}",
                    "error".bright_red().bold(),
                    diagnostics.len(),
                    if diagnostics.len() == 1 { "" } else { "s" }
                );
            }
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{}: {:#}", "fatal".bright_red().bold(), err);
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<Vec<Diagnostic>> {
    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let manifest_text = if args.manifest.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading manifest from stdin")?;
        buf
    } else {
        fs::read_to_string(&args.manifest)
            .with_context(|| format!("reading {}", args.manifest.display()))?
    };
    let mut manifest: Manifest =
        serde_json::from_str(&manifest_text).context("parsing manifest JSON")?;

    // The manifest wins where it says anything; the config file fills the
    // rest.
    if manifest.branded_column_types.is_empty() {
        manifest.branded_column_types = config.unique_table_column_types.clone();
    }
    if manifest.config == ManifestConfig::default() {
        manifest.config = config.manifest_config();
    }

    let pg = pgvet_postgres_util::Config::from_url(&args.sandbox_url)
        .context("parsing sandbox URL")?;
    let mut session = Session::connect(&pg, &config)
        .await
        .context("connecting to the sandbox")?;
    let diagnostics = session.validate_manifest(&manifest).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else {
        for diagnostic in &diagnostics {
            render(diagnostic);
        }
    }
    Ok(diagnostics)
}

fn render(diagnostic: &Diagnostic) {
    let (first, rest) = match diagnostic.messages.split_first() {
        Some((first, rest)) => (first.as_str(), rest),
        None => ("unknown error", &[][..]),
    };
    println!("{}: {}", "error".bright_red().bold(), first);
    let location = match diagnostic.span {
        Span::File => diagnostic.file_name.clone(),
        Span::Point { line, col } => format!("{}:{}:{}", diagnostic.file_name, line, col),
        Span::Range {
            start_line,
            start_col,
            ..
        } => format!("{}:{}:{}", diagnostic.file_name, start_line, start_col),
    };
    println!(" {} {}", "-->".bright_blue().bold(), location);
    for message in rest {
        println!("  {} {}", "=".bright_blue().bold(), message);
    }
    if let Some(epilogue) = &diagnostic.epilogue {
        println!("  {}", "|".bright_blue().bold());
        for line in epilogue.lines() {
            println!("  {} {}", "|".bright_blue().bold(), line);
        }
    }
    if let Some(fix) = &diagnostic.quick_fix {
        println!(
            "  {} {}",
            "=".bright_blue().bold(),
            format!("help: {}", fix.name).bold()
        );
    }
    println!();
}
