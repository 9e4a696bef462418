use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use asset_publisher::pages::list_pages;
use asset_publisher::rewrite::DocumentKind;
use asset_publisher::{
  AppPublisher, AppRun, HashMapRegistry, PrefixResolver, ProjectLayout, ProjectScope,
  PublishRequest, Rewriter, TargetId,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, prelude::*};

/// Rewrites module asset references and publishes module builds to their deploy targets.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
  /// App root or module directory (default: current directory)
  #[arg(short = 'C', long, global = true, value_hint = clap::ValueHint::DirPath)]
  dir: Option<PathBuf>,

  /// Module to address when running from the app root
  #[arg(short, long, global = true)]
  module: Option<String>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Publish selected pages, or the whole output tree when no page is given
  Publish {
    /// Deploy target: local, storage, jdTest or tencent
    #[arg(short, long)]
    target: String,

    /// Page file name inside the module output (repeatable)
    #[arg(short, long = "page")]
    pages: Vec<String>,

    /// Print the run summary as JSON instead of the plain manifest
    #[arg(long)]
    json: bool,
  },

  /// Publish the whole output tree to internal storage
  Deploy,

  /// List the pages available for publishing
  Pages,

  /// Print a file with its references rewritten for a target
  Rewrite {
    /// HTML or CSS file to rewrite
    #[arg(value_hint = clap::ValueHint::FilePath)]
    file: PathBuf,

    /// Deploy target whose prefixes are applied
    #[arg(short, long)]
    target: String,
  },
}

fn main() -> ExitCode {
  if let Err(err) = init_logging() {
    eprintln!("failed to initialise logging: {err:#}");
  }

  match run(Cli::parse()) {
    Ok(true) => ExitCode::SUCCESS,
    Ok(false) => ExitCode::FAILURE,
    Err(err) => {
      tracing::error!("{err:#}");
      ExitCode::FAILURE
    }
  }
}

fn init_logging() -> Result<()> {
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let stderr_layer = tracing_subscriber::fmt::layer()
    .with_target(false)
    .compact()
    .with_writer(std::io::stderr);

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .try_init()
    .context("installing tracing subscriber")?;

  Ok(())
}

fn run(cli: Cli) -> Result<bool> {
  let dir = match cli.dir {
    Some(dir) => dir,
    None => std::env::current_dir().context("reading current directory")?,
  };
  let scope = ProjectScope::discover(&dir, cli.module.as_deref())
    .with_context(|| format!("loading project configuration from {}", dir.display()))?;

  match cli.command {
    Commands::Publish {
      target,
      pages,
      json,
    } => publish(&scope, PublishRequest { target, pages }, json),
    Commands::Deploy => publish(
      &scope,
      PublishRequest {
        target: TargetId::Storage.to_string(),
        pages: Vec::new(),
      },
      false,
    ),
    Commands::Pages => {
      print_pages(&scope)?;
      Ok(true)
    }
    Commands::Rewrite { file, target } => {
      rewrite_file(&scope, &file, &target)?;
      Ok(true)
    }
  }
}

fn publish(scope: &ProjectScope, request: PublishRequest, json: bool) -> Result<bool> {
  let run = AppPublisher::new(scope)
    .publish(&request)
    .with_context(|| format!("publishing to `{}`", request.target))?;

  if json {
    let summary = serde_json::to_string_pretty(&run.summary()).context("serialising summary")?;
    println!("{summary}");
  } else {
    for entry in run.manifest() {
      println!("{entry}");
    }
  }
  report_outcomes(&run);
  Ok(run.is_success())
}

fn report_outcomes(run: &AppRun) {
  for outcome in &run.outcomes {
    match &outcome.result {
      Ok(report) => {
        for warning in &report.warnings {
          eprintln!("warning: {warning}");
        }
      }
      Err(err) => eprintln!("error: {err}"),
    }
  }
}

fn print_pages(scope: &ProjectScope) -> Result<()> {
  let layout = ProjectLayout::new(&scope.app_root, scope.app.layout.clone());
  for module in scope.modules()? {
    let output_dir = layout.output_dir(&module.module);
    let pages = list_pages(&output_dir)
      .with_context(|| format!("listing pages in {}", output_dir.display()))?;
    for page in pages {
      println!("{}/{page}", module.module);
    }
  }
  Ok(())
}

fn rewrite_file(scope: &ProjectScope, file: &Path, target: &str) -> Result<()> {
  let Some(module) = &scope.module else {
    bail!("rewrite needs a module; pass --module or run inside a module directory");
  };

  let target: TargetId = target.parse()?;
  let layout = ProjectLayout::new(&scope.app_root, scope.app.layout.clone());
  let prefixes = PrefixResolver::new(&scope.app, target)?;
  let registry = HashMapRegistry::new(layout, scope.app.modules.iter().cloned());
  let rewriter = Rewriter::new(&module.module, &prefixes, &registry);

  let text = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
  let rewritten = rewriter
    .rewrite_document(DocumentKind::from_path(file), &text)
    .with_context(|| format!("rewriting {}", file.display()))?;

  print!("{}", rewritten.text);
  for warning in &rewritten.warnings {
    eprintln!("warning: {warning}");
  }
  Ok(())
}
