use std::{fs, path::PathBuf, process::exit};

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use gitsync_core::config::{get_default_config_path, load_config, ConfigFile as CoreConfigFile, DEFAULT_CONFIG_CONTENT};
use gitsync_core::git::GitDriver;
use gitsync_core::identity::IdentityOracle;
use gitsync_core::pathspec::PathSpecTranslator;
use gitsync_core::refs::RefInventory;
use gitsync_core::tags::{TagOptions, TagReconciler};
use gitsync_core::{run, GitSyncError, RunConfig, Verbosity};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bidirectional partial-repository git sync.", long_about = None)]
struct Cli {
  #[arg(short, long, value_name = "FILE", global = true, help = "Path to config file")]
  config: Option<PathBuf>,

  #[arg(long, global = true, help = "Print verbose diagnostic logs")]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
  /// Manage the gitsync configuration file
  Config {
    #[command(subcommand)]
    action: ConfigAction,
  },
  /// Project a source repository's commits, branches, and tags into a target repository
  Sync {
    /// The `[runs.<id>]` table to use from the configuration file
    run_id: String,
    #[arg(long, help = "Only consider commits authored after this unix timestamp")]
    after: Option<i64>,
    #[arg(long, help = "Limit how many new commits are scanned")]
    max_count: Option<usize>,
    #[arg(short = 'y', long, help = "Skip the confirmation prompt")]
    yes: bool,
  },
  /// Show which source branches a run would project, without touching the target repository
  Branches { run_id: String },
  /// Show which source tags a run would create, without touching the target repository
  Tags { run_id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
  /// Create a default configuration file if one doesn't exist
  Init,
  /// List every configured run
  List,
  /// Show the resolved configuration for a run
  Show { run_id: String },
  /// Validate that the configuration file parses
  Validate,
}

fn main() {
  let cli = Cli::parse();

  if cli.verbose {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
  } else {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
  }

  if let Err(e) = run_cli(cli) {
    eprintln!("\nOperation failed: {e}");
    exit(1);
  }
}

fn run_cli(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
  if let Commands::Config {
    action: ConfigAction::Init,
  } = cli.command
  {
    return handle_config_init(cli.config.as_deref());
  }

  let config_file = match load_config(cli.config.as_deref()) {
    Ok(config) => {
      log::info!("loaded config with {} run(s)", config.runs.len());
      config
    }
    Err(GitSyncError::ConfigNotFound(path)) => {
      eprintln!("Error: configuration file not found at {}", path.display());
      eprintln!("Run `gitsync config init` to create a default configuration file,");
      eprintln!("or pass a path explicitly with --config.");
      exit(1);
    }
    Err(e) => {
      eprintln!("Error loading configuration: {e}");
      exit(1);
    }
  };

  let verbosity = if cli.verbose { Verbosity::Verbose } else { Verbosity::Info };

  match cli.command {
    Commands::Config { action } => handle_config_action(action, &config_file),
    Commands::Sync {
      run_id,
      after,
      max_count,
      yes,
    } => handle_sync(run_id, after, max_count, yes, verbosity, &config_file),
    Commands::Branches { run_id } => handle_branches(run_id, &config_file),
    Commands::Tags { run_id } => handle_tags(run_id, &config_file),
  }
}

fn handle_config_init(path_override: Option<&std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
  let config_path = match path_override {
    Some(p) => p.to_path_buf(),
    None => get_default_config_path()?,
  };

  println!("Checking for configuration file at: {}", config_path.display());

  if config_path.exists() {
    println!("Configuration file already exists. No action taken.");
    return Ok(());
  }

  if let Some(parent_dir) = config_path.parent() {
    if !parent_dir.exists() {
      fs::create_dir_all(parent_dir)
        .map_err(|e| format!("failed to create config directory '{}': {e}", parent_dir.display()))?;
    }
  }

  fs::write(&config_path, DEFAULT_CONFIG_CONTENT)
    .map_err(|e| format!("failed to write default config file '{}': {e}", config_path.display()))?;

  println!("Created default configuration file at: {}", config_path.display());
  println!("Edit it to add a [runs.<id>] table per source/target pairing.");
  Ok(())
}

fn handle_config_action(action: ConfigAction, config: &CoreConfigFile) -> Result<(), Box<dyn std::error::Error>> {
  match action {
    ConfigAction::Init => unreachable!("handled before config load"),
    ConfigAction::List => {
      println!("Configured runs:");
      if config.runs.is_empty() {
        println!("  (none configured)");
      } else {
        let mut ids: Vec<&String> = config.runs.keys().collect();
        ids.sort();
        for id in ids {
          println!("- {id}");
        }
      }
    }
    ConfigAction::Show { run_id } => match config.runs.get(&run_id) {
      Some(run_config) => println!("{run_config:#?}"),
      None => {
        eprintln!("Error: run '{run_id}' not found in configuration.");
        exit(1);
      }
    },
    ConfigAction::Validate => {
      println!("Configuration loaded successfully ({} run(s)).", config.runs.len());
    }
  }
  Ok(())
}

fn handle_sync(
  run_id: String,
  after_override: Option<i64>,
  max_count_override: Option<usize>,
  skip_confirmation: bool,
  verbosity: Verbosity,
  config_file: &CoreConfigFile,
) -> Result<(), Box<dyn std::error::Error>> {
  let mut run_config: RunConfig = config_file
    .runs
    .get(&run_id)
    .cloned()
    .ok_or_else(|| format!("run '{run_id}' not found in configuration."))?;

  if let Some(after) = after_override {
    run_config.after = Some(after);
  } else if run_config.after.is_none() {
    run_config.after = config_file.settings.default_after;
  }
  if max_count_override.is_some() {
    run_config.max_count = max_count_override;
  }
  if config_file.settings.default_preserve_commit == Some(true) && !run_config.preserve_commit {
    run_config.preserve_commit = true;
  }

  println!(
    "About to sync \"{}\" ({}) -> \"{}\" ({})",
    run_config.source_dir.display(),
    run_config.source_subdir,
    run_config.target_dir.display(),
    run_config.target_subdir
  );

  if !skip_confirmation {
    let proceed = Confirm::new()
      .with_prompt(format!(
        "This will commit into \"{}\". Continue?",
        run_config.target_dir.display()
      ))
      .default(true)
      .interact()?;
    if !proceed {
      println!("Sync cancelled.");
      return Ok(());
    }
  }

  match run(&run_config, verbosity) {
    Ok(report) => {
      println!("{}", report.commits_line());
      println!("{}", report.synced_line());
      println!("{}", report.branches_line());
      println!("{}", report.tags_line());
      Ok(())
    }
    Err(GitSyncError::Conflict) => {
      // The orchestrator has already printed the bit-exact recovery
      // message; surface a plain failure here.
      Err(Box::new(GitSyncError::Conflict))
    }
    Err(e) => Err(Box::new(e)),
  }
}

fn lookup_run<'a>(run_id: &str, config_file: &'a CoreConfigFile) -> Result<&'a RunConfig, Box<dyn std::error::Error>> {
  config_file
    .runs
    .get(run_id)
    .ok_or_else(|| format!("run '{run_id}' not found in configuration.").into())
}

/// `gitsync branches <run-id>`: a read-only preview of C8's output —
/// resolves every included source branch tip through the identity oracle
/// but never creates or moves a target branch.
fn handle_branches(run_id: String, config_file: &CoreConfigFile) -> Result<(), Box<dyn std::error::Error>> {
  let run_config = lookup_run(&run_id, config_file)?;
  let git = GitDriver::new();
  let translator = PathSpecTranslator::new(&run_config.source_subdir, &run_config.target_subdir, run_config.filters.clone());
  let (_, target_paths) = translator.paths();

  let ref_inv = RefInventory::new(&git);
  let all_branches = ref_inv.branches(&run_config.source_dir)?;
  let branches = RefInventory::filter(&all_branches, &run_config.include_branches, &run_config.exclude_branches)?;

  if branches.is_empty() {
    println!("No source branches match the configured include/exclude filters.");
    return Ok(());
  }

  let mut oracle = IdentityOracle::new(&git);
  println!("Source branches \"{}\" would project:", run_config.source_dir.display());
  for branch in &branches {
    let tip = git.output(&["rev-parse", branch], &run_config.source_dir)?;
    let resolved = oracle.resolve(&run_config.source_dir, &run_config.target_dir, &target_paths, &tip, None)?;
    match resolved {
      Some(target_hash) => println!("  {branch} ({tip}) -> already in target at {target_hash}"),
      None => println!("  {branch} ({tip}) -> new to target"),
    }
  }
  Ok(())
}

/// `gitsync tags <run-id>`: a read-only preview of C9's output — lists
/// every source tag not yet present in the target, under the configured
/// prefix transform, without creating it.
fn handle_tags(run_id: String, config_file: &CoreConfigFile) -> Result<(), Box<dyn std::error::Error>> {
  let run_config = lookup_run(&run_id, config_file)?;
  if run_config.no_tags {
    println!("Run \"{run_id}\" has no-tags set; tag reconciliation is skipped during sync.");
    return Ok(());
  }

  let git = GitDriver::new();
  let translator = PathSpecTranslator::new(&run_config.source_subdir, &run_config.target_subdir, run_config.filters.clone());
  let (_, target_paths) = translator.paths();
  let reconciler = TagReconciler::new(&git, &run_config.source_dir, &run_config.target_dir, &target_paths);

  let source_tags = reconciler.list_tags(&run_config.source_dir)?;
  let target_tags = reconciler.list_tags(&run_config.target_dir)?;
  let target_names: std::collections::HashSet<&str> = target_tags.iter().map(|t| t.name.as_str()).collect();

  let opts = TagOptions {
    include: run_config.include_tags.clone(),
    exclude: run_config.exclude_tags.clone(),
    add_prefix: run_config.add_tag_prefix.clone(),
    remove_prefix: run_config.remove_tag_prefix.clone(),
  };
  let new_tags: Vec<_> = source_tags
    .iter()
    .filter(|t| !target_names.contains(reconciler.transform_name(&t.name, &opts).as_str()))
    .collect();

  let mut include = opts.include.clone();
  if let Some(prefix) = &opts.remove_prefix {
    include.push(format!("{prefix}*"));
  }
  let names: Vec<String> = new_tags.iter().map(|t| t.name.clone()).collect();
  let filtered = RefInventory::filter(&names, &include, &opts.exclude)?;
  let filtered: std::collections::HashSet<&str> = filtered.iter().map(|s| s.as_str()).collect();

  let mut oracle = IdentityOracle::new(&git);
  let mut printed_any = false;
  for tag in new_tags.iter().filter(|t| filtered.contains(t.name.as_str())) {
    printed_any = true;
    let target_name = reconciler.transform_name(&tag.name, &opts);
    let resolved = oracle.resolve(&run_config.source_dir, &run_config.target_dir, &target_paths, &tag.hash, None)?;
    match resolved {
      Some(target_hash) => println!("  {} -> would create \"{target_name}\" at {target_hash}", tag.name),
      None => println!("  {} -> would create \"{target_name}\" but its commit has no target counterpart yet", tag.name),
    }
  }
  if !printed_any {
    println!("No new source tags match the configured filters.");
  }
  Ok(())
}
