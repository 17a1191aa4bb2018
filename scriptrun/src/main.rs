use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use scriptrun_lib::{Context, ExitCode, PackResolver, ProcessExecutor, ScriptInvocation};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scriptrun")]
#[command(about = "Run scripts against project-local assemblies and extension packs")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Disable color output
    #[arg(long, global = true)]
    no_color: bool,

    /// Verbose output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script
    Run {
        /// Path to the script
        script: PathBuf,

        /// Show what would be executed without running
        #[arg(long)]
        dry_run: bool,

        /// Flags passed to the runner, replacing configured ones
        #[arg(long, allow_hyphen_values = true)]
        runner_flags: Option<String>,

        /// Arguments to pass to the script
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// List the assembly references a script would get
    Refs {
        /// Path to the script
        script: PathBuf,

        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },

    /// List configured packs
    Packs {
        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(long, default_value = "toml")]
        format: ConfigFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Toml,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet, cli.no_color);

    match run(cli) {
        Ok(exit_code) => process::exit(exit_code.into()),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(ExitCode::GenericError.into());
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool, no_color: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions { shell } = cli.command {
        return handle_completions(shell);
    }

    let context = Context::new(cli.config)?;

    match cli.command {
        Commands::Run {
            script,
            dry_run,
            runner_flags,
            args,
        } => handle_run(&context, script, dry_run, runner_flags, args),
        Commands::Refs { script, format } => handle_refs(&context, &script, format),
        Commands::Packs { format } => handle_packs(&context, format),
        Commands::Config { format } => handle_config(&context, format),
        Commands::Completions { shell } => handle_completions(shell),
    }
}

fn handle_run(
    context: &Context,
    script: PathBuf,
    dry_run: bool,
    runner_flags: Option<String>,
    args: Vec<String>,
) -> Result<ExitCode> {
    let flags = runner_flags.map(|flags| flags.split_whitespace().map(str::to_string).collect());
    let mut executor = ProcessExecutor::with_overrides(context.config.clone(), flags, dry_run);

    let result = context
        .execute_command(ScriptInvocation::new(script, args), &mut executor)
        .execute();

    Ok(result.into())
}

fn handle_refs(context: &Context, script: &Path, format: OutputFormat) -> Result<ExitCode> {
    use scriptrun_lib::FileSystem;

    let references = match context.file_system.get_working_directory(script)? {
        Some(working_directory) => context.discovery().discover_assemblies(&working_directory)?,
        None => {
            tracing::warn!("No working directory for {}", script.display());
            Vec::new()
        }
    };

    match format {
        OutputFormat::Human => {
            if references.is_empty() {
                println!("No assembly references found");
            }
            for reference in &references {
                println!("{}", reference.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&references)?);
        }
    }

    Ok(ExitCode::Success)
}

fn handle_packs(context: &Context, format: OutputFormat) -> Result<ExitCode> {
    let packs = context.pack_resolver.get_packs()?;

    match format {
        OutputFormat::Human => {
            if packs.is_empty() {
                println!("No packs configured");
            }
            for pack in &packs {
                if pack.env.is_empty() {
                    println!("{}", pack.name);
                } else {
                    let keys: Vec<&str> = pack.env.keys().map(String::as_str).collect();
                    println!("{} ({})", pack.name, keys.join(", "));
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&packs)?);
        }
    }

    Ok(ExitCode::Success)
}

fn handle_config(context: &Context, format: ConfigFormat) -> Result<ExitCode> {
    match format {
        ConfigFormat::Toml => print!("{}", toml::to_string_pretty(&context.config)?),
        ConfigFormat::Json => println!("{}", serde_json::to_string_pretty(&context.config)?),
    }
    Ok(ExitCode::Success)
}

fn handle_completions(shell: Shell) -> Result<ExitCode> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "scriptrun", &mut std::io::stdout());
    Ok(ExitCode::Success)
}
