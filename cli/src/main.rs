mod commands;

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use param_bind_core::{
    CommandSpecs, Decoder, DecoderConfig, ExecConfig, InitConfig, Input, RuleSet,
};
use serde::Serialize;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Serialization format for documents read and written by the CLI.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Debug, Parser)]
#[command(name = "param-bind")]
#[command(about = "Inspect parameter specs and bind tokenized input to demo commands")]
struct Cli {
    /// Log spec derivation, decoding and rule processing to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered command targets.
    List,
    /// Print the derived parameter spec of one or all commands.
    Spec(SpecArgs),
    /// Print the flags accepted at a target path or below it.
    Flags(FlagsArgs),
    /// Bind a tokenized input document and print the initialized parameters.
    Bind(BindArgs),
}

#[derive(Debug, Args)]
struct SpecArgs {
    /// Target path segments (e.g. `deploy rollback`); all commands when omitted.
    target: Vec<String>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: Format,
}

#[derive(Debug, Args)]
struct FlagsArgs {
    /// Target path segments; the root when omitted.
    target: Vec<String>,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: Format,
}

#[derive(Debug, Args)]
struct BindArgs {
    /// Input document path, or `-` for stdin.
    #[arg(long)]
    input: PathBuf,
    /// Format of the input document.
    #[arg(long, default_value = "json")]
    input_format: Format,
    /// Output format.
    #[arg(long, default_value = "json")]
    format: Format,
}

fn main() {
    let cli = Cli::parse();
    let log = logger(cli.verbose);

    let result = match cli.command {
        Command::List => run_list(&log),
        Command::Spec(args) => run_spec(args, &log),
        Command::Flags(args) => run_flags(args, &log),
        Command::Bind(args) => run_bind(args, &log),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn logger(verbose: bool) -> Dispatch {
    if !verbose {
        return Dispatch::none();
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace"));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    Dispatch::new(subscriber)
}

fn registry(log: &Dispatch) -> Result<CommandSpecs, String> {
    commands::registry(ExecConfig::default().with_log(log.clone()))
        .map_err(|err| format!("Failed to register commands: {err}"))
}

fn run_list(log: &Dispatch) -> Result<(), String> {
    let specs = registry(log)?;
    for target in specs.targets() {
        let segments: Vec<&str> = target.iter().map(String::as_str).collect();
        let about = commands::about(&specs, &segments).unwrap_or_default();
        println!("{:<20} {about}", segments.join(" "));
    }
    Ok(())
}

fn run_spec(args: SpecArgs, log: &Dispatch) -> Result<(), String> {
    let specs = registry(log)?;

    if args.target.is_empty() {
        let all: BTreeMap<String, _> = specs
            .targets()
            .filter_map(|target| {
                let segments: Vec<&str> = target.iter().map(String::as_str).collect();
                specs
                    .exec(&segments)
                    .map(|spec| (target.join(" "), &**spec))
            })
            .collect();
        return print_document(&all, args.format);
    }

    let segments: Vec<&str> = args.target.iter().map(String::as_str).collect();
    let spec = specs
        .exec(&segments)
        .ok_or_else(|| format!("unspecified target '{}'", args.target.join(" ")))?;
    print_document(&**spec, args.format)
}

fn run_flags(args: FlagsArgs, log: &Dispatch) -> Result<(), String> {
    let specs = registry(log)?;
    let segments: Vec<&str> = args.target.iter().map(String::as_str).collect();
    let flags = specs
        .flags(&segments)
        .ok_or_else(|| format!("no commands under '{}'", args.target.join(" ")))?;
    print_document(flags, args.format)
}

fn run_bind(args: BindArgs, log: &Dispatch) -> Result<(), String> {
    let raw = read_input(&args.input)?;
    let input: Input = match args.input_format {
        Format::Json => serde_json::from_str(&raw)
            .map_err(|e| format!("Failed to parse input document: {e}"))?,
        Format::Yaml => serde_yaml::from_str(&raw)
            .map_err(|e| format!("Failed to parse input document: {e}"))?,
    };

    let specs = registry(log)?;
    let spec = specs
        .resolve(&input)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("unspecified target '{}'", input.target_display()))?;
    let def = commands::find(&input.target)
        .ok_or_else(|| format!("no binding for target '{}'", input.target_display()))?;

    let mut rules = RuleSet::with_config(InitConfig::default().with_log(log.clone()));
    commands::install_rules(&mut rules);

    let target = input.target_display();
    let decoder = Decoder::with_config(input, DecoderConfig::default().with_log(log.clone()));
    let params = (def.bind)(&decoder, &**spec, &rules)?;

    #[derive(Serialize)]
    struct BindOutput {
        target: String,
        params: serde_json::Value,
    }

    print_document(&BindOutput { target, params }, args.format)
}

fn read_input(path: &Path) -> Result<String, String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .map_err(|err| format!("Failed to read stdin: {err}"))?;
        return Ok(raw);
    }
    fs::read_to_string(path).map_err(|err| format!("Failed to read {}: {err}", path.display()))
}

fn print_document<T: Serialize + ?Sized>(value: &T, format: Format) -> Result<(), String> {
    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(value)
                .map_err(|e| format!("Failed to serialize output: {e}"))?;
            println!("{json}");
        }
        Format::Yaml => {
            let yaml = serde_yaml::to_string(value)
                .map_err(|e| format!("Failed to serialize output: {e}"))?;
            print!("{yaml}");
        }
    }
    Ok(())
}
