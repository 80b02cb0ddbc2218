use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use deriva::ast::Model;
use deriva::backend::{Backend, backend_by_name};
use deriva::declaration;
use deriva::script::Script;

#[derive(Parser)]
#[command(name = "deriva", version, about = "Compile and run getter/setter declarations")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the program generated for a declaration
    Compile {
        /// Declaration file (YAML, or JSON by extension); stdin when omitted
        declaration: Option<PathBuf>,

        #[arg(short, long, env = "DERIVA_BACKEND", default_value = "optimizing")]
        backend: String,
    },
    /// Run a script and print the getter snapshot after every step
    Run {
        script: PathBuf,

        #[arg(short, long, env = "DERIVA_BACKEND", default_value = "optimizing")]
        backend: String,

        /// Also print how many times each getter was built
        #[arg(long)]
        builds: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Compile {
            declaration,
            backend,
        } => cmd_compile(declaration.as_deref(), &backend),
        Commands::Run {
            script,
            backend,
            builds,
        } => cmd_run(&script, &backend, builds),
    }
}

fn read_model(path: Option<&Path>) -> Result<Model> {
    let (source, label) = match path {
        Some(path) => (
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?,
            path.display().to_string(),
        ),
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Reading stdin")?;
            (buffer, "stdin".to_string())
        }
    };

    let is_json = path.is_some_and(|path| path.extension().is_some_and(|ext| ext == "json"));
    let model = if is_json {
        let value: serde_json::Value =
            serde_json::from_str(&source).with_context(|| format!("Parsing {label}"))?;
        declaration::from_json(&value)
    } else {
        declaration::parse_yaml(&source)
    };
    model.with_context(|| format!("Loading declaration from {label}"))
}

fn cmd_compile(path: Option<&Path>, backend_name: &str) -> Result<()> {
    let backend = backend_by_name(backend_name)?;
    let model = read_model(path)?;
    let prepared = backend.prepare(&model)?;
    let program = prepared.program();
    tracing::info!(
        backend = backend.name(),
        getters = program.getters.len(),
        setters = program.setters.len(),
        "compiled"
    );
    print!("{program}");
    Ok(())
}

fn cmd_run(path: &Path, backend_name: &str, builds: bool) -> Result<()> {
    let backend: Box<dyn Backend> = backend_by_name(backend_name)?;
    let script = Script::load(path)?;
    tracing::info!(
        backend = backend.name(),
        steps = script.steps.len(),
        "running {}",
        path.display()
    );

    let run = script.run(backend.as_ref())?;
    for snapshot in &run.snapshots {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    }

    if builds {
        let counts: serde_json::Map<String, serde_json::Value> = run
            .instance
            .program()
            .getters
            .iter()
            .map(|getter| {
                let count = run.instance.build_count(&getter.name).unwrap_or_default();
                (getter.name.to_string(), serde_json::Value::from(count))
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&counts)?);
    }
    let stats = run.instance.stats();
    tracing::info!(
        triggers = stats.triggers,
        propagations = stats.propagations,
        callbacks = stats.callbacks,
        "done"
    );
    Ok(())
}
