//! Fable CLI - Command-line interface for the Fable scripting language

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use fable_core::ast::SubroutineKind;
use fable_core::bytecode::{disassemble, Compiler, StrId};
use fable_core::lexer::LineIndex;
use fable_core::module::{Module, ModuleRegistry, ModuleWriter};
use fable_core::scheduler::Scheduler;
use fable_core::vm::Vm;

mod host;

#[derive(Parser)]
#[command(name = "fable")]
#[command(version = fable_core::VERSION)]
#[command(about = "The Fable visual-novel scripting language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a script and report diagnostics without building
    Check {
        /// Path to the script file
        file: PathBuf,
    },

    /// Compile a script into a module container
    Build {
        /// Path to the script file
        file: PathBuf,

        /// Output module path (defaults to the input with .fabm)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rebuild even if the module is newer than the script
        #[arg(long)]
        force: bool,
    },

    /// Print the contents of a compiled module
    Disasm {
        /// Path to the module file
        file: PathBuf,
    },

    /// Play a story in the terminal
    Run {
        /// Path to a script (.fab) or compiled module (.fabm)
        file: PathBuf,

        /// Subroutine to start in (defaults to the first chapter or
        /// scene in the module)
        #[arg(short, long)]
        entry: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Build {
            file,
            output,
            force,
        } => build(&file, output.as_deref(), force).map(|_| ()),
        Commands::Disasm { file } => disasm(&file),
        Commands::Run { file, entry } => run(&file, entry.as_deref()),
    }
}

fn parse_source(file: &Path) -> Result<(String, fable_core::ast::ScriptUnit)> {
    let source = fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (unit, diagnostics) = fable_core::Parser::parse(&source);
    if !diagnostics.is_empty() {
        let index = LineIndex::new(&source);
        for diagnostic in &diagnostics {
            let location = index.location(diagnostic.span.start);
            eprintln!("{}:{location}: {}", file.display(), diagnostic.kind);
        }
        bail!(
            "{} error{} in {}",
            diagnostics.len(),
            if diagnostics.len() == 1 { "" } else { "s" },
            file.display()
        );
    }
    Ok((source, unit))
}

fn check(file: &Path) -> Result<()> {
    let (_, unit) = parse_source(file)?;
    // Surface compile-stage limits too (string table, body size)
    Compiler::compile(&unit).with_context(|| format!("failed to compile {}", file.display()))?;
    let subroutines = unit.subroutines().count();
    println!(
        "{}: ok ({subroutines} subroutine{})",
        file.display(),
        if subroutines == 1 { "" } else { "s" }
    );
    Ok(())
}

fn source_mtime_ms(file: &Path) -> Result<i64> {
    let modified = fs::metadata(file)
        .and_then(|m| m.modified())
        .with_context(|| format!("failed to stat {}", file.display()))?;
    Ok(DateTime::<Utc>::from(modified).timestamp_millis())
}

/// Compile one script to its module container. Returns the output path.
/// Unless forced, a module at least as new as its script is left alone.
fn build(file: &Path, output: Option<&Path>, force: bool) -> Result<PathBuf> {
    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| file.with_extension("fabm"));
    let mtime = source_mtime_ms(file)?;

    if !force && out_path.exists() {
        if let Ok(mut existing) = File::open(&out_path) {
            if let Ok(stamp) = Module::peek_timestamp(&mut existing) {
                if stamp >= mtime {
                    println!("{} is up to date", out_path.display());
                    return Ok(out_path);
                }
            }
        }
    }

    let (_, unit) = parse_source(file)?;
    let compiled = Compiler::compile(&unit)
        .with_context(|| format!("failed to compile {}", file.display()))?;
    let mut out = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    ModuleWriter::with_timestamp(mtime)
        .write(&compiled, &mut out)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    println!("built {}", out_path.display());
    Ok(out_path)
}

fn load_module(file: &Path) -> Result<Module> {
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let handle =
        File::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    Module::load(handle, name).with_context(|| format!("failed to load {}", file.display()))
}

fn disasm(file: &Path) -> Result<()> {
    let module = load_module(file)?;

    let stamp = DateTime::<Utc>::from_timestamp_millis(module.timestamp_ms())
        .map_or_else(|| module.timestamp_ms().to_string(), |t| t.to_rfc3339());
    println!("module {} (built {stamp})", module.name());
    for import in module.imports() {
        println!("include {import}");
    }

    let mut strings = Vec::with_capacity(module.string_count());
    for i in 0..module.string_count() {
        strings.push(module.string(StrId(i as u16))?.to_string());
    }

    for index in 0..module.subroutine_count() {
        let info = module.info(index).context("missing runtime info")?;
        println!();
        let body = module.subroutine(index)?;
        print!("{}", disassemble(&body, &info.name, &strings));
    }
    Ok(())
}

/// Load every transitive import of a module next to it on disk,
/// compiling stale or missing modules from their scripts when possible.
fn load_imports(root: &Module, base: &Path, registry: &mut ModuleRegistry) -> Result<()> {
    let mut pending: Vec<String> = root.imports().to_vec();
    let mut seen: HashSet<String> = pending.iter().cloned().collect();

    while let Some(import) = pending.pop() {
        let script = base.join(&import);
        let compiled = script.with_extension("fabm");
        let path = if compiled.exists() {
            compiled
        } else if script.exists() {
            build(&script, None, false)?
        } else {
            eprintln!("warning: include {import} not found under {}", base.display());
            continue;
        };
        let module = load_module(&path)?;
        for next in module.imports() {
            if seen.insert(next.clone()) {
                pending.push(next.clone());
            }
        }
        registry.insert(import, Rc::new(module));
    }
    Ok(())
}

fn run(file: &Path, entry: Option<&str>) -> Result<()> {
    let module_path = if file.extension().is_some_and(|e| e == "fab") {
        build(file, None, false)?
    } else {
        file.to_path_buf()
    };
    let module = Rc::new(load_module(&module_path)?);
    let base = module_path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let mut registry = ModuleRegistry::new();
    load_imports(&module, &base, &mut registry)?;

    let entry = match entry {
        Some(name) => {
            if module.find(name).is_none() {
                bail!("no subroutine named '{name}' in {}", module_path.display());
            }
            name.to_string()
        }
        None => (0..module.subroutine_count())
            .filter_map(|i| module.info(i))
            .find(|info| info.kind != SubroutineKind::Function)
            .map(|info| info.name.clone())
            .with_context(|| {
                format!("{} has no chapter or scene to start in", module_path.display())
            })?,
    };

    let mut scheduler = Scheduler::new(Vm::with_registry(registry));
    scheduler.spawn("main", module, entry);
    let mut host = host::ConsoleHost::new();
    let faults = scheduler.run(&mut host);
    if !faults.is_empty() {
        for fault in &faults {
            eprintln!("{fault}");
        }
        bail!("story ended with {} faulted thread(s)", faults.len());
    }
    Ok(())
}
