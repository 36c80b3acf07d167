mod codegen;
mod config;
mod driver;
mod error;
mod listing;
mod macroexpand;
mod macros;
mod opcode;
mod optimizer;
mod parser;
mod symtab;
mod value;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

/// Compiles Lisp-like source files into 32-bit instruction words for the
/// stack VM. `runtime.lisp` is always parsed first.
#[derive(Parser, Debug)]
#[command(name = "lispvm-compiler")]
#[command(version = config::VERSION)]
#[command(about = "Compiles Lisp source into VM instruction words")]
struct CliArgs {
    /// Additional source files, parsed in order after the runtime library.
    #[arg(value_name = "FILE")]
    sources: Vec<PathBuf>,
}

fn run(args: CliArgs) -> Result<(), String> {
    let mut sources: Vec<(String, String)> = vec![(
        config::RUNTIME_SOURCE_NAME.to_string(),
        config::RUNTIME_SOURCE.to_string(),
    )];

    for path in &args.sources {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("reading {}: {}", path.display(), e))?;
        sources.push((path.display().to_string(), text));
    }

    let labeled: Vec<(&str, &str)> = sources
        .iter()
        .map(|(label, text)| (label.as_str(), text.as_str()))
        .collect();

    let output = driver::compile_sources(&labeled).map_err(|e| e.to_string())?;

    fs::write(config::HEX_OUTPUT_FILE, driver::format_hex(&output.program.words))
        .map_err(|e| format!("writing {}: {}", config::HEX_OUTPUT_FILE, e))?;

    let listing_text = listing::render(&output.program, &output.expanded).map_err(|e| e.to_string())?;
    fs::write(config::LISTING_OUTPUT_FILE, listing_text)
        .map_err(|e| format!("writing {}: {}", config::LISTING_OUTPUT_FILE, e))?;

    log::info!(
        "wrote {} words to {}",
        output.program.words.len(),
        config::HEX_OUTPUT_FILE
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = CliArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            log::error!("{}", message);
            ExitCode::FAILURE
        }
    }
}
