/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codewriter::ir::Kind;
use codewriter::liveness::compute_liveness;
use codewriter::{format_assembler, unformat_assembler, BuildError, CompiledUnit, Config, ErrorKind, Session};

#[derive(Parser)]
#[command(name = "codewriter", about = "Register bytecode assembler", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(long, global = true)]
    verbose: bool,
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute liveness for a text-form program, encode it and report the unit
    Assemble {
        file: PathBuf,
        /// Print the encoded listing with byte positions
        #[arg(long)]
        dump: bool,
        /// Write the code bytes to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Re-render a text-form program in canonical form
    Fmt { file: PathBuf },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_program(file: &Path) -> Result<codewriter::ssa::SsaRepr, BuildError> {
    let text = std::fs::read_to_string(file).map_err(|e| {
        BuildError::new(ErrorKind::Io, format!("failed to read {}: {}", file.display(), e))
    })?;
    let name = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unit".to_string());
    unformat_assembler(&text, &name)
}

fn report(unit: &CompiledUnit, session: &Session) {
    println!("unit {}: {} bytes", unit.name(), unit.code().len());
    for kind in Kind::ALL {
        println!(
            "  {:5} {} registers, {} constants",
            kind.name(),
            unit.num_regs(kind),
            unit.constants(kind).len()
        );
    }
    println!("  {} liveness points", unit.liveness().count());
    println!(
        "  {} opcodes, {} descriptors in session",
        session.opcodes().len(),
        session.descrs().len()
    );
}

fn run(cli: Cli, config: Config) -> Result<(), BuildError> {
    match cli.cmd {
        Commands::Assemble { file, dump, out } => {
            let mut ssarepr = read_program(&file)?;
            compute_liveness(&mut ssarepr);
            let mut session = Session::from_config(&config);
            let unit = session.assemble(&mut ssarepr, None)?;
            report(&unit, &session);
            if dump {
                print!("{}", unit.dump());
            }
            if let Some(out) = out {
                std::fs::write(&out, unit.code()).map_err(|e| {
                    BuildError::new(ErrorKind::Io, format!("failed to write {}: {}", out.display(), e))
                })?;
            }
        }
        Commands::Fmt { file } => {
            let ssarepr = read_program(&file)?;
            print!("{}", format_assembler(&ssarepr));
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    let config = config.unwrap_or_else(|e| {
        eprintln!("{}", e.render(cli.config.as_ref().and_then(|p| p.to_str())));
        std::process::exit(1);
    });
    init_logging(cli.verbose || config.verbose);

    let path = match &cli.cmd {
        Commands::Assemble { file, .. } | Commands::Fmt { file } => file.display().to_string(),
    };
    if let Err(e) = run(cli, config) {
        eprintln!("{}", e.render(Some(&path)));
        std::process::exit(1);
    }
}
