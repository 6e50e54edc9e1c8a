use anyhow::Result;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::dispatch::Atom;
use crate::host::{FileSource, Processor};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script over an input signal and write the output signal
    Render {
        /// Script file defining the processing functions
        script: PathBuf,

        /// Function to make active before processing
        #[arg(long)]
        function: Option<String>,

        /// Input JSON file (array of floats); silence if omitted
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output JSON file; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,

        /// Samples per block
        #[arg(long, default_value_t = 64)]
        block_size: usize,

        /// Sample rate in Hz
        #[arg(long, default_value_t = 44100.0)]
        sample_rate: f64,

        /// Number of blocks to run when no input file is given
        #[arg(long, default_value_t = 1)]
        blocks: usize,

        /// Named parameter, as name=value (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Print collected diagnostics as JSON on stderr
        #[arg(long)]
        json: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            script,
            function,
            input,
            out,
            block_size,
            sample_rate,
            blocks,
            params,
            json,
        } => render_offline(
            script,
            function,
            input,
            out,
            block_size,
            sample_rate,
            blocks,
            params,
            json,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn render_offline(
    script: PathBuf,
    function: Option<String>,
    input_path: Option<PathBuf>,
    out_path: Option<PathBuf>,
    block_size: usize,
    sample_rate: f64,
    blocks: usize,
    params: Vec<String>,
    json: bool,
) -> Result<()> {
    if block_size == 0 {
        anyhow::bail!("block size must be at least 1");
    }

    let samples = match input_path {
        Some(path) => read_samples(&path)?,
        None => vec![0.0; block_size * blocks],
    };

    let mut processor = Processor::new(FileSource::new(script))?;
    processor.on_block_setup(sample_rate, block_size);

    if let Some(name) = &function {
        if let Err(e) = processor.on_message(Some(name.as_str()), &[]) {
            log::warn!("'{}' not activated: {}", name, e);
        }
    }

    let named = parse_param_args(&params)?;
    if !named.is_empty() {
        processor.on_message(None, &named)?;
    }

    let mut output = Vec::with_capacity(samples.len());
    let mut block_out = vec![0.0; block_size];
    for chunk in samples.chunks(block_size) {
        let block_out = &mut block_out[..chunk.len()];
        processor.process_block(chunk, block_out);
        output.extend_from_slice(block_out);
    }

    let diagnostics = processor.take_diagnostics();
    if json {
        eprintln!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else {
        for diag in &diagnostics {
            log::warn!("{:?} fault during {:?}: {}", diag.kind, diag.phase, diag.message);
        }
    }

    let rendered = serde_json::to_string(&output)?;
    match out_path {
        Some(path) => std::fs::write(&path, rendered)?,
        None => println!("{}", rendered),
    }
    Ok(())
}

fn read_samples(path: &PathBuf) -> Result<Vec<f64>> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let samples: Vec<f64> = serde_json::from_str(&contents)
        .or_else(|_| {
            // Fallback: space separated?
            contents
                .split_whitespace()
                .map(|s| s.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(|_| {
            anyhow::anyhow!(
                "Failed to parse input file as JSON list of floats or whitespace separated floats"
            )
        })?;
    Ok(samples)
}

fn parse_param_args(params: &[String]) -> Result<Vec<Atom>> {
    let mut atoms = Vec::with_capacity(params.len() * 2);
    for param in params {
        let (name, value) = param
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected NAME=VALUE, got '{}'", param))?;
        let value: f64 = value
            .parse()
            .map_err(|_| anyhow::anyhow!("'{}' is not a number in '{}'", value, param))?;
        atoms.push(Atom::Sym(name.to_string()));
        atoms.push(Atom::Num(value));
    }
    Ok(atoms)
}
