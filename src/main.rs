//! A small command line tool for creating, inspecting, and evaluating
//! fully-connected network checkpoints using the library provided by `ckpt_rs`
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! cargo run -- init model.ckpt
//! cargo run -- inspect model.ckpt
//! ```

use std::path::PathBuf;

use ckpt_rs::{arch::Architecture, checkpoint::CheckpointRecord, nn::Network};

use clap::{Parser, Subcommand};

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a randomly initialized network and persist it as a checkpoint
    Init {
        #[clap(short, long, default_value_t = 784)]
        input_size: usize,
        #[clap(short, long, default_value_t = 10)]
        output_size: usize,
        /// Hidden layer widths, front to back
        #[clap(long, value_delimiter = ',', default_value = "512,256,128")]
        hidden: Vec<usize>,
        /// Seed for deterministic initialization
        #[clap(short, long)]
        seed: Option<u64>,
        path: PathBuf,
    },
    /// Print a checkpoint's architecture and parameter shapes
    Inspect { path: PathBuf },
    /// Rebuild the model from a checkpoint and evaluate one input vector
    Run {
        path: PathBuf,
        /// Comma separated input features, length must match the
        /// checkpoint's input size
        #[clap(short = 'x', long, value_delimiter = ',')]
        input: Vec<f32>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    match args.command {
        Command::Init {
            input_size,
            output_size,
            hidden,
            seed,
            path,
        } => {
            let arch = Architecture::new(input_size, output_size, hidden)?;
            let network = match seed {
                Some(seed) => Network::seeded(arch, seed),
                None => Network::new(arch),
            };
            let record = CheckpointRecord::from_network(&network);
            record.save(&path)?;
            println!("wrote {}", path.display());
        }
        Command::Inspect { path } => {
            let record = CheckpointRecord::load(&path)?;
            let arch = record.descriptor();
            println!("input_size: {}", arch.input_size());
            println!("output_size: {}", arch.output_size());
            println!("hidden_layers: {:?}", arch.hidden_layers());
            println!("state_dict:");
            for (key, tensor) in record.parameters().iter() {
                println!("  {key}: {:?}", tensor.shape());
            }
        }
        Command::Run { path, input } => {
            let record = CheckpointRecord::load(&path)?;
            let network = record.instantiate()?;
            let probabilities = network.forward(&input)?;
            for (class, p) in probabilities.iter().enumerate() {
                println!("class {class}: {p:.6}");
            }
        }
    }
    Ok(())
}
