use std::time::Duration;

use clap::{Parser, Subcommand};
use weft_common::config::AppConfig;

use crate::logging::init_logging;
use crate::simulation::{run_simulation, SimulationOptions};

#[derive(Parser)]
#[command(version, name = "weft")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the effective configuration as JSON")]
    Config,
    #[command(about = "Run a produce-and-reduce workload on in-process workers")]
    Simulate {
        #[arg(long, default_value_t = 1, help = "The number of concurrent applications")]
        applications: usize,
        #[arg(long, default_value_t = 16, help = "The number of values to produce")]
        tasks: usize,
        #[arg(long, help = "The number of values folded by each reduce operation")]
        chunk_size: Option<usize>,
        #[arg(long, default_value_t = 2, help = "The number of static workers")]
        workers: usize,
        #[arg(long, default_value_t = 100, help = "The duration of each task in milliseconds")]
        task_ms: u64,
        #[arg(long, help = "Let the resource optimizer create local instances")]
        elastic: bool,
    },
}

pub fn main(args: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_from(args);

    match cli.command {
        Command::Config => {
            let config = AppConfig::load()?;
            println!("{}", config.to_json()?);
        }
        Command::Simulate {
            applications,
            tasks,
            chunk_size,
            workers,
            task_ms,
            elastic,
        } => {
            init_logging();
            let config = AppConfig::load()?;
            let options = SimulationOptions {
                applications,
                tasks,
                chunk_size: chunk_size.unwrap_or(config.runtime.reduce_chunk_size),
                workers,
                task_time: Duration::from_millis(task_ms),
                elastic,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let snapshot = runtime.block_on(run_simulation(&config, options))?;
            println!("{}", snapshot.to_json()?);
        }
    }
    Ok(())
}
