use anyhow::Result;
use clap::{Parser, Subcommand};
use simgraph::{cluster, pipeline};

#[derive(Parser)]
#[command(name = "simgraph")]
#[command(version = "0.1.0")]
#[command(about = "All-against-all protein similarity search and graph reduction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every protein pair and persist the similarity edges
    Scan(pipeline::ScanArgs),

    /// Reduce a persisted edge store into a single-linkage cluster forest
    Cluster(cluster::ClusterArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => {
            pipeline::run(args)?;
        }
        Commands::Cluster(args) => {
            cluster::run(args)?;
        }
    }
    Ok(())
}
