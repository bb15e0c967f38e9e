//! blkgraph - Main Entry Point
//!
//! Probe, inspect and check storage device graphs.

use anyhow::Context;
use blkgraph::filesystems::filesystems;
use blkgraph::*;
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

/// Storage device graph tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
EXAMPLES:
    # Look up a device of the running system
    blkgraph find /dev/sda

    # Save the probed devicegraph and inspect it later
    blkgraph probe --output probed.json
    blkgraph --devicegraph probed.json list

    # Render the devicegraph with Graphviz
    blkgraph dot | dot -Tsvg > devicegraph.svg
")]
struct Args {
    /// Environment configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Read the devicegraph from a saved JSON file instead of probing
    #[arg(short, long, global = true)]
    devicegraph: Option<PathBuf>,

    /// Root of the sysfs tree to probe
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find a block device by name and print its display name
    Find {
        /// Device path (e.g., /dev/sda)
        path: String,
    },
    /// List block devices and filesystems
    List,
    /// Probe the system and print or save the devicegraph as JSON
    Probe {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check the devicegraph for consistency
    Check,
    /// Print the devicegraph in Graphviz format
    Dot {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Reprobe whenever a block device appears or vanishes
    Watch,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match run(args) {
        Ok(()) => process::exit(0),
        Err(e) => {
            log::error!("{:#}", e);
            process::exit(1);
        }
    }
}

fn environment(args: &Args) -> anyhow::Result<Environment> {
    let mut env = match &args.config {
        Some(path) => Environment::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => Environment::default(),
    };

    if let Some(path) = &args.devicegraph {
        env.probe_mode = ProbeMode::ReadDevicegraph;
        env.devicegraph_file = Some(path.clone());
    }
    if let Some(path) = &args.sysfs_root {
        env.sysfs_root = path.clone();
    }

    Ok(env)
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut storage = Storage::new(environment(&args)?).context("Invalid environment")?;
    log::debug!("Probe mode: {}", storage.environment().probe_mode);

    storage.probe().context("Failed to probe devicegraph")?;
    let graph = storage.probed();

    match args.command {
        Command::Find { path } => {
            match BlkDevice::find_by_name(graph, &path) {
                Ok(device) => println!("{}", device.display_name()),
                Err(e) if e.is_device_not_found() => println!("device not found"),
                Err(e) => return Err(e.into()),
            }
            println!("done");
        }
        Command::List => {
            for device in BlkDevice::get_all(graph) {
                println!("{}", device.display_name());
            }
            for (filesystem, _) in filesystems(graph) {
                println!("{}", graph.display_name(filesystem.sid())?);
            }
        }
        Command::Probe { output } => match output {
            Some(path) => {
                graph
                    .save(&path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                println!("Saved {} devices to {}", graph.num_devices(), path.display());
            }
            None => println!("{}", graph.to_json()?),
        },
        Command::Check => {
            graph.check()?;
            println!(
                "devicegraph is consistent ({} devices, {} holders)",
                graph.num_devices(),
                graph.num_holders()
            );
        }
        Command::Dot { output } => match output {
            Some(path) => {
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                graph.write_graphviz(file)?;
            }
            None => graph.write_graphviz(io::stdout().lock())?,
        },
        Command::Watch => watch(&mut storage)?,
    }

    Ok(())
}

fn watch(storage: &mut Storage) -> anyhow::Result<()> {
    let env = storage.environment();
    let mut monitor = HotplugMonitor::new(&env.prefixed(&env.sysfs_root))
        .context("Failed to enable hotplug detection")?;

    println!("{} devices", storage.probed().num_devices());
    loop {
        for event in monitor.wait()? {
            log::info!("Hotplug: {}", event);
        }

        storage.probe()?;
        println!("{} devices", storage.probed().num_devices());
        io::stdout().flush()?;
    }
}
