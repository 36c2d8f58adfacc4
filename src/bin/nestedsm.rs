//! Command line front end for machines described in JSON.
//!
//! * `nestedsm export player.json` prints the PlantUML diagram of the machine.
//! * `nestedsm run player.json Play Pause Stop` starts it, feeds the events in order and prints
//!   the active leaf states at the end.  With `--cooperative` the events go through a
//!   [MachineRunner] on a tokio task instead of being processed inline.

use std::fs;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};

use nestedsm::description::MachineDescription;
use nestedsm::machine_factory::MachineFactory;
use nestedsm::transition_logger::TransitionLogger;
use state_machine::{ExportOptions, MachineConfig, MachineRunner, StateMachine, ThrowingIgnoredEventHandler};

#[derive(Parser, Debug)]
#[clap(name = "nestedsm")]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the machine as a PlantUML state diagram.
    Export {
        file: PathBuf,

        /// Add event names to transition labels.
        #[clap(long)]
        event_labels: bool,

        /// Write the diagram here instead of stdout.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the machine and feed it events.
    Run {
        file: PathBuf,

        events: Vec<String>,

        /// Fail on events no transition matches.
        #[clap(long)]
        strict: bool,

        /// Deliver events through the async runner.
        #[clap(long)]
        cooperative: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();
    match opts.command {
        Command::Export { file, event_labels, output } => {
            let description = MachineDescription::from_path(&file)?;
            let machine = MachineFactory::build(&description, MachineConfig::default())?;
            let diagram = machine.export_plantuml(ExportOptions { show_event_labels: event_labels });
            match output {
                Some(path) => {
                    fs::write(&path, diagram)?;
                    info!("Wrote {}", path.display());
                }
                None => print!("{}", diagram),
            }
        }
        Command::Run { file, events, strict, cooperative } => {
            let description = MachineDescription::from_path(&file)?;
            let mut config: MachineConfig<String> = MachineConfig::default();
            if strict {
                config.ignored_event_handler = Box::new(ThrowingIgnoredEventHandler);
            }
            let machine = MachineFactory::build(&description, config)?;
            TransitionLogger::attach(&machine)?;

            let machine = if cooperative {
                run_cooperative(machine, events, strict).await?
            } else {
                run_inline(machine, events)?
            };

            let leaves: Vec<String> = machine
                .active_leaves()
                .into_iter()
                .map(|s| machine.state(s).map(|n| n.debug_name()))
                .collect::<Result<_, _>>()?;
            println!("{}", leaves.join(", "));
            if machine.is_finished() {
                println!("(finished)");
            }
        }
    }
    Ok(())
}

fn run_inline(machine: StateMachine<String>, events: Vec<String>) -> anyhow::Result<StateMachine<String>> {
    machine.start()?;
    for event in events {
        machine.process_event(event)?;
    }
    Ok(machine)
}

async fn run_cooperative(
    machine: StateMachine<String>,
    events: Vec<String>,
    strict: bool,
) -> anyhow::Result<StateMachine<String>> {
    let runner = MachineRunner::start(machine)?;
    let dispatcher = runner.dispatcher();
    for event in events {
        dispatcher.dispatch(event).await;
    }
    let outcome = runner.shutdown().await?;
    for e in &outcome.errors {
        warn!("{}", e);
    }
    match outcome.errors.into_iter().next() {
        Some(e) if strict => Err(anyhow!("{} failed: {}", outcome.machine.name(), e)),
        _ => Ok(outcome.machine),
    }
}
