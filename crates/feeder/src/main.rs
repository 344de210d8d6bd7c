use std::{path::PathBuf, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::{io::AsyncReadExt as _, sync::broadcast::error::RecvError};
use vplot_drawer::{
    sim::SimulatedActuator, Actuator, CommandStreamConsumer, ConfigBuilder, DrawerConfig,
    DrawerEvent, DrawerHandle, PenActuator,
};
use vplot_planner::AxisLimits;
use vplot_protocol::{Command, CommandStream};

const TICK: Duration = Duration::from_millis(50);

/// Draws a command file on simulated hardware.
#[derive(Parser)]
struct Args {
    /// Machine configuration (TOML). Defaults to the whiteboard rig.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the configuration and exit.
    #[arg(long)]
    dump_config: bool,

    /// Top speed of the simulated steppers, in steps per second.
    #[arg(long, default_value_t = 128_000.0)]
    max_velocity: f64,

    /// Top acceleration of the simulated steppers, in steps per second squared.
    #[arg(long, default_value_t = 1_000_000.0)]
    max_acceleration: f64,

    /// Commands to run. Reads stdin if missing.
    path: Option<PathBuf>,
}

/// Pens that only exist in the log.
struct LogPens;

impl PenActuator for LogPens {
    fn activate_pen(&mut self, index: u32) {
        log::info!("pen {index} down");
    }

    fn deactivate_pens(&mut self) {
        log::info!("pens up");
    }
}

async fn read_commands(path: Option<&PathBuf>) -> anyhow::Result<CommandStream> {
    let text = match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("couldn't read {}", path.display()))?,
        None => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            text
        }
    };
    let commands = CommandStream::parse(&text);
    if commands.skipped() > 0 {
        log::warn!("skipped {} lines that weren't commands", commands.skipped());
    }
    Ok(commands)
}

fn count_moves(commands: &CommandStream) -> u64 {
    commands
        .iter()
        .filter(|c| matches!(c, Command::Move { .. }))
        .count() as u64
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DrawerConfig::load(path)
            .with_context(|| format!("couldn't load {}", path.display()))?,
        None => ConfigBuilder::default().build()?,
    };
    if args.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let commands = read_commands(args.path.as_ref()).await?;
    let total = count_moves(&commands);

    let limits = AxisLimits {
        velocity_min: 0.0,
        velocity_max: args.max_velocity,
        acceleration_min: 0.0,
        acceleration_max: args.max_acceleration,
    };
    let actuators: Vec<Box<dyn Actuator>> = config
        .rig
        .ids()
        .map(|_| Box::new(SimulatedActuator::new(limits)) as Box<dyn Actuator>)
        .collect();

    let (drawer, join) = DrawerHandle::spawn(config.clone(), actuators)?;
    let mut events = drawer.subscribe();
    let consumer = CommandStreamConsumer::new(drawer.clone(), config.board, LogPens, commands);
    let run = tokio::spawn(consumer.run(drawer.subscribe()));

    let progress = MultiProgress::new();
    let waiting = progress.add(ProgressBar::new_spinner().with_message("Waiting for actuators..."));
    waiting.enable_steady_tick(TICK);
    drawer.open()?;

    let bar = progress.add(ProgressBar::new(total));
    bar.set_style(ProgressStyle::with_template("{bar:40} {pos}/{len} moves {msg}")?);
    let watcher = {
        let bar = bar.clone();
        let waiting = waiting.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DrawerEvent::Ready) => waiting.finish_with_message("ready!"),
                    Ok(DrawerEvent::Arrived) => bar.inc(1),
                    Ok(DrawerEvent::LineFeedLengthChanged { axis, length }) => {
                        bar.set_message(format!("{axis}: {:.1}mm", length.get()));
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let result = run.await?;
    bar.finish_with_message("done");

    let status = drawer.status().await?;
    log::info!(
        "finished at ({:.1}, {:.1}), {:?}",
        status.estimate.x,
        status.estimate.y,
        status.state
    );
    drawer.shutdown()?;
    join.await?;
    watcher.abort();

    result?;
    Ok(())
}
