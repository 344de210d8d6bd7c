//! Motion control for a cable-suspended drawing cradle.
//!
//! A [`Drawer`] tracks where the cradle is (from the line lengths that the
//! actuators report), breaks requested moves into short straight segments,
//! and tells the actuators how fast to wind each line so that they all
//! finish each segment together. [`DrawerHandle::spawn`] runs one in a tokio
//! task, and a [`CommandStreamConsumer`] feeds it a parsed command file.

pub mod actuator;
pub mod config;
pub mod consumer;
pub mod controller;
pub mod sim;
mod task;

pub use actuator::{Actuator, ActuatorError, Feedback, FeedbackSender, PenActuator};
pub use config::{BoardGeometry, ConfigBuilder, DrawerConfig, EstimateSeed, MotionConfig};
pub use consumer::CommandStreamConsumer;
pub use controller::{AxisState, Drawer, DrawerState, DrawerStatus, Effect};
pub use task::DrawerHandle;
pub use vplot_protocol::DrawerEvent;

#[derive(Debug, thiserror::Error)]
pub enum DrawerError {
    #[error("invalid machine configuration: {0}")]
    Geom(#[from] vplot_geom::GeomError),
    #[error("{lines} lines but {actuators} actuators")]
    ActuatorCount { lines: usize, actuators: usize },
    #[error("couldn't parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("couldn't write configuration: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("the drawer has shut down")]
    Closed,
}
