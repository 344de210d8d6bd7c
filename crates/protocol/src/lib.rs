//! The line-oriented command format, and the events that a drawer reports.
//!
//! A command file looks like
//!
//! ```text
//! P 1
//! M 100 200
//! M 300 200
//! P 0
//! ```
//!
//! where `M <x> <y>` moves to a position in board coordinates (millimetres,
//! with the origin at the top-left corner of the board) and `P <n>` selects a
//! pen. Pen zero means "all pens up"; pen `n > 0` activates the `n - 1`th
//! pen. Anything else is skipped.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use vplot_geom::{AxisId, Len};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Move { x: f64, y: f64 },
    PenSelect(u32),
}

impl Command {
    /// Parses one line, returning `None` if it isn't a command we understand.
    pub fn parse_line(line: &str) -> Option<Command> {
        let mut words = line.split_whitespace();
        let cmd = match words.next()? {
            "M" => {
                let x = words.next()?.parse().ok()?;
                let y = words.next()?.parse().ok()?;
                Command::Move { x, y }
            }
            "P" => Command::PenSelect(words.next()?.parse().ok()?),
            _ => return None,
        };

        // Trailing junk makes the whole line suspect.
        if words.next().is_some() {
            return None;
        }
        if let Command::Move { x, y } = cmd {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
        }
        Some(cmd)
    }
}

/// A queue of parsed commands, in file order.
#[derive(Clone, Debug, Default)]
pub struct CommandStream {
    commands: VecDeque<Command>,
    skipped: usize,
}

impl CommandStream {
    pub fn parse(text: &str) -> Self {
        let mut ret = CommandStream::default();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match Command::parse_line(line) {
                Some(cmd) => ret.commands.push_back(cmd),
                None => {
                    log::debug!("skipping line {}: {line:?}", idx + 1);
                    ret.skipped += 1;
                }
            }
        }
        ret
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> + '_ {
        self.commands.iter()
    }

    /// How many non-blank lines were not understood.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl FromIterator<Command> for CommandStream {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        CommandStream {
            commands: iter.into_iter().collect(),
            skipped: 0,
        }
    }
}

/// Things that a drawer tells its observers about.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DrawerEvent {
    /// All actuators are attached and the cradle position has been reset.
    Ready,
    /// A new length measurement came in for one of the lines.
    LineFeedLengthChanged { axis: AxisId, length: Len },
    /// The last queued waypoint was reached.
    Arrived,
}
