use tokio::sync::broadcast::{self, error::RecvError};
use vplot_geom::Point;
use vplot_planner::Waypoint;
use vplot_protocol::{Command, CommandStream, DrawerEvent};

use crate::{
    actuator::PenActuator, config::BoardGeometry, controller::DrawerState, DrawerError,
    DrawerHandle,
};

/// Feeds a command stream to a drawer, one move at a time.
///
/// Pen commands run as soon as they're reached; a move waits for the
/// previous move to arrive.
pub struct CommandStreamConsumer<P> {
    drawer: DrawerHandle,
    commands: CommandStream,
    pens: P,
    board: BoardGeometry,
    moves: usize,
    last_move: Option<Point>,
}

impl<P: PenActuator> CommandStreamConsumer<P> {
    pub fn new(drawer: DrawerHandle, board: BoardGeometry, pens: P, commands: CommandStream) -> Self {
        Self {
            drawer,
            commands,
            pens,
            board,
            moves: 0,
            last_move: None,
        }
    }

    /// Commands that haven't been started yet.
    pub fn remaining(&self) -> usize {
        self.commands.len()
    }

    /// Moves issued so far.
    pub fn moves(&self) -> usize {
        self.moves
    }

    /// Runs commands up to and including the next move.
    ///
    /// Returns false if we ran out of commands without finding a move.
    pub fn execute_next(&mut self) -> Result<bool, DrawerError> {
        while let Some(cmd) = self.commands.pop() {
            match cmd {
                Command::Move { x, y } => {
                    let p = self.board.to_cradle(x, y);
                    log::debug!("move to ({x}, {y}), {p:?} from the centre");
                    self.drawer.move_to(Waypoint::new(p))?;
                    self.moves += 1;
                    self.last_move = Some(p);
                    return Ok(true);
                }
                Command::PenSelect(0) => self.pens.deactivate_pens(),
                Command::PenSelect(n) => self.pens.activate_pen(n - 1),
            }
        }
        Ok(false)
    }

    /// Runs the whole stream, returning the pens once the last move has
    /// arrived.
    ///
    /// `events` should be subscribed before the drawer is opened, or we
    /// might miss the drawer becoming ready.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<DrawerEvent>,
    ) -> Result<P, DrawerError> {
        // Whether a move of ours is underway.
        let mut in_flight = false;

        loop {
            match events.recv().await {
                Ok(DrawerEvent::Ready) => match self.last_move.filter(|_| in_flight) {
                    // The drawer lost its actuators in the middle of a move, and
                    // dropped the move when it became unready.
                    Some(p) => {
                        log::info!("drawer is back, retrying the move to {p:?}");
                        self.drawer.move_to(Waypoint::new(p))?;
                    }
                    None => in_flight = self.execute_next()?,
                },
                Ok(DrawerEvent::Arrived) if in_flight => in_flight = self.execute_next()?,
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => {
                    log::warn!("missed {n} drawer events");
                    // The arrival might have been one of them.
                    if in_flight && self.drawer.status().await?.state == DrawerState::Idle {
                        in_flight = self.execute_next()?;
                    }
                }
                Err(RecvError::Closed) => return Err(DrawerError::Closed),
            }

            if !in_flight {
                log::info!("finished after {} moves", self.moves);
                return Ok(self.pens);
            }
        }
    }
}
