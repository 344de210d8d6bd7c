use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use vplot_geom::{AxisId, Point, UnitConverter};
use vplot_planner::Waypoint;
use vplot_protocol::DrawerEvent;

use crate::{
    actuator::{Actuator, Feedback, FeedbackSender},
    controller::{Drawer, DrawerStatus, Effect},
    config::DrawerConfig,
    DrawerError,
};

// Length changes come in at the actuators' feedback rate, so slow
// subscribers need some slack.
const EVENT_CAPACITY: usize = 4096;

#[derive(Debug)]
pub(crate) enum Message {
    Feedback(AxisId, Feedback),
    Open,
    Move(Waypoint),
    Path { points: Vec<Point>, append: bool },
    Reset,
    CheckArrival,
    Status(oneshot::Sender<DrawerStatus>),
    Shutdown,
}

/// A handle to a running drawer.
///
/// The drawer itself lives in a task of its own, and everything that
/// happens to it (requests from here, feedback from the actuators, and the
/// periodic arrival check) is handled there, one message at a time.
#[derive(Clone)]
pub struct DrawerHandle {
    tx: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<DrawerEvent>,
}

impl DrawerHandle {
    /// Starts a drawer, using `config.reel` to convert between line lengths
    /// and steps.
    ///
    /// There must be one actuator per line, in the same order as the lines.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: DrawerConfig,
        actuators: Vec<Box<dyn Actuator>>,
    ) -> Result<(DrawerHandle, JoinHandle<()>), DrawerError> {
        let reel = config.reel;
        Self::spawn_with_units(config, Box::new(reel), actuators)
    }

    pub fn spawn_with_units(
        config: DrawerConfig,
        units: Box<dyn UnitConverter + Send>,
        actuators: Vec<Box<dyn Actuator>>,
    ) -> Result<(DrawerHandle, JoinHandle<()>), DrawerError> {
        config.motion.validate()?;
        if actuators.len() != config.rig.len() {
            return Err(DrawerError::ActuatorCount {
                lines: config.rig.len(),
                actuators: actuators.len(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let poll_interval = config.motion.poll_interval();

        let task = ControlTask {
            drawer: Drawer::new(config, units),
            actuators,
            events: events.clone(),
            tx: tx.clone(),
            rx,
        };

        let ticker = tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if ticker.send(Message::CheckArrival).is_err() {
                    break;
                }
            }
        });
        let join = tokio::spawn(task.run());

        Ok((DrawerHandle { tx, events }, join))
    }

    fn send(&self, msg: Message) -> Result<(), DrawerError> {
        self.tx.send(msg).map_err(|_| DrawerError::Closed)
    }

    /// Events that happen after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DrawerEvent> {
        self.events.subscribe()
    }

    /// Opens all the actuators. The drawer becomes ready once they've all
    /// attached.
    pub fn open(&self) -> Result<(), DrawerError> {
        self.send(Message::Open)
    }

    pub fn move_to(&self, waypoint: Waypoint) -> Result<(), DrawerError> {
        self.send(Message::Move(waypoint))
    }

    pub fn follow_path(&self, points: Vec<Point>, append: bool) -> Result<(), DrawerError> {
        self.send(Message::Path { points, append })
    }

    pub fn reset(&self) -> Result<(), DrawerError> {
        self.send(Message::Reset)
    }

    pub async fn status(&self) -> Result<DrawerStatus, DrawerError> {
        let (tx, rx) = oneshot::channel();
        self.send(Message::Status(tx))?;
        rx.await.map_err(|_| DrawerError::Closed)
    }

    /// Stops the control task. Actuators are left wherever they are.
    pub fn shutdown(&self) -> Result<(), DrawerError> {
        self.send(Message::Shutdown)
    }
}

struct ControlTask {
    drawer: Drawer,
    actuators: Vec<Box<dyn Actuator>>,
    events: broadcast::Sender<DrawerEvent>,
    // For handing out to actuators.
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ControlTask {
    async fn run(mut self) {
        while let Some(msg) = self.rx.recv().await {
            let effects = match msg {
                Message::Shutdown => break,
                Message::Open => {
                    self.open_actuators();
                    continue;
                }
                Message::Status(reply) => {
                    // They might have stopped waiting.
                    let _ = reply.send(self.drawer.status());
                    continue;
                }
                Message::Feedback(axis, feedback) => self.drawer.handle_feedback(axis, feedback),
                Message::Move(waypoint) => self.drawer.move_to(waypoint),
                Message::Path { points, append } => self.drawer.follow_path(&points, append),
                Message::Reset => self.drawer.reset(),
                Message::CheckArrival => self.drawer.check_arrival(),
            };
            self.apply(effects);
        }
        log::debug!("control task finished");
    }

    fn open_actuators(&mut self) {
        let axes = self.drawer.config().rig.axes().to_vec();
        for (idx, (actuator, axis)) in self.actuators.iter_mut().zip(axes).enumerate() {
            let feedback = FeedbackSender::new(AxisId(idx), self.tx.clone());
            if let Err(e) = actuator.open(axis.actuator, feedback) {
                log::warn!("{e}");
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Initialize { axis, limits } => {
                    let a = &mut self.actuators[axis.0];
                    a.set_acceleration(limits.acceleration_max);
                    a.set_velocity_limit(limits.velocity_max);
                    a.set_current_position(0);
                    a.set_target_position(0);
                    a.set_engaged(false);
                }
                Effect::Home { axis, steps } => {
                    let a = &mut self.actuators[axis.0];
                    a.set_current_position(steps);
                    a.set_target_position(steps);
                }
                Effect::Drive { axis, motion } => {
                    let a = &mut self.actuators[axis.0];
                    a.set_acceleration(motion.acceleration);
                    a.set_velocity_limit(motion.velocity);
                    a.set_target_position(motion.target_steps);
                    a.set_engaged(true);
                }
                Effect::Emit(event) => {
                    // It's fine if nobody is listening.
                    let _ = self.events.send(event);
                }
            }
        }
    }
}
