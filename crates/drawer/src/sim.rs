//! Pretend hardware, for tests and dry runs.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use vplot_geom::ActuatorId;
use vplot_planner::AxisLimits;

use crate::actuator::{Actuator, ActuatorError, FeedbackSender, PenActuator};

#[derive(Debug, Default)]
struct Stepper {
    attached: bool,
    engaged: bool,
    position: i64,
    target: i64,
    velocity: f64,
    acceleration: f64,
    // Fractional steps that didn't make it into the last tick.
    carry: f64,
    feedback: Option<FeedbackSender>,
}

impl Stepper {
    /// Moves for `dt`, returning the new position if it changed.
    ///
    /// Acceleration is ignored: the stepper goes at its velocity limit
    /// straight away.
    fn step(&mut self, dt: Duration) -> Option<i64> {
        if !self.engaged || self.position == self.target {
            self.carry = 0.0;
            return None;
        }

        let travel = self.velocity.max(0.0) * dt.as_secs_f64() + self.carry;
        let whole = travel.floor();
        self.carry = travel - whole;
        let remaining = self.target - self.position;
        let steps = (whole as i64).min(remaining.abs());
        if steps == 0 {
            return None;
        }
        self.position += steps * remaining.signum();
        Some(self.position)
    }
}

/// A stepper that moves at exactly its velocity limit, and reports its
/// position every tick while it moves.
pub struct SimulatedActuator {
    stepper: Arc<Mutex<Stepper>>,
    limits: AxisLimits,
    tick: Duration,
    attach_delay: Duration,
    fail_open: bool,
    task: Option<JoinHandle<()>>,
}

impl SimulatedActuator {
    pub fn new(limits: AxisLimits) -> Self {
        Self {
            stepper: Arc::default(),
            limits,
            tick: Duration::from_millis(10),
            attach_delay: Duration::from_millis(50),
            fail_open: false,
            task: None,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = delay;
        self
    }

    /// An actuator that can't be opened, like one that isn't plugged in.
    pub fn unplugged(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// A way to look at (and mess with) the simulation after the actuator
    /// has been handed over to a drawer.
    pub fn monitor(&self) -> SimMonitor {
        SimMonitor {
            stepper: self.stepper.clone(),
            limits: self.limits,
        }
    }
}

impl Drop for SimulatedActuator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Actuator for SimulatedActuator {
    fn open(&mut self, id: ActuatorId, feedback: FeedbackSender) -> Result<(), ActuatorError> {
        if self.fail_open {
            return Err(ActuatorError::Open {
                id,
                reason: "simulated actuator is unplugged".to_owned(),
            });
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }

        log::debug!("opening simulated actuator {id} for {}", feedback.axis());
        let stepper = self.stepper.clone();
        let limits = self.limits;
        let tick = self.tick;
        let attach_delay = self.attach_delay;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(attach_delay).await;
            {
                let mut s = stepper.lock();
                s.attached = true;
                s.feedback = Some(feedback.clone());
            }
            if !feedback.attached(limits) {
                return;
            }

            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let moved = stepper.lock().step(tick);
                if let Some(position) = moved {
                    if !feedback.position_changed(position) {
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    fn attached(&self) -> bool {
        self.stepper.lock().attached
    }

    fn current_position(&self) -> i64 {
        self.stepper.lock().position
    }

    fn set_current_position(&mut self, steps: i64) {
        self.stepper.lock().position = steps;
    }

    fn set_target_position(&mut self, steps: i64) {
        self.stepper.lock().target = steps;
    }

    fn set_velocity_limit(&mut self, velocity: f64) {
        self.stepper.lock().velocity = velocity;
    }

    fn set_acceleration(&mut self, acceleration: f64) {
        self.stepper.lock().acceleration = acceleration;
    }

    fn set_engaged(&mut self, engaged: bool) {
        self.stepper.lock().engaged = engaged;
    }
}

#[derive(Clone)]
pub struct SimMonitor {
    stepper: Arc<Mutex<Stepper>>,
    limits: AxisLimits,
}

impl SimMonitor {
    pub fn position(&self) -> i64 {
        self.stepper.lock().position
    }

    pub fn target(&self) -> i64 {
        self.stepper.lock().target
    }

    pub fn velocity(&self) -> f64 {
        self.stepper.lock().velocity
    }

    pub fn acceleration(&self) -> f64 {
        self.stepper.lock().acceleration
    }

    pub fn engaged(&self) -> bool {
        self.stepper.lock().engaged
    }

    pub fn attached(&self) -> bool {
        self.stepper.lock().attached
    }

    /// Pretends that the cable came out.
    pub fn unplug(&self) {
        let feedback = {
            let mut s = self.stepper.lock();
            s.attached = false;
            s.engaged = false;
            s.feedback.clone()
        };
        if let Some(feedback) = feedback {
            feedback.detached();
        }
    }

    /// Undoes `unplug`.
    pub fn plug_in(&self) {
        let feedback = {
            let mut s = self.stepper.lock();
            s.attached = true;
            s.feedback.clone()
        };
        if let Some(feedback) = feedback {
            feedback.attached(self.limits);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenAction {
    Activate(u32),
    DeactivateAll,
}

/// Pens that just remember what they were told.
#[derive(Clone, Debug, Default)]
pub struct RecordingPens {
    actions: Arc<Mutex<Vec<PenAction>>>,
}

impl RecordingPens {
    pub fn actions(&self) -> Vec<PenAction> {
        self.actions.lock().clone()
    }
}

impl PenActuator for RecordingPens {
    fn activate_pen(&mut self, index: u32) {
        self.actions.lock().push(PenAction::Activate(index));
    }

    fn deactivate_pens(&mut self) {
        self.actions.lock().push(PenAction::DeactivateAll);
    }
}
