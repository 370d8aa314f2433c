//! Reactive obstacle avoidance (background monitor).
//!
//! The monitor watches the fused snapshot stream and the camera classifier
//! at a fixed cadence while the mower is in a moving state.  When a trigger
//! fires it transitions to `Avoiding`, halts the drive, executes a strategy
//! chosen from the trigger geometry, records the obstacle into the map and
//! the planner's exclusion set, and returns to the prior state once the
//! trigger clears.  Three consecutive strategies failing to clear the
//! trigger within the attempt window escalate to `Stuck`.
//!
//! Trigger rules (any one engages avoidance):
//! - a side ToF distance **strictly below** the minimum distance threshold;
//! - a camera obstacle whose bounding box exceeds the area threshold;
//! - a camera drop-off signal.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use mower_events::EventBus;
use mower_hal::RoboHat;
use mower_state::{StateManager, TransitionContext};
use mower_types::{
    Event, EventPriority, EventType, MowerState, Point, ShutdownFlag, Snapshot, Worker,
};

use crate::boundary::{self, LatLng};
use crate::mapper::{ObstacleKind, ObstacleMap};
use crate::planner::PathPlanner;

/// Provider of the latest fused snapshot (implemented by the sensor
/// interface; tests use a closure).
pub trait SnapshotSource: Send {
    fn latest(&self) -> Snapshot;
}

impl<F> SnapshotSource for F
where
    F: Fn() -> Snapshot + Send,
{
    fn latest(&self) -> Snapshot {
        self()
    }
}

/// One camera classification result.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraDetection {
    /// Bounding box `(x, y, width, height)` in pixels.
    pub bounding_box: (f64, f64, f64, f64),
    pub kind: ObstacleKind,
    pub confidence: f64,
}

impl CameraDetection {
    pub fn box_area(&self) -> f64 {
        self.bounding_box.2 * self.bounding_box.3
    }
}

/// External camera classifier seam.
pub trait VisionSource: Send {
    fn detections(&mut self) -> Vec<CameraDetection>;
    fn dropoff_detected(&mut self) -> bool;
}

/// Vision source for camera-less deployments: never reports anything.
pub struct NoVision;

impl VisionSource for NoVision {
    fn detections(&mut self) -> Vec<CameraDetection> {
        Vec::new()
    }
    fn dropoff_detected(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AvoidanceConfig {
    /// ToF engagement threshold, millimetres (strictly below triggers).
    pub min_distance_mm: f64,
    /// Camera bounding-box area threshold, px².
    pub camera_area_threshold: f64,
    /// Reverse distance used by strategies, metres.
    pub back_up_m: f64,
    /// Single-side evasion turn, degrees.
    pub side_turn_deg: f64,
    /// Turn toward clearance for frontal obstacles, degrees.
    pub clear_turn_deg: f64,
    /// Consecutive failed strategies before escalating to `Stuck`.
    pub max_attempts: u32,
    /// Window within which the failed attempts must fall.
    pub attempt_window: Duration,
    /// Monitor cadence.
    pub poll_interval: Duration,
    /// ToF mounting offset ahead of the robot centre, metres.
    pub sensor_offset_m: f64,
    /// Local-plane origin for world-coordinate obstacle estimates.
    pub origin: Option<LatLng>,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            min_distance_mm: 300.0,
            camera_area_threshold: 1000.0,
            back_up_m: 0.3,
            side_turn_deg: 45.0,
            clear_turn_deg: 90.0,
            max_attempts: 3,
            attempt_window: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            sensor_offset_m: 0.2,
            origin: None,
        }
    }
}

/// Everything the monitor needs to operate, injected by the composition
/// root so the monitor never reaches back into a registry.
pub struct AvoidanceDeps {
    pub snapshots: Box<dyn SnapshotSource>,
    pub vision: Box<dyn VisionSource>,
    pub motor: Arc<Mutex<RoboHat>>,
    pub state: Arc<StateManager>,
    pub bus: EventBus,
    pub planner: Arc<Mutex<PathPlanner>>,
    pub map: Arc<Mutex<ObstacleMap>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Trigger {
    TofLeft(f64),
    TofRight(f64),
    TofBoth(f64, f64),
    CameraObstacle(ObstacleKind, f64),
    Dropoff,
}

impl Trigger {
    fn label(&self) -> &'static str {
        match self {
            Trigger::TofLeft(_) => "tof_left",
            Trigger::TofRight(_) => "tof_right",
            Trigger::TofBoth(..) => "tof_both",
            Trigger::CameraObstacle(..) => "camera",
            Trigger::Dropoff => "dropoff",
        }
    }

    /// Distance to the obstacle for world-coordinate estimation, metres.
    fn distance_m(&self) -> f64 {
        match self {
            Trigger::TofLeft(mm) | Trigger::TofRight(mm) => mm / 1000.0,
            Trigger::TofBoth(l, r) => l.min(*r) / 1000.0,
            // Camera and drop-off geometry is not ranged; assume just
            // ahead of the sensor.
            Trigger::CameraObstacle(..) | Trigger::Dropoff => 0.5,
        }
    }

    fn kind(&self) -> ObstacleKind {
        match self {
            Trigger::CameraObstacle(kind, _) => *kind,
            Trigger::Dropoff => ObstacleKind::Dropoff,
            _ => ObstacleKind::Unknown,
        }
    }
}

/// Handle to the running monitor thread.
pub struct AvoidanceMonitor {
    shutdown: ShutdownFlag,
    worker: Option<Worker>,
}

impl AvoidanceMonitor {
    /// Spawn the monitor thread.
    pub fn start(config: AvoidanceConfig, deps: AvoidanceDeps) -> Self {
        let shutdown = ShutdownFlag::new();
        let flag = shutdown.clone();
        let worker = Worker::spawn("obstacle-avoidance", move || {
            MonitorLoop::new(config, deps, flag).run();
        });
        Self {
            shutdown,
            worker: Some(worker),
        }
    }

    /// Stop the monitor, bounded by a 5 s join.
    pub fn stop(mut self) {
        self.shutdown.trigger();
        if let Some(worker) = self.worker.take() {
            worker.join_timeout(Duration::from_secs(5));
        }
    }
}

struct MonitorLoop {
    config: AvoidanceConfig,
    deps: AvoidanceDeps,
    shutdown: ShutdownFlag,
    failed_attempts: u32,
    window_start: Option<Instant>,
}

impl MonitorLoop {
    fn new(config: AvoidanceConfig, deps: AvoidanceDeps, shutdown: ShutdownFlag) -> Self {
        Self {
            config,
            deps,
            shutdown,
            failed_attempts: 0,
            window_start: None,
        }
    }

    fn run(&mut self) {
        info!("obstacle avoidance monitor running");
        while self.shutdown.sleep(self.config.poll_interval) {
            let current = self.deps.state.current_state();
            if !matches!(current, MowerState::Mowing | MowerState::ReturningHome) {
                self.failed_attempts = 0;
                self.window_start = None;
                continue;
            }
            let snapshot = self.deps.snapshots.latest();
            if let Some(trigger) = self.evaluate(&snapshot) {
                self.engage(trigger, current, &snapshot);
            } else {
                self.failed_attempts = 0;
                self.window_start = None;
            }
        }
        info!("obstacle avoidance monitor stopped");
    }

    /// Evaluate the trigger rules against the latest snapshot and vision
    /// output.
    fn evaluate(&mut self, snapshot: &Snapshot) -> Option<Trigger> {
        let threshold = self.config.min_distance_mm;
        let left = snapshot.tof.left.filter(|d| *d < threshold);
        let right = snapshot.tof.right.filter(|d| *d < threshold);
        match (left, right) {
            (Some(l), Some(r)) => return Some(Trigger::TofBoth(l, r)),
            (Some(l), None) => return Some(Trigger::TofLeft(l)),
            (None, Some(r)) => return Some(Trigger::TofRight(r)),
            (None, None) => {}
        }

        if self.deps.vision.dropoff_detected() {
            return Some(Trigger::Dropoff);
        }
        self.deps
            .vision
            .detections()
            .into_iter()
            .filter(|d| d.box_area() > self.config.camera_area_threshold)
            .max_by(|a, b| a.box_area().total_cmp(&b.box_area()))
            .map(|d| Trigger::CameraObstacle(d.kind, d.confidence))
    }

    fn engage(&mut self, trigger: Trigger, prior: MowerState, snapshot: &Snapshot) {
        info!(trigger = trigger.label(), "avoidance engaged");
        self.deps.bus.publish(
            Event::new(EventType::ObstacleDetected, "obstacle_avoidance")
                .with_data("trigger", trigger.label())
                .with_priority(EventPriority::High),
        );

        let mut context = TransitionContext::new();
        context.insert("trigger".to_string(), trigger.label().into());
        if let Err(e) = self
            .deps
            .state
            .transition_with(MowerState::Avoiding, context)
        {
            warn!(error = %e, "could not enter avoiding state");
            return;
        }

        self.record_obstacle(&trigger, snapshot);
        if let Err(e) = self.execute_strategy(&trigger, snapshot) {
            warn!(error = %e, "avoidance strategy failed to execute");
        }

        // Did the manoeuvre clear the trigger?
        let after = self.deps.snapshots.latest();
        if self.evaluate(&after).is_none() {
            self.failed_attempts = 0;
            self.window_start = None;
            self.deps.bus.publish(
                Event::new(EventType::ObstacleCleared, "obstacle_avoidance")
                    .with_data("trigger", trigger.label()),
            );
            if let Err(e) = self.deps.state.transition_to(prior) {
                warn!(error = %e, "could not return to prior state after avoidance");
            }
            return;
        }

        // Strategy did not clear the trigger.
        let now = Instant::now();
        match self.window_start {
            Some(start) if now.duration_since(start) <= self.config.attempt_window => {}
            _ => {
                self.window_start = Some(now);
                self.failed_attempts = 0;
            }
        }
        self.failed_attempts += 1;

        if self.failed_attempts >= self.config.max_attempts {
            warn!(
                attempts = self.failed_attempts,
                "avoidance exhausted; mower is stuck"
            );
            self.deps.bus.publish(
                Event::new(EventType::ErrorOccurred, "obstacle_avoidance")
                    .with_data("reason", "avoidance_exhausted")
                    .with_priority(EventPriority::High),
            );
            if let Err(e) = self.deps.state.transition_to(MowerState::Stuck) {
                warn!(error = %e, "could not enter stuck state");
            }
            self.failed_attempts = 0;
            self.window_start = None;
            return;
        }

        // Return to the prior state and let the next poll retry.
        if let Err(e) = self.deps.state.transition_to(prior) {
            warn!(error = %e, "could not resume after failed avoidance attempt");
        }
    }

    /// Execute the strategy for `trigger` on the drive motors.
    fn execute_strategy(
        &mut self,
        trigger: &Trigger,
        snapshot: &Snapshot,
    ) -> Result<(), mower_types::MowerError> {
        let mut motor = self
            .deps
            .motor
            .lock()
            .map_err(|_| mower_types::MowerError::Channel("motor lock poisoned".to_string()))?;
        motor.stop()?;
        match trigger {
            Trigger::TofLeft(_) => {
                motor.rotate(self.config.side_turn_deg)?;
                motor.advance(self.config.back_up_m)?;
            }
            Trigger::TofRight(_) => {
                motor.rotate(-self.config.side_turn_deg)?;
                motor.advance(self.config.back_up_m)?;
            }
            Trigger::TofBoth(..) | Trigger::CameraObstacle(..) => {
                motor.advance(-self.config.back_up_m)?;
                // Rotate toward the side with greater clearance; a missing
                // reading counts as open space.
                let left = snapshot.tof.left.unwrap_or(f64::INFINITY);
                let right = snapshot.tof.right.unwrap_or(f64::INFINITY);
                let degrees = if left > right {
                    -self.config.clear_turn_deg
                } else {
                    self.config.clear_turn_deg
                };
                motor.rotate(degrees)?;
                drop(motor);
                // Frontal obstacle: ask the planner for a fresh route around
                // the recorded exclusion.
                self.deps.bus.publish(
                    Event::new(EventType::NavigationPathUpdated, "obstacle_avoidance")
                        .with_data("reason", "reroute_around_obstacle"),
                );
            }
            Trigger::Dropoff => {
                motor.advance(-self.config.back_up_m)?;
                motor.rotate(180.0)?;
            }
        }
        Ok(())
    }

    /// Estimate the obstacle's world position from the current pose and
    /// the trigger geometry, then fuse it into the map and refresh the
    /// planner's exclusion set.
    fn record_obstacle(&mut self, trigger: &Trigger, snapshot: &Snapshot) {
        let pose = match (self.config.origin, snapshot.gps.fix) {
            (Some(origin), true) => {
                boundary::project(origin, snapshot.gps.latitude, snapshot.gps.longitude)
            }
            _ => Point::new(0.0, 0.0),
        };
        // Compass heading: clockwise from north, north = +Y.
        let heading = snapshot.imu.heading.to_radians();
        let ahead = Point::new(heading.sin(), heading.cos());
        let range = self.config.sensor_offset_m + trigger.distance_m();
        let position = pose + ahead.scale(range);

        let zones = {
            let mut map = match self.deps.map.lock() {
                Ok(map) => map,
                Err(_) => return,
            };
            map.observe(position, 0.4, 0.8, trigger.kind());
            map.prune();
            map.exclusion_zones()
        };
        if let Ok(mut planner) = self.deps.planner.lock() {
            planner.set_exclusions(zones);
        }
    }
}
