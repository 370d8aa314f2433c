//! [`ResourceManager`] – owns the hardware registry, builds every
//! subsystem, wires them over the event bus, and supervises lifecycle.
//!
//! Start order: hardware registry → sensor interface → event bus → state
//! manager wiring → path planner → obstacle avoidance → cross-process
//! bridge.  Shutdown is the exact reverse, each step bounded, so a stuck
//! component can delay but never prevent the blade being parked.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use mower_bridge::{FrameShare, SnapshotExporter};
use mower_events::EventBus;
use mower_hal::{
    BladeDirection, HardwareRegistry, LinuxPlatform, Platform, SimPlatform, SimWorld,
};
use mower_nav::{
    AvoidanceDeps, AvoidanceMonitor, NoVision, ObstacleMap, PathPlanner, PatternConfig,
    PatternSelector, PatternType, RewardWeights, SessionOutcome, boundary, polygon,
    selector::state_hash,
};
use mower_sensors::{SensorHandles, SensorInterface};
use mower_state::{StateManager, TransitionContext};
use mower_vault::SecureStorage;
use mower_types::{
    Event, EventPriority, EventType, MowerError, MowerState, Point, ShutdownFlag, Worker,
};

use crate::config::RuntimeConfig;
use crate::instance::SingleInstanceLock;

const FRAME_INTERVAL: Duration = Duration::from_millis(200);

pub struct ResourceManager {
    config: RuntimeConfig,
    shutdown: ShutdownFlag,
    instance: SingleInstanceLock,
    registry: HardwareRegistry,
    bus: EventBus,
    state: Arc<StateManager>,
    planner: Arc<Mutex<PathPlanner>>,
    map: Arc<Mutex<ObstacleMap>>,
    selector: Arc<Mutex<PatternSelector>>,
    active_pattern: Option<(u64, PatternType)>,
    sensors: Option<SensorInterface>,
    avoidance: Option<AvoidanceMonitor>,
    frame_worker: Option<Worker>,
    exporter: Arc<SnapshotExporter>,
    vault: Option<Arc<Mutex<SecureStorage>>>,
    started: bool,
}

impl ResourceManager {
    /// Build the manager with the platform implied by the configuration:
    /// simulated hardware under `USE_SIMULATION`, the Linux backend
    /// otherwise.
    pub fn from_config(config: RuntimeConfig) -> Self {
        let platform: Box<dyn Platform> = if config.use_simulation {
            info!("USE_SIMULATION set; running against simulated hardware");
            Box::new(SimPlatform::new(SimWorld::new()))
        } else {
            Box::new(LinuxPlatform::default())
        };
        Self::new(config, platform)
    }

    /// Build the manager against an explicit platform (tests inject a
    /// shared [`SimWorld`] this way).
    pub fn new(config: RuntimeConfig, platform: Box<dyn Platform>) -> Self {
        let registry = HardwareRegistry::new(config.hal.clone(), platform);
        let exporter = Arc::new(SnapshotExporter::new(&config.snapshot_path));
        let instance = SingleInstanceLock::new(&config.pid_file);
        let boundary = load_boundary_or_default(&config.boundary_path);
        let planner = Arc::new(Mutex::new(PathPlanner::new(PatternConfig {
            pattern_type: PatternType::Parallel,
            spacing: 0.5,
            angle: 0.0,
            overlap: 0.1,
            start_point: boundary.first().copied().unwrap_or_default(),
            boundary,
        })));

        Self {
            config,
            shutdown: ShutdownFlag::new(),
            instance,
            registry,
            bus: EventBus::default(),
            state: Arc::new(StateManager::new(MowerState::Initializing)),
            planner,
            map: Arc::new(Mutex::new(ObstacleMap::default())),
            selector: Arc::new(Mutex::new(PatternSelector::new(RewardWeights::default()))),
            active_pattern: None,
            sensors: None,
            avoidance: None,
            frame_worker: None,
            exporter,
            vault: None,
            started: false,
        }
    }

    /// Cooperative shutdown flag shared with signal handlers and the panic
    /// hook.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub fn state(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn planner(&self) -> Arc<Mutex<PathPlanner>> {
        Arc::clone(&self.planner)
    }

    pub fn obstacle_map(&self) -> Arc<Mutex<ObstacleMap>> {
        Arc::clone(&self.map)
    }

    pub fn registry(&self) -> &HardwareRegistry {
        &self.registry
    }

    pub fn sensors(&self) -> Option<&SensorInterface> {
        self.sensors.as_ref()
    }

    pub fn vault(&self) -> Option<Arc<Mutex<SecureStorage>>> {
        self.vault.clone()
    }

    /// Bring the whole stack up in dependency order.
    pub fn start(&mut self) -> Result<(), MowerError> {
        if self.started {
            return Ok(());
        }
        self.instance.acquire(self.config.force_cleanup)?;

        // 0. Secrets (API keys for the external vision/weather services).
        match SecureStorage::open(&self.config.vault_path, mower_vault::MASTER_KEY_ENV) {
            Ok(vault) => self.vault = Some(Arc::new(Mutex::new(vault))),
            Err(e) => warn!(error = %e, "secure storage unavailable; continuing without secrets"),
        }

        // 1. Hardware.
        if let Err(e) = self.registry.initialize() {
            self.fail_startup(&e);
            return Err(e);
        }

        // 2. Sensor interface, exporting every snapshot to the bridge.
        let exporter = Arc::clone(&self.exporter);
        let sensors = SensorInterface::start(
            self.config.sensors.clone(),
            SensorHandles::from_registry(&self.registry),
            self.bus.clone(),
            Some(Box::new(move |snapshot| {
                if let Err(e) = exporter.write(snapshot) {
                    warn!(error = %e, "snapshot export failed");
                }
            })),
        );

        // 3. Event bus worker and supervision subscriptions.
        self.bus.start();
        self.wire_state_hooks();
        self.wire_critical_errors();

        // 4. Path planner: restore the learned model and pick a pattern.
        self.restore_pattern_model();

        // 5. Obstacle avoidance.
        let snapshots = sensors.snapshot_handle();
        let motor = self.registry.motor().ok_or_else(|| {
            MowerError::hardware(
                mower_types::ErrorCode::InitializationFailed,
                "robohat",
                "motor controller missing after initialization",
            )
        })?;
        let origin = load_origin(&self.config.boundary_path);
        self.avoidance = Some(AvoidanceMonitor::start(
            mower_nav::AvoidanceConfig {
                origin,
                ..self.config.avoidance
            },
            AvoidanceDeps {
                snapshots: Box::new(move || snapshots.latest()),
                vision: Box::new(NoVision),
                motor,
                state: Arc::clone(&self.state),
                bus: self.bus.clone(),
                planner: Arc::clone(&self.planner),
                map: Arc::clone(&self.map),
            },
        ));

        // 6. Camera frame bridge (only when a camera came up).
        if let Some(camera) = self.registry.camera() {
            match FrameShare::new(&self.config.frame_dir) {
                Ok(mut share) => {
                    let flag = self.shutdown.clone();
                    self.frame_worker = Some(Worker::spawn("frame-bridge", move || {
                        while flag.sleep(FRAME_INTERVAL) {
                            let frame = match camera.lock() {
                                Ok(mut camera) => camera.capture(),
                                Err(_) => break,
                            };
                            match frame {
                                Ok(frame) => {
                                    if let Err(e) = share.write_frame(&frame.data) {
                                        warn!(error = %e, "frame publish failed");
                                    }
                                }
                                Err(e) => warn!(error = %e, "camera capture failed"),
                            }
                        }
                        share.cleanup();
                    }));
                }
                Err(e) => warn!(error = %e, "frame share unavailable"),
            }
        }

        self.sensors = Some(sensors);
        self.state.transition_to(MowerState::Idle)?;
        self.bus
            .publish(Event::new(EventType::SystemStartup, "resource_manager"));
        self.started = true;
        info!("resource manager started");
        Ok(())
    }

    /// Block until the shutdown flag trips (signal, panic hook, or critical
    /// failure policy).
    pub fn run(&self) {
        while self.shutdown.sleep(Duration::from_millis(200)) {}
        info!("shutdown requested");
    }

    /// Tear everything down in reverse start order.  Every step is bounded;
    /// safe to call twice.
    pub fn stop(&mut self) {
        if !self.started {
            self.registry.cleanup();
            self.instance.release();
            return;
        }
        self.started = false;
        self.shutdown.trigger();

        // 6. Bridge writers.
        if let Some(worker) = self.frame_worker.take() {
            worker.join_timeout(Duration::from_secs(5));
        }
        self.exporter.cleanup();

        // 5. Avoidance monitor.
        if let Some(avoidance) = self.avoidance.take() {
            avoidance.stop();
        }

        // 4. Persist the pattern model.
        if let Ok(selector) = self.selector.lock()
            && let Err(e) = selector.save(&self.config.model_path)
        {
            warn!(error = %e, "could not persist pattern model");
        }

        // 3. State machine to its terminal state.
        if self.state.current_state() != MowerState::ShuttingDown {
            if self
                .state
                .transition_to(MowerState::ShuttingDown)
                .is_err()
            {
                // Route through Idle for states with no direct edge.
                let _ = self.state.transition_to(MowerState::Idle);
                let _ = self.state.transition_to(MowerState::ShuttingDown);
            }
        }
        self.bus.publish_sync(Event::new(
            EventType::SystemShutdown,
            "resource_manager",
        ));

        // 2. Event bus worker.
        self.bus.stop();

        // 1b. Sensor workers.
        if let Some(sensors) = self.sensors.take() {
            sensors.stop();
        }

        // 1a. Hardware last: blade parked, pins released.
        self.registry.cleanup();
        self.instance.release();
        info!("resource manager stopped");
    }

    /// Record a completed mowing session into the pattern selector and
    /// persist the model.
    pub fn complete_session(&self, outcome: SessionOutcome) {
        let Some((state_key, pattern)) = self.active_pattern else {
            return;
        };
        if let Ok(mut selector) = self.selector.lock() {
            selector.record_session(state_key, pattern, &outcome);
            if let Err(e) = selector.save(&self.config.model_path) {
                warn!(error = %e, "could not persist pattern model");
            }
        }
    }

    fn fail_startup(&mut self, error: &MowerError) {
        let _ = self.state.set_error_condition(error.to_string());
        self.registry.cleanup();
        self.instance.release();
    }

    /// State-machine side effects: blade control and state-change events.
    fn wire_state_hooks(&mut self) {
        let bus = self.bus.clone();
        self.state.on_transition(move |from, to, _ctx| {
            bus.publish(
                Event::new(EventType::StateChanged, "state_manager")
                    .with_data("from", format!("{from}"))
                    .with_data("to", format!("{to}")),
            );
        });

        if let Some(blade) = self.registry.blade() {
            let on_mow = Arc::clone(&blade);
            self.state.on_entry(MowerState::Mowing, move |_, _| {
                if let Err(e) = on_mow.enable(BladeDirection::Forward, 0.8) {
                    warn!(error = %e, "blade enable failed on mowing entry");
                }
            });
            let off_mow = Arc::clone(&blade);
            self.state.on_exit(MowerState::Mowing, move |_, _| {
                if let Err(e) = off_mow.disable() {
                    warn!(error = %e, "blade disable failed on mowing exit");
                }
            });
            let estop_blade = Arc::clone(&blade);
            let estop_motor = self.registry.motor();
            self.state.on_entry(MowerState::EmergencyStop, move |_, _| {
                if let Err(e) = estop_blade.disable() {
                    warn!(error = %e, "blade disable failed on emergency stop");
                }
                if let Some(motor) = &estop_motor
                    && let Ok(mut motor) = motor.lock()
                    && motor.stop().is_err()
                {
                    warn!("motor stop failed on emergency stop");
                }
            });
        }
    }

    /// Critical-error policy: a critical `ErrorOccurred` forces an
    /// emergency stop and then a clean shutdown.
    fn wire_critical_errors(&self) {
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();
        self.bus.subscribe(EventType::ErrorOccurred, move |event| {
            let critical = event.priority == EventPriority::Critical
                || event.data.get("critical") == Some(&Value::Bool(true));
            if !critical {
                return;
            }
            warn!(source = %event.source, "critical error; forcing emergency stop");
            let mut context = TransitionContext::new();
            context.insert("source".to_string(), Value::String(event.source.clone()));
            if let Err(e) = state.transition_with(MowerState::EmergencyStop, context) {
                warn!(error = %e, "emergency stop transition rejected");
            }
            shutdown.trigger();
        });
    }

    /// Load the persisted selector model and configure the planner with the
    /// chosen pattern.
    fn restore_pattern_model(&mut self) {
        let mut selector = match self.selector.lock() {
            Ok(selector) => selector,
            Err(_) => return,
        };
        if let Err(e) = selector.load(&self.config.model_path) {
            warn!(error = %e, "pattern model unusable; starting fresh");
        }
        let mut planner = match self.planner.lock() {
            Ok(planner) => planner,
            Err(_) => return,
        };
        let mut pattern_config = planner.config().clone();
        let area = polygon::area(&pattern_config.boundary);
        let obstacles = self.map.lock().map(|m| m.len()).unwrap_or(0);
        let state_key = state_hash(area, obstacles, pattern_config.spacing);
        let pattern = selector.select(state_key);
        pattern_config.pattern_type = pattern;
        planner.set_config(pattern_config);
        self.active_pattern = Some((state_key, pattern));
        info!(?pattern, "coverage pattern selected");
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Boundary polygon from disk, or a default square test plot when the
/// user has not drawn one yet.
fn load_boundary_or_default(path: &Path) -> Vec<Point> {
    match boundary::load_boundary(path) {
        Ok(polygon) => boundary::to_local_plane(&polygon),
        Err(e) => {
            warn!(error = %e, "no usable boundary polygon; using default plot");
            vec![
                Point::new(0.0, 0.0),
                Point::new(10.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(0.0, 10.0),
            ]
        }
    }
}

fn load_origin(path: &Path) -> Option<boundary::LatLng> {
    boundary::load_boundary(path)
        .ok()
        .and_then(|polygon| polygon.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_boundary_is_a_simple_square() {
        let boundary = load_boundary_or_default(Path::new("/nonexistent/user_polygon.json"));
        assert_eq!(boundary.len(), 4);
        assert!(polygon::is_simple_polygon(&boundary));
        assert_eq!(polygon::area(&boundary), 100.0);
    }

    #[test]
    fn origin_is_first_polygon_vertex() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_polygon.json");
        std::fs::write(
            &path,
            r#"{"polygon":[{"lat":51.5,"lng":-0.2},{"lat":51.5001,"lng":-0.2},{"lat":51.5001,"lng":-0.1999}]}"#,
        )
        .unwrap();
        let origin = load_origin(&path).unwrap();
        assert_eq!(origin.lat, 51.5);
        assert_eq!(origin.lng, -0.2);
    }
}
