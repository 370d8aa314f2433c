//! End-to-end scenarios against the fully wired stack on simulated
//! hardware.

use std::time::{Duration, Instant};

use mower_core::{ResourceManager, RuntimeConfig};
use mower_hal::{MotionRates, MotorCommand, SimPlatform, SimWorld};
use mower_types::{EventType, MowerState};

struct TestRig {
    world: SimWorld,
    manager: ResourceManager,
    _dir: tempfile::TempDir,
}

fn rig() -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::default();
    config.use_simulation = true;
    config.pid_file = dir.path().join("autonomous_mower.pid");
    config.snapshot_path = dir.path().join("mower_sensor_data.json");
    config.frame_dir = dir.path().join("camera_share");
    config.boundary_path = dir.path().join("user_polygon.json");
    config.model_path = dir.path().join("pattern_model.json");
    config.vault_path = dir.path().join("secure_storage.enc");

    // Tight timings so scenarios resolve in test time.
    config.sensors.poll_interval = Duration::from_millis(10);
    config.sensors.aggregate_interval = Duration::from_millis(10);
    config.sensors.retry_base = Duration::from_millis(1);
    config.sensors.retry_cap = Duration::from_millis(4);
    config.avoidance.poll_interval = Duration::from_millis(20);
    config.hal.motion_rates = MotionRates {
        rotation_deg_s: 1_000_000.0,
        speed_m_s: 1_000_000.0,
    };

    let world = SimWorld::new();
    let manager = ResourceManager::new(config, Box::new(SimPlatform::new(world.clone())));
    TestRig {
        world,
        manager,
        _dir: dir,
    }
}

fn wait_for(deadline: Duration, predicate: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn cold_start_reaches_idle_and_exports_snapshots() {
    let mut rig = rig();
    rig.manager.start().unwrap();

    let state = rig.manager.state();
    assert_eq!(state.current_state(), MowerState::Idle);
    let transitions: Vec<(MowerState, MowerState)> =
        state.history().iter().map(|r| (r.from, r.to)).collect();
    assert!(transitions.contains(&(MowerState::Initializing, MowerState::Idle)));

    // Within two seconds the bridge file appears, complete and fresh.
    assert!(rig.manager.registry().is_initialized());
    let snapshot_path = rig._dir.path().join("mower_sensor_data.json");
    assert!(wait_for(Duration::from_secs(2), || snapshot_path.exists()));

    let value: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&snapshot_path).unwrap()).unwrap();
    for key in ["imu", "tof", "environment", "power", "gps"] {
        assert!(value["data"].get(key).is_some(), "missing section {key}");
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    let age = now - value["timestamp"].as_f64().unwrap();
    assert!(age < 2.0, "snapshot stale: {age}s");

    rig.manager.stop();
    assert!(!snapshot_path.exists());
}

#[test]
fn absent_optional_sensor_degrades_to_defaults() {
    let mut rig = rig();
    rig.world.fail_sensor("bme280");
    rig.manager.start().unwrap();

    assert!(rig.manager.registry().environment().is_none());
    assert!(rig.manager.registry().power().is_some());

    // The snapshot still carries the environment section with sentinels.
    let sensors = rig.manager.sensors().unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        sensors.latest_snapshot().imu.safety.is_safe
    }));
    let snap = sensors.latest_snapshot();
    assert_eq!(snap.environment.temperature, 20.0);
    assert_eq!(snap.environment.humidity, 50.0);
    assert_eq!(snap.environment.pressure, 1013.25);

    // No error event was emitted for the optional sensor.
    let errors = rig
        .manager
        .bus()
        .history()
        .into_iter()
        .filter(|e| e.event_type == EventType::ErrorOccurred)
        .count();
    assert_eq!(errors, 0);
    rig.manager.stop();
}

#[test]
fn emergency_stop_overrides_mowing_and_parks_the_blade() {
    let mut rig = rig();
    rig.manager.start().unwrap();
    let state = rig.manager.state();

    state.transition_to(MowerState::Mowing).unwrap();
    // The mowing entry hook spun the blade up.
    assert!(wait_for(Duration::from_secs(1), || {
        rig.world.pwm_duty(12) > 0.0
    }));

    let mut context = mower_state::TransitionContext::new();
    context.insert("reason".into(), "button".into());
    state
        .transition_with(MowerState::EmergencyStop, context)
        .unwrap();

    assert_eq!(state.current_state(), MowerState::EmergencyStop);
    assert_eq!(state.previous_state(), Some(MowerState::Mowing));
    // Blade disable side effect observed through the sim world.
    assert_eq!(rig.world.pwm_duty(12), 0.0);
    assert!(!rig.world.pin_level(24));
    assert!(!rig.world.pin_level(25));

    // Only Idle / ShuttingDown leave the emergency stop.
    assert!(state.transition_to(MowerState::Mowing).is_err());
    assert!(state.transition_to(MowerState::Idle).is_ok());
    rig.manager.stop();
}

#[test]
fn left_tof_obstacle_triggers_avoidance_and_reroute() {
    let mut rig = rig();
    rig.manager.start().unwrap();
    let state = rig.manager.state();
    state.transition_to(MowerState::Mowing).unwrap();

    // Obstacle 100 mm off the left sensor (threshold 300 mm).
    rig.world.set_tof_left(Some(100.0));

    // An exclusion zone appears once the monitor engages.
    let planner = rig.manager.planner();
    assert!(wait_for(Duration::from_secs(5), || {
        !planner.lock().unwrap().exclusion_zones().is_empty()
    }));
    // Clear the obstacle so the avoidance attempt succeeds.
    rig.world.set_tof_left(Some(2000.0));

    assert!(wait_for(Duration::from_secs(5), || {
        state.current_state() == MowerState::Mowing
    }));

    // Motor command history: stop, rotate right 45, advance 0.3 m.
    let motor = rig.manager.registry().motor().unwrap();
    let history = motor.lock().unwrap().history().to_vec();
    assert!(history.len() >= 3, "history too short: {history:?}");
    assert_eq!(history[0], MotorCommand::Stop);
    assert_eq!(history[1], MotorCommand::Rotate { degrees: 45.0 });
    assert_eq!(history[2], MotorCommand::Advance { meters: 0.3 });

    // State went Mowing -> Avoiding -> Mowing.
    let transitions: Vec<(MowerState, MowerState)> =
        state.history().iter().map(|r| (r.from, r.to)).collect();
    assert!(transitions.contains(&(MowerState::Mowing, MowerState::Avoiding)));
    assert!(transitions.contains(&(MowerState::Avoiding, MowerState::Mowing)));
    rig.manager.stop();
}

#[test]
fn critical_sensor_failure_forces_emergency_stop() {
    // Built by hand rather than through rig(): the failure dwell must be
    // tightened before the manager exists.
    let dir = tempfile::tempdir().unwrap();
    let mut config = RuntimeConfig::default();
    config.use_simulation = true;
    config.pid_file = dir.path().join("pid");
    config.snapshot_path = dir.path().join("snap.json");
    config.frame_dir = dir.path().join("frames");
    config.boundary_path = dir.path().join("polygon.json");
    config.model_path = dir.path().join("model.json");
    config.sensors.poll_interval = Duration::from_millis(10);
    config.sensors.aggregate_interval = Duration::from_millis(10);
    config.sensors.retry_base = Duration::from_millis(1);
    config.sensors.retry_cap = Duration::from_millis(2);
    config.vault_path = dir.path().join("secure_storage.enc");
    config.sensors.critical_failure_after = Duration::from_millis(100);
    config.sensors.bus_recovery_enabled = false;

    let world = SimWorld::new();
    let mut manager = ResourceManager::new(config, Box::new(SimPlatform::new(world.clone())));
    manager.start().unwrap();

    // Kill the IMU permanently after startup.
    world.fail_sensor("bno085");

    let state = manager.state();
    assert!(wait_for(Duration::from_secs(5), || {
        state.current_state() == MowerState::EmergencyStop
    }));
    // The policy also requests a clean shutdown.
    assert!(manager.shutdown_flag().is_triggered());
    manager.stop();
}

#[test]
fn bridge_writes_are_atomic_under_concurrent_reads() {
    let mut rig = rig();
    rig.manager.start().unwrap();
    let path = rig._dir.path().join("mower_sensor_data.json");
    assert!(wait_for(Duration::from_secs(2), || path.exists()));

    let mut last_timestamp = 0.0_f64;
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut observed = 0usize;
    while Instant::now() < deadline {
        let bytes = std::fs::read(&path).unwrap();
        // Never a partial document.
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for key in ["imu", "tof", "environment", "power", "gps"] {
            assert!(value["data"].get(key).is_some());
        }
        // Timestamps never regress.
        let ts = value["timestamp"].as_f64().unwrap();
        assert!(ts >= last_timestamp, "timestamp regressed");
        last_timestamp = ts;
        observed += 1;
        std::thread::sleep(Duration::from_millis(15));
    }
    assert!(observed > 50);
    rig.manager.stop();
}

#[test]
fn second_instance_is_rejected_while_the_first_runs() {
    let mut rig = rig();
    rig.manager.start().unwrap();

    // Same pid file, fresh manager: the pid belongs to this (live) test
    // process whose cmdline mentions the mower, so acquisition must fail.
    let mut config = RuntimeConfig::default();
    config.use_simulation = true;
    config.pid_file = rig._dir.path().join("autonomous_mower.pid");
    config.snapshot_path = rig._dir.path().join("other_snapshot.json");
    config.boundary_path = rig._dir.path().join("nope.json");
    config.model_path = rig._dir.path().join("other_model.json");
    config.frame_dir = rig._dir.path().join("other_frames");
    let world = SimWorld::new();
    let mut second = ResourceManager::new(config, Box::new(SimPlatform::new(world)));
    assert!(second.start().is_err());

    rig.manager.stop();
}

#[test]
fn stop_is_idempotent_and_releases_everything() {
    let mut rig = rig();
    rig.manager.start().unwrap();
    let pid_path = rig._dir.path().join("autonomous_mower.pid");
    assert!(pid_path.exists());

    rig.manager.stop();
    rig.manager.stop();
    assert!(!pid_path.exists());
    assert!(!rig.manager.registry().is_initialized());
    // Pattern model was persisted on the way down.
    assert!(rig._dir.path().join("pattern_model.json").exists());
}
