//! Closed-Loop Drive Scenarios
//!
//! Runs the sensor, control and command paths against the simulated robot
//! with a manually advanced clock. Each step is one 5 ms control period:
//! advance the clock, take one sensor sample, run one control tick.
//!
//! Covers:
//! - goto: turn-then-drive sequencing, ARRIVED, final pose accuracy
//! - manual pulses: encoder tracking across many revolutions, both directions
//! - stop/setpos/setpwm protocol behaviour
//! - stall counting on a blocked wheel
//! - transient sensor faults
//!
//! Run with: `cargo test --test drive_scenarios`

use std::sync::Arc;
use std::time::Duration;

use chakra_drive::hal::{SimSensor, SimulatedRobot, create_hardware};
use chakra_drive::navigation::NavState;
use chakra_drive::protocol::{LineCapture, Reporter, parse_command};
use chakra_drive::sensors::SensorSampler;
use chakra_drive::threads::{Flow, SensorThread, apply_command, control_tick};
use chakra_drive::time::ManualClock;
use chakra_drive::wheel::WheelId;
use chakra_drive::{AppConfig, ControlMode, DriveContext};
use tempfile::TempDir;

// ============================================================================
// Test Rig
// ============================================================================

const STEP: Duration = Duration::from_millis(5);

struct Rig {
    ctx: Arc<DriveContext>,
    sensor: SensorThread,
    sim: SimulatedRobot,
    clock: Arc<ManualClock>,
    capture: LineCapture,
    tick: u64,
    logs: TempDir,
}

impl Rig {
    fn new() -> Self {
        let logs = TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.device.device_type = "mock".into();
        config.simulation.bus_latency_us = 0;
        config.simulation.gyro_noise_dps = 0.0;
        config.hardware.bus_timeout_ms = 1000;
        config.telemetry.capacity = 50_000;
        config.telemetry.log_dir = logs.path().to_path_buf();
        config.telemetry.latest_dir = None;

        let clock = Arc::new(ManualClock::new());
        let hw = create_hardware(&config, clock.clone()).unwrap();
        let sim = hw.simulator.clone().unwrap();
        let sampler = SensorSampler::new(
            hw.left_encoder,
            hw.right_encoder,
            hw.gyro,
            clock.clone(),
            Duration::from_millis(config.hardware.bus_timeout_ms),
        )
        .unwrap();

        let capture = LineCapture::new();
        let ctx = Arc::new(DriveContext::new(
            config,
            clock.clone(),
            hw.left_pwm,
            hw.right_pwm,
            Reporter::new(Box::new(capture.clone())),
        ));
        ctx.stop_all();

        let mut sensor = SensorThread::new(Arc::clone(&ctx), sampler);
        // Seed encoders and pose
        assert!(sensor.poll_once());

        Self {
            ctx,
            sensor,
            sim,
            clock,
            capture,
            tick: 0,
            logs,
        }
    }

    fn step(&mut self) {
        self.clock.advance(STEP);
        self.sensor.poll_once();
        control_tick(&self.ctx, self.tick);
        self.tick += 1;
    }

    fn run_for(&mut self, secs: f64) {
        let steps = (secs / STEP.as_secs_f64()).round() as usize;
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until `done` holds or `max_secs` of simulated time pass.
    fn run_until(&mut self, max_secs: f64, done: impl Fn(&Rig) -> bool) -> bool {
        let steps = (max_secs / STEP.as_secs_f64()).round() as usize;
        for _ in 0..steps {
            self.step();
            if done(&*self) {
                return true;
            }
        }
        false
    }

    fn send(&self, line: &str) -> Flow {
        apply_command(&self.ctx, parse_command(line).unwrap())
    }

    fn lines(&self) -> Vec<String> {
        self.capture.lines()
    }

    fn arrived(&self) -> bool {
        self.lines().iter().any(|l| l == "ARRIVED")
    }

    /// Navigation state codes from every STATUS line, in order.
    fn status_codes(&self) -> Vec<u8> {
        self.lines()
            .iter()
            .filter(|l| l.starts_with("STATUS "))
            .filter_map(|l| l.split_whitespace().nth(4)?.parse().ok())
            .collect()
    }

    fn csv_count(&self) -> usize {
        std::fs::read_dir(self.logs.path()).unwrap().count()
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - b.0).hypot(a.1 - b.1)
}

// ============================================================================
// Navigation
// ============================================================================

#[test]
fn test_goto_turns_then_drives_then_arrives() {
    let mut rig = Rig::new();
    rig.send("goto 30 30");
    assert_eq!(rig.lines()[0], "OK goto 30.00 30.00");

    let arrived = rig.run_until(120.0, Rig::arrived);
    assert!(arrived, "no ARRIVED, last lines: {:?}", rig.lines().last());

    let codes = rig.status_codes();
    let first_turn = codes.iter().position(|&c| c == NavState::Turning.code());
    let first_drive = codes.iter().position(|&c| c == NavState::Driving.code());
    assert!(first_turn.is_some() && first_drive.is_some());
    assert!(first_turn < first_drive, "codes: {:?}", codes);

    assert_eq!(rig.lines().iter().filter(|l| *l == "ARRIVED").count(), 1);
    assert_eq!(rig.ctx.nav_state(), NavState::Idle);

    let pose = rig.ctx.pose();
    assert!(distance((pose.x, pose.y), (30.0, 30.0)) <= 1.0);
    let (tx, ty, _) = rig.sim.true_pose();
    assert!(
        distance((tx, ty), (30.0, 30.0)) < 3.0,
        "true pose ({:.2}, {:.2})",
        tx,
        ty
    );

    // Idle after arrival: nothing moves
    let revs = rig.sim.revolutions(WheelId::Left);
    rig.run_for(1.0);
    assert_eq!(rig.sim.revolutions(WheelId::Left), revs);
}

#[test]
fn test_first_turn_is_clockwise() {
    let mut rig = Rig::new();
    rig.send("goto 30 30");
    rig.step();
    assert_eq!(rig.ctx.nav_state(), NavState::Turning);

    rig.run_for(0.8);
    let (_, _, heading) = rig.sim.true_pose();
    assert!(heading < 90.0 && heading > 20.0, "heading {:.2}", heading);
    assert!(rig.sim.revolutions(WheelId::Left) > 0.0);
    assert!(rig.sim.revolutions(WheelId::Right) < 0.0);
}

#[test]
fn test_goto_current_position_arrives_immediately() {
    let mut rig = Rig::new();
    rig.send("goto 0.2 15.3");
    rig.step();
    assert!(rig.arrived());
    assert_eq!(rig.ctx.nav_state(), NavState::Idle);
}

// ============================================================================
// Manual Control and Encoder Tracking
// ============================================================================

#[test]
fn test_pulse_forward_tracks_many_revolutions() {
    let mut rig = Rig::new();
    rig.send("pulse 1700000 1700000");
    assert_eq!(rig.ctx.mode(), ControlMode::Manual);

    rig.run_for(4.0);
    let revs = rig.sim.revolutions(WheelId::Left);
    assert!(revs > 3.0, "only {:.2} revolutions", revs);

    let (tx, ty, _) = rig.sim.true_pose();
    let pose = rig.ctx.pose();
    assert!((pose.x - tx).abs() < 0.01);
    assert!((pose.y - ty).abs() < 0.01, "fused {:.3} true {:.3}", pose.y, ty);
    assert!(pose.y > 15.0 + 3.0);
}

#[test]
fn test_pulse_reverse_tracks_many_revolutions() {
    let mut rig = Rig::new();
    rig.send("pulse 1300000 1300000");
    rig.run_for(4.0);

    assert!(rig.sim.revolutions(WheelId::Right) < -3.0);
    let (_, ty, _) = rig.sim.true_pose();
    let pose = rig.ctx.pose();
    assert!((pose.y - ty).abs() < 0.01, "fused {:.3} true {:.3}", pose.y, ty);
    assert!(pose.y < 15.0 - 3.0);
}

#[test]
fn test_spin_in_place_heading_follows_gyro() {
    let mut rig = Rig::new();
    rig.send("pulse 1300000 1700000");
    rig.run_for(2.0);

    let (tx, ty, theading) = rig.sim.true_pose();
    let pose = rig.ctx.pose();
    let diff = (pose.heading - theading + 540.0).rem_euclid(360.0) - 180.0;
    assert!(diff.abs() < 0.5, "fused {:.2} true {:.2}", pose.heading, theading);
    assert!(distance((pose.x, pose.y), (tx, ty)) < 0.05);
}

// ============================================================================
// Protocol Behaviour
// ============================================================================

#[test]
fn test_stop_mid_goal_is_immediate_and_idempotent() {
    let mut rig = Rig::new();
    rig.send("setpos 0 0 0");
    rig.send("goto 40 0");
    rig.run_for(3.0);
    assert_eq!(rig.ctx.nav_state(), NavState::Driving);
    let neutral = rig.ctx.config.pwm.neutral_ns;
    assert!(rig.sim.pulse(WheelId::Left) > neutral);

    rig.send("stop");
    assert_eq!(rig.sim.pulse(WheelId::Left), neutral);
    assert_eq!(rig.sim.pulse(WheelId::Right), neutral);
    assert_eq!(rig.ctx.nav_state(), NavState::Idle);
    assert_eq!(rig.csv_count(), 1);

    rig.send("stop");
    assert_eq!(rig.sim.pulse(WheelId::Left), neutral);
    assert_eq!(rig.ctx.nav_state(), NavState::Idle);
    assert_eq!(rig.ctx.mode(), ControlMode::Idle);
    // Buffer was already empty
    assert_eq!(rig.csv_count(), 1);

    // Control ticks leave the wheels alone afterwards
    rig.run_for(0.5);
    assert_eq!(rig.sim.pulse(WheelId::Left), neutral);
    assert!(!rig.ctx.wheel_snapshot(WheelId::Left).has_target);
}

#[test]
fn test_telemetry_file_contents() {
    let mut rig = Rig::new();
    rig.send("pulse 1600000 1600000");
    rig.run_for(0.5);
    rig.send("stop");

    let file = std::fs::read_dir(rig.logs.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let name = file.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("motor_log_joystick_"), "{}", name);

    let contents = std::fs::read_to_string(&file).unwrap();
    let mut lines = contents.lines();
    assert!(lines.next().unwrap().starts_with("time,mode,pwm_l,i2c_l"));
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 100);
    assert!(rows.iter().all(|r| r.split(',').count() == 15));
    assert!(rows[0].contains(",JOYSTICK,1600000,"));
}

#[test]
fn test_setpos_round_trip_survives_fusion() {
    let mut rig = Rig::new();
    rig.send("setpos 7.25 -2.5 135");
    assert_eq!(
        rig.lines(),
        vec!["OK setpos 7.25 -2.50 135.00", "STATUS 7.25 -2.50 135.00 0"]
    );

    // Stationary robot: next samples only re-seed, pose stays exact
    rig.step();
    rig.step();
    let pose = rig.ctx.pose();
    assert_eq!((pose.x, pose.y, pose.heading), (7.25, -2.5, 135.0));
}

#[test]
fn test_setpwm_clamps_both_ends() {
    let rig = Rig::new();
    rig.send("setpwm 10 150");
    assert_eq!(rig.lines(), vec!["OK setpwm 20 100"]);
}

#[test]
fn test_quit_requests_shutdown() {
    let rig = Rig::new();
    assert_eq!(rig.send("q"), Flow::Quit);
    assert!(!rig.ctx.is_running());
    assert_eq!(rig.lines(), vec!["OK quit"]);
}

// ============================================================================
// Faults
// ============================================================================

#[test]
fn test_blocked_wheel_stalls_once_per_window() {
    let mut rig = Rig::new();
    rig.sim.set_blocked(WheelId::Left, true);
    rig.send("goto 0 40");
    rig.step();
    assert_eq!(rig.ctx.nav_state(), NavState::Driving);

    // 1.6 s: checks at ~0.5, ~1.0 and ~1.5 s after the phase began
    let mut counts = Vec::new();
    for _ in 0..320 {
        rig.step();
        counts.push(rig.ctx.wheel(WheelId::Left).encoder.stall.count);
    }
    assert_eq!(*counts.last().unwrap(), 3);
    let increments = counts.windows(2).filter(|w| w[1] > w[0]).count();
    assert_eq!(increments, 3);
    assert_eq!(counts[0], 0);
    // Moving wheel never stalls
    assert_eq!(rig.ctx.wheel(WheelId::Right).encoder.stall.count, 0);
    assert!(rig.ctx.wheel_snapshot(WheelId::Left).has_target);

    // Released wheel moves again and the boost resets
    rig.sim.set_blocked(WheelId::Left, false);
    rig.run_for(1.1);
    assert_eq!(rig.ctx.wheel(WheelId::Left).encoder.stall.count, 0);
}

#[test]
fn test_transient_fault_skips_sample() {
    let mut rig = Rig::new();
    rig.send("pulse 1700000 1700000");
    rig.sim.fail_reads(SimSensor::Gyro, 3);

    let before = rig.sensor.faults();
    for _ in 0..3 {
        rig.clock.advance(STEP);
        assert!(!rig.sensor.poll_once());
    }
    assert_eq!(rig.sensor.faults() - before, 3);
    // Pose untouched by the rejected samples
    assert_eq!(rig.ctx.pose().y, 15.0);

    rig.clock.advance(STEP);
    assert!(rig.sensor.poll_once());
    let (_, ty, _) = rig.sim.true_pose();
    assert!((rig.ctx.pose().y - ty).abs() < 0.01);
}
