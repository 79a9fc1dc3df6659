//! State shared between the sensor, control and command threads.
//!
//! Every piece of mutable state has its own lock. Lock order:
//! - `goal` may be held while taking one wheel, `pose` or `pwm_limits`
//! - never two wheels at once, and never a wheel together with `pose`
//! - `reporter` and `telemetry` are leaves
//! - `telemetry_writer` is only held while writing a detached batch to disk,
//!   never together with any other lock

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::config::AppConfig;
use crate::controller::PwmLimits;
use crate::hal::PwmOutput;
use crate::navigation::{DriveGeometry, NavState, NavigationGoal};
use crate::odometry::{FusionEngine, FusionStep, Pose};
use crate::protocol::{Feedback, Reporter};
use crate::sensors::SensorSample;
use crate::telemetry::{TelemetryBatch, TelemetryEntry, TelemetryLog};
use crate::time::Clock;
use crate::wheel::{Wheel, WheelId, WheelSnapshot};

/// Who is currently in charge of the wheels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Idle,
    /// Direct pulse widths from `pulse`
    Manual,
    /// Navigation goals from `goto`
    Autonomous,
}

impl ControlMode {
    pub fn name(self) -> &'static str {
        match self {
            ControlMode::Idle => "IDLE",
            ControlMode::Manual => "JOYSTICK",
            ControlMode::Autonomous => "VOICE",
        }
    }
}

/// Everything the worker threads share, passed around as `Arc<DriveContext>`.
pub struct DriveContext {
    pub config: AppConfig,
    pub geometry: DriveGeometry,
    clock: Arc<dyn Clock>,
    wheels: [Mutex<Wheel>; 2],
    pose: Mutex<Pose>,
    goal: Mutex<NavigationGoal>,
    gyro_rate: Mutex<f64>,
    pwm_limits: Mutex<PwmLimits>,
    mode: Mutex<ControlMode>,
    telemetry: Mutex<TelemetryLog>,
    /// Serializes file writes so concurrent flushes never race for a name
    telemetry_writer: Mutex<()>,
    reporter: Reporter,
    running: Arc<AtomicBool>,
}

impl DriveContext {
    pub fn new(
        config: AppConfig,
        clock: Arc<dyn Clock>,
        left_pwm: Box<dyn PwmOutput>,
        right_pwm: Box<dyn PwmOutput>,
        reporter: Reporter,
    ) -> Self {
        let nav = &config.navigation;
        let wheels = [
            Mutex::new(Wheel::new(WheelId::Left, left_pwm, &config.pwm)),
            Mutex::new(Wheel::new(WheelId::Right, right_pwm, &config.pwm)),
        ];
        Self {
            geometry: DriveGeometry::new(&config.robot),
            clock,
            wheels,
            pose: Mutex::new(Pose::new(nav.start_x, nav.start_y, nav.start_heading)),
            goal: Mutex::new(NavigationGoal::new(nav.default_speed)),
            gyro_rate: Mutex::new(0.0),
            pwm_limits: Mutex::new(PwmLimits::from_config(&config.pwm)),
            mode: Mutex::new(ControlMode::Idle),
            telemetry: Mutex::new(TelemetryLog::with_capacity(config.telemetry.capacity)),
            telemetry_writer: Mutex::new(()),
            reporter,
            running: Arc::new(AtomicBool::new(true)),
            config,
        }
    }

    /// Use a flag created before the context, so a signal handler installed
    /// ahead of hardware setup stops the same loops.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn wheel(&self, id: WheelId) -> MutexGuard<'_, Wheel> {
        self.wheels[id.index()].lock()
    }

    pub fn goal(&self) -> MutexGuard<'_, NavigationGoal> {
        self.goal.lock()
    }

    pub fn pose_mut(&self) -> MutexGuard<'_, Pose> {
        self.pose.lock()
    }

    pub fn pose(&self) -> Pose {
        *self.pose.lock()
    }

    pub fn nav_state(&self) -> NavState {
        self.goal.lock().state
    }

    pub fn gyro_rate(&self) -> f64 {
        *self.gyro_rate.lock()
    }

    pub fn pwm_limits(&self) -> PwmLimits {
        *self.pwm_limits.lock()
    }

    pub fn set_pwm_limits(&self, limits: PwmLimits) {
        *self.pwm_limits.lock() = limits;
    }

    pub fn mode(&self) -> ControlMode {
        *self.mode.lock()
    }

    pub fn set_mode(&self, mode: ControlMode) {
        *self.mode.lock() = mode;
    }

    pub fn wheel_snapshot(&self, id: WheelId) -> WheelSnapshot {
        self.wheel(id).snapshot()
    }

    pub fn telemetry(&self) -> MutexGuard<'_, TelemetryLog> {
        self.telemetry.lock()
    }

    pub fn emit(&self, line: Feedback) {
        self.reporter.emit(line);
    }

    /// Emit a STATUS line for the given navigation state.
    pub fn emit_status_for(&self, state: NavState) {
        let pose = self.pose();
        self.emit(Feedback::Status {
            x: pose.x,
            y: pose.y,
            heading: pose.heading,
            state,
        });
    }

    pub fn emit_status(&self) {
        let state = self.nav_state();
        self.emit_status_for(state);
    }

    /// Fold a sensor sample into the encoders, gyro rate and pose.
    pub fn ingest_sample(
        &self,
        sample: &SensorSample,
        fusion: &mut FusionEngine,
    ) -> Option<FusionStep> {
        let pwm = &self.config.pwm;
        let mut positions = [0i64; 2];
        for (id, raw) in WheelId::ALL
            .into_iter()
            .zip([sample.left_angle, sample.right_angle])
        {
            let mut wheel = self.wheel(id);
            wheel.observe_angle(raw, pwm);
            positions[id.index()] = wheel.encoder.absolute_position();
        }

        *self.gyro_rate.lock() = sample.gyro_rate;

        let mut pose = self.pose.lock();
        fusion.update(
            &mut pose,
            positions[0],
            positions[1],
            sample.gyro_rate,
            sample.timestamp,
        )
    }

    /// Clear the goal and every wheel target, and zero both outputs
    /// immediately. Safe to call repeatedly.
    pub fn stop_all(&self) {
        let now = self.now();
        let pwm = &self.config.pwm;
        let mut goal = self.goal.lock();
        goal.clear();
        for id in WheelId::ALL {
            let mut wheel = self.wheel(id);
            wheel.encoder.clear_target();
            wheel.stop(now, pwm);
        }
    }

    /// Capture one telemetry row from the current state.
    pub fn record_telemetry(&self, nav_state: NavState) {
        let left = self.wheel_snapshot(WheelId::Left);
        let right = self.wheel_snapshot(WheelId::Right);
        let pose = self.pose();
        let entry = TelemetryEntry {
            time: self.now(),
            mode: self.mode(),
            left,
            right,
            gyro_rate: self.gyro_rate(),
            x: pose.x,
            y: pose.y,
            heading: pose.heading,
            nav_state,
        };
        self.telemetry.lock().record(entry);
    }

    /// Detach everything recorded so far. The control loop keeps recording
    /// into a fresh buffer while the batch is written.
    pub fn take_telemetry(&self) -> TelemetryBatch {
        self.telemetry.lock().take_batch()
    }

    /// Write buffered telemetry to disk. Errors are logged, not returned.
    ///
    /// The recording lock is released before any file I/O, so a long write
    /// never stalls `record_telemetry`.
    pub fn flush_telemetry(&self) {
        let _writer = self.telemetry_writer.lock();
        let batch = self.take_telemetry();
        if let Err(e) = batch.write(&self.config.telemetry) {
            log::error!("Telemetry flush failed: {}", e);
        }
    }

    /// Neutral on both ESCs, then stop generating pulses.
    pub fn shutdown_outputs(&self) {
        let now = self.now();
        for id in WheelId::ALL {
            self.wheel(id).shutdown(now, &self.config.pwm);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// The flag signal handlers clear to stop every loop.
    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Startup failed after the outputs were opened: stop every loop, zero
    /// both ESCs and release the PWM channels.
    pub fn abort(&self) {
        self.request_shutdown();
        self.stop_all();
        self.shutdown_outputs();
    }
}
