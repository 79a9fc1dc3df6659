//! Two-phase navigation: turn toward the goal in place, then drive straight.
//!
//! ```text
//!            goto                 both wheels done
//!   IDLE ───────────► GOTO ◄─────────────────────────┐
//!    ▲                 │                              │
//!    │ arrived         ├── |heading error| > tol ──► TURNING
//!    └─────────────────┤                              │
//!                      └── otherwise ─────────────► DRIVING
//! ```
//!
//! GOTO re-plans from the current fused pose every time a phase completes,
//! which absorbs drift accumulated by the previous phase.

use std::f64::consts::PI;
use std::fmt;

use crate::config::{NavigationConfig, RobotConfig};
use crate::odometry::{Pose, normalize_heading};

/// Navigation state. The numeric codes are part of the STATUS line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum NavState {
    #[default]
    Idle = 0,
    Turning = 1,
    Driving = 2,
    Goto = 3,
}

impl NavState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            NavState::Idle => "IDLE",
            NavState::Turning => "TURNING",
            NavState::Driving => "DRIVING",
            NavState::Goto => "GOTO",
        }
    }

    /// A wheel phase is in progress.
    pub fn is_moving(self) -> bool {
        matches!(self, NavState::Turning | NavState::Driving)
    }
}

impl fmt::Display for NavState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The active goal and navigation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationGoal {
    pub state: NavState,
    pub target_x: f64,
    pub target_y: f64,
    /// Bearing to the target when the last turn was planned (degrees)
    pub target_heading: f64,
    /// Distance to the target when the last drive was planned
    pub target_distance: f64,
    /// Navigation speed scale in `[0, 1]`
    pub speed_scale: f64,
}

impl NavigationGoal {
    pub fn new(speed_scale: f64) -> Self {
        Self {
            state: NavState::Idle,
            target_x: 0.0,
            target_y: 0.0,
            target_heading: 0.0,
            target_distance: 0.0,
            speed_scale: speed_scale.clamp(0.0, 1.0),
        }
    }

    /// Accept a new target and start planning.
    pub fn set_target(&mut self, x: f64, y: f64) {
        self.target_x = x;
        self.target_y = y;
        self.state = NavState::Goto;
    }

    /// Drop the goal. Speed scale is kept.
    pub fn clear(&mut self) {
        self.state = NavState::Idle;
        self.target_x = 0.0;
        self.target_y = 0.0;
        self.target_heading = 0.0;
        self.target_distance = 0.0;
    }
}

/// Converts between distances/angles and wheel ticks.
#[derive(Debug, Clone, Copy)]
pub struct DriveGeometry {
    pub ticks_per_unit: f64,
    pub wheelbase: f64,
}

impl DriveGeometry {
    pub fn new(robot: &RobotConfig) -> Self {
        Self {
            ticks_per_unit: robot.ticks_per_unit(),
            wheelbase: robot.wheelbase,
        }
    }

    /// Wheel ticks each side travels to rotate the robot in place by `degrees`.
    pub fn turn_ticks(&self, degrees: f64) -> i64 {
        let arc = (degrees.abs() / 360.0) * PI * self.wheelbase;
        (arc * self.ticks_per_unit).round() as i64
    }

    /// Wheel ticks for a straight move of `distance` (signed).
    pub fn distance_ticks(&self, distance: f64) -> i64 {
        (distance * self.ticks_per_unit).round() as i64
    }
}

/// What the state machine wants done next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Plan {
    /// Within tolerance of the target
    Arrived { distance: f64 },
    /// Rotate in place; positive error is counter-clockwise
    Turn {
        bearing: f64,
        heading_error: f64,
        left_ticks: i64,
        right_ticks: i64,
    },
    /// Drive straight
    Drive { distance: f64, ticks: i64 },
}

/// Wrap an angle difference into `[-180, 180]`.
pub fn signed_heading_error(target: f64, current: f64) -> f64 {
    let diff = normalize_heading(target - current);
    if diff > 180.0 { diff - 360.0 } else { diff }
}

/// Bearing from `(x, y)` to `(tx, ty)` in degrees, `[0, 360)`.
pub fn bearing_to(x: f64, y: f64, tx: f64, ty: f64) -> f64 {
    normalize_heading((ty - y).atan2(tx - x).to_degrees())
}

/// Decide the next phase from the current pose.
pub fn plan(
    pose: &Pose,
    goal: &NavigationGoal,
    nav: &NavigationConfig,
    geometry: &DriveGeometry,
) -> Plan {
    let dx = goal.target_x - pose.x;
    let dy = goal.target_y - pose.y;
    let distance = dx.hypot(dy);

    if distance < nav.arrival_tolerance {
        return Plan::Arrived { distance };
    }

    let bearing = bearing_to(pose.x, pose.y, goal.target_x, goal.target_y);
    let heading_error = signed_heading_error(bearing, pose.heading);

    if heading_error.abs() > nav.turn_tolerance_deg {
        let ticks = geometry.turn_ticks(heading_error);
        // Counter-clockwise: left wheel back, right wheel forward
        let (left_ticks, right_ticks) = if heading_error > 0.0 {
            (-ticks, ticks)
        } else {
            (ticks, -ticks)
        };
        Plan::Turn {
            bearing,
            heading_error,
            left_ticks,
            right_ticks,
        }
    } else {
        Plan::Drive {
            distance,
            ticks: geometry.distance_ticks(distance),
        }
    }
}
