//! Control thread: one tick of navigation and wheel control at a fixed rate.
//!
//! Per tick:
//! 1. GOTO: plan from the current pose and start a turn or drive phase, or
//!    finish with ARRIVED
//! 2. TURNING/DRIVING: run both wheel controllers, and go back to GOTO once
//!    neither has a target left
//! 3. periodic STATUS, then one telemetry row
//!
//! The goal lock is held across steps 1 and 2 so a concurrent `stop` or
//! `goto` lands either before or after the tick, never in the middle.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::tick;

use crate::controller::update_wheel;
use crate::navigation::{NavState, NavigationGoal, Plan, plan};
use crate::protocol::Feedback;
use crate::shared::DriveContext;
use crate::wheel::WheelId;

/// Advance the control state by one tick.
pub fn control_tick(ctx: &DriveContext, tick: u64) {
    let now = ctx.now();
    let state = {
        let mut goal = ctx.goal();
        match goal.state {
            NavState::Goto => start_phase(ctx, &mut goal, now),
            NavState::Turning | NavState::Driving => run_phase(ctx, &mut goal, now),
            NavState::Idle => {}
        }
        goal.state
    };

    if tick % ctx.config.control.status_every_ticks as u64 == 0 {
        ctx.emit_status_for(state);
    }
    ctx.record_telemetry(state);
}

fn start_phase(ctx: &DriveContext, goal: &mut NavigationGoal, now: f64) {
    let pose = ctx.pose();
    match plan(&pose, goal, &ctx.config.navigation, &ctx.geometry) {
        Plan::Arrived { distance } => {
            log::info!(
                "Arrived at ({:.2}, {:.2}), {:.2} from target ({:.2}, {:.2})",
                pose.x,
                pose.y,
                distance,
                goal.target_x,
                goal.target_y
            );
            goal.state = NavState::Idle;
            for id in WheelId::ALL {
                ctx.wheel(id).stop(now, &ctx.config.pwm);
            }
            ctx.emit(Feedback::Arrived);
        }
        Plan::Turn {
            bearing,
            heading_error,
            left_ticks,
            right_ticks,
        } => {
            log::info!(
                "Turning {:+.1} deg to bearing {:.1} (L {} R {} ticks)",
                heading_error,
                bearing,
                left_ticks,
                right_ticks
            );
            goal.target_heading = bearing;
            begin_phase(ctx, WheelId::Left, left_ticks, now);
            begin_phase(ctx, WheelId::Right, right_ticks, now);
            goal.state = NavState::Turning;
        }
        Plan::Drive { distance, ticks } => {
            log::info!("Driving {:.2} ({} ticks)", distance, ticks);
            goal.target_distance = distance;
            for id in WheelId::ALL {
                begin_phase(ctx, id, ticks, now);
            }
            goal.state = NavState::Driving;
        }
    }
    ctx.emit_status_for(goal.state);
}

/// Start a wheel phase from neutral, so the first drive command ramps.
fn begin_phase(ctx: &DriveContext, id: WheelId, ticks: i64, now: f64) {
    let mut wheel = ctx.wheel(id);
    wheel.stop(now, &ctx.config.pwm);
    wheel.encoder.begin_move(ticks, now);
}

fn run_phase(ctx: &DriveContext, goal: &mut NavigationGoal, now: f64) {
    let magnitude = ctx.pwm_limits().drive_magnitude(goal.speed_scale);
    let mut finished = true;
    for id in WheelId::ALL {
        let mut wheel = ctx.wheel(id);
        let action = update_wheel(
            &mut wheel,
            magnitude,
            now,
            &ctx.config.control,
            &ctx.config.pwm,
        );
        finished &= action.is_finished();
    }

    if finished {
        log::debug!("{} phase complete, re-planning", goal.state);
        goal.state = NavState::Goto;
        ctx.emit_status_for(goal.state);
    }
}

/// Run [`control_tick`] at `control.rate_hz` until shutdown.
pub fn run_control_loop(ctx: Arc<DriveContext>) {
    let period = Duration::from_secs_f64(ctx.config.control.period_secs());
    let ticker = tick(period);
    let mut count: u64 = 0;

    log::info!("Control loop started at {} Hz", ctx.config.control.rate_hz);
    while ctx.is_running() {
        if ticker.recv().is_err() {
            break;
        }
        control_tick(&ctx, count);
        count = count.wrapping_add(1);
    }
    log::info!("Control loop stopped after {} ticks", count);
}
