//! Command thread: reads protocol lines and applies them to the shared state.
//!
//! Acknowledgements and their STATUS lines are written while the goal lock
//! is still held, so the control thread cannot report a transition caused by
//! a command before that command's `OK`.

use std::io::BufRead;

use crate::controller::PwmLimits;
use crate::protocol::{Command, Feedback, parse_command};
use crate::shared::{ControlMode, DriveContext};
use crate::wheel::WheelId;

/// Whether the reader should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Apply one parsed command.
pub fn apply_command(ctx: &DriveContext, cmd: Command) -> Flow {
    match cmd {
        Command::Goto { x, y } => {
            let mut goal = ctx.goal();
            goal.set_target(x, y);
            ctx.set_mode(ControlMode::Autonomous);
            log::info!("Goal set to ({:.2}, {:.2})", x, y);
            ctx.emit(Feedback::Ack(cmd));
            ctx.emit_status_for(goal.state);
        }
        Command::Speed(scale) => {
            let scale = scale.clamp(0.0, 1.0);
            ctx.goal().speed_scale = scale;
            ctx.emit(Feedback::Ack(Command::Speed(scale)));
        }
        Command::SetPwm { min, max } => {
            let limits = PwmLimits::new(min, max);
            ctx.set_pwm_limits(limits);
            log::info!(
                "PWM limits set to {}..{} %",
                limits.min_percent,
                limits.max_percent
            );
            ctx.emit(Feedback::Ack(Command::SetPwm {
                min: limits.min_percent,
                max: limits.max_percent,
            }));
        }
        Command::SetPos { x, y, heading } => {
            let goal = ctx.goal();
            ctx.pose_mut().reset(x, y, heading);
            log::info!("Pose set to ({:.2}, {:.2}, {:.2})", x, y, heading);
            ctx.emit(Feedback::Ack(cmd));
            ctx.emit_status_for(goal.state);
        }
        Command::Stop => {
            ctx.stop_all();
            ctx.set_mode(ControlMode::Idle);
            log::info!("Stop: motors zeroed, goal cleared");
            ctx.flush_telemetry();
            let goal = ctx.goal();
            ctx.emit(Feedback::Ack(cmd));
            ctx.emit_status_for(goal.state);
        }
        Command::Pulse { left_ns, right_ns } => {
            let now = ctx.now();
            let pwm = &ctx.config.pwm;
            let mut goal = ctx.goal();
            goal.clear();
            let mut applied = [0u32; 2];
            for (id, requested) in WheelId::ALL.into_iter().zip([left_ns, right_ns]) {
                let mut wheel = ctx.wheel(id);
                wheel.encoder.clear_target();
                applied[id.index()] = wheel.manual_pulse(requested, now, pwm);
            }
            ctx.set_mode(ControlMode::Manual);
            ctx.emit(Feedback::Ack(Command::Pulse {
                left_ns: applied[0] as i64,
                right_ns: applied[1] as i64,
            }));
            ctx.emit_status_for(goal.state);
        }
        Command::Quit => {
            ctx.emit(Feedback::Ack(cmd));
            log::info!("Quit requested");
            ctx.request_shutdown();
            return Flow::Quit;
        }
    }
    Flow::Continue
}

/// Read commands until `q`, end of input, or shutdown.
pub fn run_command_loop<R: BufRead>(ctx: &DriveContext, input: R) {
    log::info!("Command reader started");
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Command input failed: {}", e);
                break;
            }
        };
        if !ctx.is_running() {
            return;
        }

        log::debug!("Received command: '{}'", line.trim());
        match parse_command(&line) {
            Some(cmd) => {
                if apply_command(ctx, cmd) == Flow::Quit {
                    return;
                }
            }
            None => log::debug!("Ignoring unrecognised command"),
        }
    }

    log::info!("Command input closed, shutting down");
    ctx.request_shutdown();
}
