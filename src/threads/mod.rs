//! Worker threads.
//!
//! - Sensor thread: parallel bus reads, encoder tracking and pose fusion, as
//!   fast as the buses allow
//! - Control thread: navigation state machine and wheel controllers at a
//!   fixed rate, plus STATUS and telemetry
//! - Command thread: blocking line reader on stdin

mod command;
mod control;
mod sensor;

pub use command::{Flow, apply_command, run_command_loop};
pub use control::{control_tick, run_control_loop};
pub use sensor::SensorThread;

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};
use crate::sensors::SensorSampler;
use crate::shared::DriveContext;

/// Thread handles for the running daemon.
pub struct ThreadHandles {
    pub sensor: JoinHandle<()>,
    pub control: JoinHandle<()>,
    /// Blocked on stdin until a line or EOF arrives, so it is never joined
    pub command: JoinHandle<()>,
}

/// Spawn all threads and return handles.
///
/// If a spawn fails, the shutdown flag is cleared and every thread already
/// started is joined before the error is returned.
pub fn spawn_threads(ctx: Arc<DriveContext>, sampler: SensorSampler) -> Result<ThreadHandles> {
    let sensor_ctx = Arc::clone(&ctx);
    let sensor = thread::Builder::new()
        .name("sensor".into())
        .spawn(move || {
            let mut sensor_thread = SensorThread::new(sensor_ctx, sampler);
            sensor_thread.run();
        })
        .map_err(|_| Error::ThreadSpawn("sensor"))?;

    let control_ctx = Arc::clone(&ctx);
    let control = match thread::Builder::new()
        .name("control".into())
        .spawn(move || run_control_loop(control_ctx))
    {
        Ok(handle) => handle,
        Err(_) => return Err(unwind(&ctx, "control", vec![sensor])),
    };

    let command_ctx = Arc::clone(&ctx);
    let command = match thread::Builder::new()
        .name("command".into())
        .spawn(move || run_command_loop(&command_ctx, io::stdin().lock()))
    {
        Ok(handle) => handle,
        Err(_) => return Err(unwind(&ctx, "command", vec![sensor, control])),
    };

    Ok(ThreadHandles {
        sensor,
        control,
        command,
    })
}

/// Stop and join the threads that did start after `failed` could not.
fn unwind(ctx: &DriveContext, failed: &'static str, started: Vec<JoinHandle<()>>) -> Error {
    log::error!("Failed to spawn {} thread, stopping the others", failed);
    ctx.request_shutdown();
    for handle in started {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            log::error!("{} thread panicked", name);
        }
    }
    Error::ThreadSpawn(failed)
}
