//! Sensor thread: sample, track encoders, fuse pose. No fixed sleep; the loop
//! runs as fast as the three buses answer.

use std::sync::Arc;

use crate::odometry::FusionEngine;
use crate::sensors::SensorSampler;
use crate::shared::DriveContext;
use crate::time::sleep_ms;

/// Seconds between fault summaries.
const FAULT_REPORT_INTERVAL: f64 = 5.0;

pub struct SensorThread {
    ctx: Arc<DriveContext>,
    sampler: SensorSampler,
    fusion: FusionEngine,
    samples: u64,
    faults: u64,
    faults_since_report: u64,
    last_report: f64,
}

impl SensorThread {
    pub fn new(ctx: Arc<DriveContext>, sampler: SensorSampler) -> Self {
        let fusion = FusionEngine::new(&ctx.config.robot, &ctx.config.fusion);
        let last_report = ctx.now();
        Self {
            ctx,
            sampler,
            fusion,
            samples: 0,
            faults: 0,
            faults_since_report: 0,
            last_report,
        }
    }

    /// Take one sample and fuse it. Returns `false` if the sample was
    /// rejected and nothing was updated.
    pub fn poll_once(&mut self) -> bool {
        let fused = match self.sampler.sample() {
            Ok(sample) => {
                self.ctx.ingest_sample(&sample, &mut self.fusion);
                self.samples += 1;
                true
            }
            Err(fault) => {
                log::debug!("Skipping sample: {}", fault);
                self.faults += 1;
                self.faults_since_report += 1;
                false
            }
        };
        self.report_faults();
        fused
    }

    pub fn run(&mut self) {
        log::info!("Sensor thread started");
        while self.ctx.is_running() {
            if !self.poll_once() {
                // Back off briefly so a dead bus doesn't spin
                sleep_ms(1);
            }
        }
        log::info!(
            "Sensor thread stopped ({} samples, {} rejected)",
            self.samples,
            self.faults
        );
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn faults(&self) -> u64 {
        self.faults
    }

    fn report_faults(&mut self) {
        let now = self.ctx.now();
        if now - self.last_report < FAULT_REPORT_INTERVAL {
            return;
        }
        if self.faults_since_report > 0 {
            log::warn!(
                "{} sensor samples rejected in the last {:.0}s ({} total)",
                self.faults_since_report,
                now - self.last_report,
                self.faults
            );
        }
        self.faults_since_report = 0;
        self.last_report = now;
    }
}
