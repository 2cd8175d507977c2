use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Result};

use super::VideoSource;
use crate::worker::InferenceWorker;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub frames_read: u64,
    pub frames_accepted: u64,
    pub frames_dropped: u64,
    pub read_errors: u64,
}

/// Pump `source` into `worker` at the source cadence until end of stream or
/// until `stop` is raised.
///
/// Frames offered while the worker's queue is full are dropped. A read error
/// is logged and skipped while the source still reports healthy.
pub fn run_producer(
    source: &mut VideoSource,
    worker: &InferenceWorker,
    stop: &AtomicBool,
) -> Result<ProducerStats> {
    let mut stats = ProducerStats::default();
    let interval = source.frame_interval();
    let mut next_due = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        if let Some(interval) = interval {
            let now = Instant::now();
            if next_due > now {
                thread::sleep(next_due - now);
            }
            next_due = next_due.max(now) + interval;
        }

        match source.next_frame() {
            Ok(Some(frame)) => {
                stats.frames_read += 1;
                if worker.submit(frame) {
                    stats.frames_accepted += 1;
                } else {
                    stats.frames_dropped += 1;
                }
            }
            Ok(None) => break,
            Err(e) => {
                stats.read_errors += 1;
                log::warn!("{}: frame read failed: {:#}", source.location(), e);
                if !source.is_healthy() {
                    return Err(anyhow!(
                        "source {} became unhealthy after {} frames: {:#}",
                        source.location(),
                        stats.frames_read,
                        e
                    ));
                }
            }
        }
    }

    log::info!(
        "producer finished: {} read, {} queued, {} dropped, {} read errors",
        stats.frames_read,
        stats.frames_accepted,
        stats.frames_dropped,
        stats.read_errors
    );
    Ok(stats)
}
