//! Background consumer: dequeue, infer, draw, publish.
//!
//! The worker owns one thread. Frames arrive through a [`FrameQueue`];
//! results leave through typed channels handed out by `subscribe_*`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use image::RgbImage;

use crate::config::EngineConfig;
use crate::detect::FrameResult;
use crate::engine::{CascadeEngine, EngineError};
use crate::frame::{Frame, FrameQueue, QueueStats, DEFAULT_POP_TIMEOUT};
use crate::render::AnnotationRenderer;

const WORKER_THREAD_NAME: &str = "inference-worker";
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Annotated image paired with the structured result it was drawn from.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    pub image: Arc<RgbImage>,
    pub result: FrameResult,
}

#[derive(Default)]
struct Subscribers {
    annotated: Mutex<Vec<Sender<Arc<RgbImage>>>>,
    results: Mutex<Vec<Sender<AnnotatedFrame>>>,
}

impl Subscribers {
    fn publish(&self, image: Arc<RgbImage>, result: FrameResult) {
        if let Ok(mut senders) = self.annotated.lock() {
            senders.retain(|tx| tx.send(image.clone()).is_ok());
        }
        if let Ok(mut senders) = self.results.lock() {
            let frame = AnnotatedFrame { image, result };
            senders.retain(|tx| tx.send(frame.clone()).is_ok());
        }
    }
}

struct Shared {
    engine: Arc<CascadeEngine>,
    queue: Arc<FrameQueue>,
    subscribers: Subscribers,
    stop: AtomicBool,
    /// Frames emitted in the current session; also the next `frame_idx`.
    processed: AtomicU64,
    /// Frames taken off the queue and finished with, successful or not.
    completed: AtomicU64,
}

/// Runs the cascade on queued frames in a dedicated thread.
pub struct InferenceWorker {
    shared: Arc<Shared>,
    renderer: AnnotationRenderer,
    poll_timeout: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl InferenceWorker {
    pub fn new(engine: Arc<CascadeEngine>) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                queue: Arc::new(FrameQueue::new()),
                subscribers: Subscribers::default(),
                stop: AtomicBool::new(false),
                processed: AtomicU64::new(0),
                completed: AtomicU64::new(0),
            }),
            renderer: AnnotationRenderer::default(),
            poll_timeout: DEFAULT_POP_TIMEOUT,
            handle: Mutex::new(None),
        }
    }

    pub fn with_renderer(mut self, renderer: AnnotationRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// How long the loop waits for a frame before re-checking the stop flag.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<CascadeEngine> {
        &self.shared.engine
    }

    /// Queue feeding this worker, for producers on other threads.
    pub fn queue(&self) -> Arc<FrameQueue> {
        self.shared.queue.clone()
    }

    /// Spawn the worker thread. Frame indices restart at 0.
    pub fn start(&self) -> Result<()> {
        let mut handle = self
            .handle
            .lock()
            .map_err(|_| anyhow!("worker handle lock poisoned"))?;
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(anyhow!("inference worker already running"));
        }
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.processed.store(0, Ordering::SeqCst);

        let shared = self.shared.clone();
        let renderer = self.renderer.clone();
        let poll_timeout = self.poll_timeout;
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_loop(&shared, &renderer, poll_timeout))
            .context("failed to spawn inference worker thread")?;
        *handle = Some(spawned);
        log::info!("inference worker started");
        Ok(())
    }

    /// Offer a frame; `false` means the queue was full and the frame dropped.
    pub fn submit(&self, frame: Frame) -> bool {
        self.shared.queue.push(frame)
    }

    /// Receive every annotated image emitted from now on.
    pub fn subscribe_annotated(&self) -> Receiver<Arc<RgbImage>> {
        let (tx, rx) = unbounded();
        if let Ok(mut senders) = self.shared.subscribers.annotated.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Receive every (annotated image, result) pair emitted from now on.
    pub fn subscribe_results(&self) -> Receiver<AnnotatedFrame> {
        let (tx, rx) = unbounded();
        if let Ok(mut senders) = self.shared.subscribers.results.lock() {
            senders.push(tx);
        }
        rx
    }

    /// Swap engine configuration; running inference is not interrupted.
    pub fn update_config(&self, config: EngineConfig) -> Result<(), EngineError> {
        self.shared.engine.reload(config)
    }

    /// Signal the loop and block until the thread has exited.
    ///
    /// Frames still queued are discarded.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        if handle.join().is_err() {
            log::error!("inference worker thread panicked");
        }

        let mut discarded = 0u64;
        while self.shared.queue.pop(Duration::ZERO).is_some() {
            discarded += 1;
        }
        self.shared.completed.fetch_add(discarded, Ordering::SeqCst);
        let stats = self.shared.queue.stats();
        log::info!(
            "inference worker stopped after {} frames ({} accepted, {} dropped at queue, {} discarded)",
            self.frames_processed(),
            stats.accepted,
            stats.dropped,
            discarded
        );
    }

    pub fn is_running(&self) -> bool {
        match self.handle.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|h| !h.is_finished()),
            Err(_) => false,
        }
    }

    /// Frames emitted since the last `start`.
    pub fn frames_processed(&self) -> u64 {
        self.shared.processed.load(Ordering::SeqCst)
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.shared.queue.stats()
    }

    /// Wait until every accepted frame has been handled. Returns `false` on
    /// timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let accepted = self.shared.queue.stats().accepted;
            if self.shared.completed.load(Ordering::SeqCst) >= accepted {
                return true;
            }
            if Instant::now() >= deadline || !self.is_running() {
                return false;
            }
            thread::sleep(IDLE_POLL);
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &Shared, renderer: &AnnotationRenderer, poll_timeout: Duration) {
    let mut frame_idx: u64 = 0;
    while !shared.stop.load(Ordering::SeqCst) {
        let Some(frame) = shared.queue.pop(poll_timeout) else {
            continue;
        };
        match shared.engine.infer(frame.image()) {
            Ok(detections) => {
                let annotated = Arc::new(renderer.draw(frame.image(), &detections, true));
                log::debug!(
                    "frame {} (source #{}): {} detections, {:?} since capture",
                    frame_idx,
                    frame.sequence,
                    detections.len(),
                    frame.age()
                );
                shared.subscribers.publish(
                    annotated,
                    FrameResult {
                        frame_idx,
                        detections,
                    },
                );
                frame_idx += 1;
                shared.processed.store(frame_idx, Ordering::SeqCst);
            }
            Err(e) => {
                log::warn!("skipping source frame #{}: {}", frame.sequence, e);
            }
        }
        shared.completed.fetch_add(1, Ordering::SeqCst);
    }
}
