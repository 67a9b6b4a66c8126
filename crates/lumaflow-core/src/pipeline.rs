//! Tick driver
//!
//! One [`AudioPipeline::process`] call is one tick:
//! - spectral frontend and rhythm analyzer run on every frame
//! - harmony runs on its own throttle, either inline or on a worker thread
//!   fed through bounded channels; the tick never waits for it
//! - section tracker, context engine and (in intelligent mode) the
//!   prediction matrix run once per tick on whatever harmony result is current
//!
//! Results from the harmony worker carry the source epoch they were computed
//! for, so nothing computed for a previous source leaks into the next one.

use crate::audio::{AudioFrame, SpectralFrontend};
use crate::config::{HarmonyMode, PipelineConfig};
use crate::context::{ContextEngine, MusicalContext};
use crate::events::{EventBus, PipelineEvent};
use crate::harmony::{Chroma, HarmonyAnalysis, HarmonyDetector, KeyChange};
use crate::prediction::{Prediction, PredictionMatrix};
use crate::rhythm::RhythmAnalyzer;
use crate::section::SectionTracker;
use crate::{CoreError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Result of one tick
#[derive(Debug, Clone)]
pub struct TickOutput {
    /// Snapshot published for this tick
    pub context: Arc<MusicalContext>,
    /// Current prediction, intelligent mode only
    pub prediction: Option<Prediction>,
    /// Events emitted during this tick, in emission order
    pub events: Vec<PipelineEvent>,
}

/// Tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames processed
    pub ticks: u64,
    /// Harmony analyses requested
    pub harmony_jobs: u64,
    /// Harmony jobs dropped because the worker queue was full
    pub harmony_jobs_dropped: u64,
    /// Ticks that reused an older harmony result while a newer one was pending
    pub harmony_stale_ticks: u64,
    /// Worker results discarded because they belonged to an earlier source
    pub harmony_results_discarded: u64,
    /// Source resets performed
    pub source_resets: u64,
}

/// Requests a source reset from another thread.
///
/// The reset is applied atomically before the next tick.
#[derive(Debug, Clone)]
pub struct SourceResetHandle {
    flag: Arc<AtomicBool>,
}

impl SourceResetHandle {
    /// Ask for a reset
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// A reset is waiting for the next tick
    pub fn is_pending(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct HarmonyJob {
    epoch: u64,
    chroma: Chroma,
    now_ms: u64,
}

struct HarmonyResult {
    epoch: u64,
    analysis: HarmonyAnalysis,
}

struct HarmonyWorker {
    jobs: Option<Sender<HarmonyJob>>,
    results: Receiver<HarmonyResult>,
    thread: Option<JoinHandle<()>>,
}

impl HarmonyWorker {
    fn spawn(mut detector: HarmonyDetector, queue: usize) -> Result<Self> {
        let (job_tx, job_rx) = bounded::<HarmonyJob>(queue.max(1));
        let (result_tx, result_rx) = bounded::<HarmonyResult>(queue.max(1));

        let thread = thread::Builder::new()
            .name("lumaflow-harmony".to_string())
            .spawn(move || {
                debug!("Harmony worker started");
                let mut epoch = 0;
                for job in job_rx.iter() {
                    if job.epoch != epoch {
                        detector.reset();
                        epoch = job.epoch;
                    }
                    let analysis = detector.update(&job.chroma, job.now_ms);
                    match result_tx.try_send(HarmonyResult { epoch, analysis }) {
                        Ok(()) | Err(TrySendError::Full(_)) => {}
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                debug!("Harmony worker stopped");
            })
            .map_err(|e| CoreError::WorkerUnavailable(e.to_string()))?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            thread: Some(thread),
        })
    }
}

impl Drop for HarmonyWorker {
    fn drop(&mut self) {
        // Closing the job queue ends the worker loop
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Harmony worker panicked");
            }
        }
    }
}

enum HarmonyRunner {
    Inline(HarmonyDetector),
    Worker(HarmonyWorker),
}

/// Owns one instance of every stateful stage for a single audio source.
pub struct AudioPipeline {
    config: PipelineConfig,
    frontend: SpectralFrontend,
    rhythm: RhythmAnalyzer,
    harmony: HarmonyRunner,
    section: SectionTracker,
    context: ContextEngine,
    prediction: PredictionMatrix,
    events: EventBus,

    epoch: u64,
    reset_flag: Arc<AtomicBool>,
    latest_harmony: Option<HarmonyAnalysis>,
    last_harmony_request_ms: Option<u64>,
    harmony_pending: bool,
    harmony_fresh: bool,
    last_prediction_id: u64,
    last_activity_ms: Option<u64>,
    source_lost: bool,
    stats: PipelineStats,
}

impl AudioPipeline {
    /// Build every stage from `config`, spawning the harmony worker if configured
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let detector = HarmonyDetector::new(config.harmony.clone());
        let harmony = match config.driver.harmony_mode {
            HarmonyMode::Inline => HarmonyRunner::Inline(detector),
            HarmonyMode::Worker => {
                HarmonyRunner::Worker(HarmonyWorker::spawn(detector, config.driver.worker_queue)?)
            }
        };
        info!(
            "Audio pipeline ready (harmony {:?}, fft {}, {} Hz)",
            config.driver.harmony_mode, config.spectral.fft_size, config.spectral.sample_rate
        );

        Ok(Self {
            frontend: SpectralFrontend::new(config.spectral.clone()),
            rhythm: RhythmAnalyzer::new(config.rhythm.clone()),
            section: SectionTracker::new(config.section.clone()),
            context: ContextEngine::new(config.context.clone()),
            prediction: PredictionMatrix::new(config.prediction.clone()),
            events: EventBus::new(),
            harmony,
            config,
            epoch: 0,
            reset_flag: Arc::new(AtomicBool::new(false)),
            latest_harmony: None,
            last_harmony_request_ms: None,
            harmony_pending: false,
            harmony_fresh: false,
            last_prediction_id: 0,
            last_activity_ms: None,
            source_lost: false,
            stats: PipelineStats::default(),
        })
    }

    /// Subscribe to pipeline events
    pub fn subscribe(&self, capacity: usize) -> Receiver<PipelineEvent> {
        self.events.subscribe(capacity)
    }

    /// Events discarded because a subscriber queue was full
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Handle for requesting a source reset from elsewhere
    pub fn reset_handle(&self) -> SourceResetHandle {
        SourceResetHandle {
            flag: Arc::clone(&self.reset_flag),
        }
    }

    /// Latest published context
    pub fn context(&self) -> Arc<MusicalContext> {
        self.context.snapshot()
    }

    /// Tick counters
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Prediction cache counters (hits, misses)
    pub fn prediction_cache_stats(&self) -> (u64, u64) {
        (self.prediction.cache_hits(), self.prediction.cache_misses())
    }

    /// The configuration the pipeline was built with
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one tick
    pub fn process(&mut self, frame: &AudioFrame) -> Result<TickOutput> {
        if self.reset_flag.swap(false, Ordering::AcqRel) {
            self.reset_source();
        }
        if self.source_lost {
            return Err(CoreError::SourceLost {
                silent_ms: self.silent_for(frame.timestamp_ms),
            });
        }
        let now = frame.timestamp_ms;
        self.last_activity_ms = Some(now);
        self.stats.ticks += 1;

        let bands = self.frontend.analyze(frame);
        let rhythm = self.rhythm.analyze(frame, &bands);

        let mut events = Vec::new();
        let harmony_due = self
            .last_harmony_request_ms
            .map_or(true, |t| now.saturating_sub(t) >= self.config.harmony.throttle_ms);
        if harmony_due {
            self.last_harmony_request_ms = Some(now);
            let chroma = Chroma::from_spectrum(&bands.magnitudes, bands.bin_hz, bands.raw_energy);
            self.request_harmony(chroma, now);
        }
        if let Some(change) = self.collect_harmony() {
            events.push(PipelineEvent::KeyChanged {
                change,
                timestamp_ms: now,
            });
        }
        if self.harmony_pending {
            self.stats.harmony_stale_ticks += 1;
        }

        let section = self
            .section
            .update(&bands, &rhythm, self.latest_harmony.as_ref(), now);
        let context = self.context.fuse(
            &bands,
            &rhythm,
            self.latest_harmony.as_ref(),
            &section,
            now,
            &mut events,
        );
        events.insert(0, PipelineEvent::ContextUpdated(Arc::clone(&context)));

        let prediction = if context.is_intelligent() {
            self.prediction.predict(&context)
        } else {
            None
        };
        if let Some(p) = &prediction {
            if p.id != self.last_prediction_id {
                self.last_prediction_id = p.id;
                events.push(PipelineEvent::Prediction(p.clone()));
            }
        }

        for event in &events {
            self.events.publish(event.clone());
        }
        Ok(TickOutput {
            context,
            prediction,
            events,
        })
    }

    /// Record that no frame arrived at `now_ms`.
    ///
    /// Held state is reused until the silence limit; past it the source is
    /// declared lost and frames are refused until [`AudioPipeline::reset_source`].
    pub fn idle(&mut self, now_ms: u64) -> Result<()> {
        if self.reset_flag.swap(false, Ordering::AcqRel) {
            self.reset_source();
        }
        let since = *self.last_activity_ms.get_or_insert(now_ms);
        let silent_ms = now_ms.saturating_sub(since);
        if silent_ms >= self.config.driver.silence_limit_ms {
            if !self.source_lost {
                warn!("No audio for {} ms, source lost", silent_ms);
            }
            self.source_lost = true;
            return Err(CoreError::SourceLost { silent_ms });
        }
        Ok(())
    }

    /// Whether the source has been declared lost
    pub fn is_source_lost(&self) -> bool {
        self.source_lost
    }

    /// Rebuild every rolling-window stage for a new source in one step
    pub fn reset_source(&mut self) {
        self.epoch += 1;
        self.frontend.reset();
        self.rhythm.reset();
        self.section.reset();
        self.context.reset();
        self.prediction.reset();
        match &mut self.harmony {
            HarmonyRunner::Inline(detector) => detector.reset(),
            HarmonyRunner::Worker(worker) => {
                // Anything still queued belongs to the old source
                while worker.results.try_recv().is_ok() {
                    self.stats.harmony_results_discarded += 1;
                }
            }
        }
        self.latest_harmony = None;
        self.last_harmony_request_ms = None;
        self.harmony_pending = false;
        self.harmony_fresh = false;
        self.last_activity_ms = None;
        self.source_lost = false;
        self.stats.source_resets += 1;
        info!("Audio source reset (epoch {})", self.epoch);
    }

    fn silent_for(&self, now_ms: u64) -> u64 {
        self.last_activity_ms
            .map_or(0, |t| now_ms.saturating_sub(t))
    }

    fn request_harmony(&mut self, chroma: Chroma, now_ms: u64) {
        self.stats.harmony_jobs += 1;
        let fallback = match &mut self.harmony {
            HarmonyRunner::Inline(detector) => {
                self.latest_harmony = Some(detector.update(&chroma, now_ms));
                self.harmony_fresh = true;
                return;
            }
            HarmonyRunner::Worker(worker) => {
                let Some(jobs) = &worker.jobs else {
                    return;
                };
                let job = HarmonyJob {
                    epoch: self.epoch,
                    chroma,
                    now_ms,
                };
                match jobs.try_send(job) {
                    Ok(()) => {
                        self.harmony_pending = true;
                        return;
                    }
                    Err(TrySendError::Full(_)) => {
                        self.stats.harmony_jobs_dropped += 1;
                        debug!("Harmony worker busy, job dropped");
                        return;
                    }
                    Err(TrySendError::Disconnected(job)) => job,
                }
            }
        };

        warn!("Harmony worker unavailable, analysing inline");
        let mut detector = HarmonyDetector::new(self.config.harmony.clone());
        self.latest_harmony = Some(detector.update(&fallback.chroma, fallback.now_ms));
        self.harmony_fresh = true;
        self.harmony = HarmonyRunner::Inline(detector);
        self.harmony_pending = false;
    }

    /// Take the newest current-epoch worker result and report a key change
    /// if the harmony result is new this tick
    fn collect_harmony(&mut self) -> Option<KeyChange> {
        let mut key_change = None;
        if let HarmonyRunner::Worker(worker) = &self.harmony {
            loop {
                match worker.results.try_recv() {
                    Ok(result) if result.epoch == self.epoch => {
                        key_change = result.analysis.key_change.or(key_change);
                        self.latest_harmony = Some(result.analysis);
                        self.harmony_pending = false;
                    }
                    Ok(_) => self.stats.harmony_results_discarded += 1,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        } else if self.harmony_fresh {
            key_change = self.latest_harmony.as_ref().and_then(|h| h.key_change);
        }
        self.harmony_fresh = false;
        key_change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SyntheticConfig, SyntheticSource};
    use crate::config::DriverConfig;

    fn inline_config() -> PipelineConfig {
        PipelineConfig {
            driver: DriverConfig {
                harmony_mode: HarmonyMode::Inline,
                ..DriverConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_first_tick_publishes_context() {
        let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
        let mut source = SyntheticSource::default();
        let frame = source.next_frame();
        let out = pipeline.process(&frame).unwrap();
        assert!(matches!(out.events.first(), Some(PipelineEvent::ContextUpdated(_))));
        assert_eq!(pipeline.context().timestamp_ms, frame.timestamp_ms);
        assert_eq!(pipeline.stats().ticks, 1);
        assert_eq!(pipeline.stats().harmony_jobs, 1);
    }

    #[test]
    fn test_harmony_throttled() {
        let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
        let mut source = SyntheticSource::default();
        // 1024 samples at 44.1 kHz is ~23 ms, so 44 frames span ~1 s
        for frame in source.by_ref().take(44) {
            pipeline.process(&frame).unwrap();
        }
        assert_eq!(pipeline.stats().harmony_jobs, 2);
    }

    #[test]
    fn test_idle_reports_source_lost() {
        let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
        let mut source = SyntheticSource::default();
        let frame = source.next_frame();
        pipeline.process(&frame).unwrap();

        assert!(pipeline.idle(1000).is_ok());
        let err = pipeline.idle(6000).unwrap_err();
        assert!(matches!(err, CoreError::SourceLost { silent_ms: 6000 }));
        assert!(pipeline.process(&source.next_frame()).is_err());

        pipeline.reset_source();
        assert!(pipeline.process(&source.next_frame()).is_ok());
    }

    #[test]
    fn test_reset_handle_applies_before_tick() {
        let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
        let mut source = SyntheticSource::default();
        for frame in source.by_ref().take(100) {
            pipeline.process(&frame).unwrap();
        }
        let handle = pipeline.reset_handle();
        handle.request();
        assert!(handle.is_pending());
        pipeline.process(&source.next_frame()).unwrap();
        assert!(!handle.is_pending());
        assert_eq!(pipeline.stats().source_resets, 1);
        assert_eq!(pipeline.context().rhythm.beat_count, 0);
    }

    #[test]
    fn test_worker_mode_delivers_results() {
        let mut pipeline = AudioPipeline::new(PipelineConfig::default()).unwrap();
        let mut source = SyntheticSource::new(SyntheticConfig {
            level: 0.4,
            ..SyntheticConfig::default()
        });
        let mut got = false;
        for frame in source.by_ref().take(400) {
            let out = pipeline.process(&frame).unwrap();
            if out.context.harmony.is_some() {
                got = true;
                break;
            }
            // Let the worker catch up between ticks
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(got, "no harmony result from worker");
    }
}
