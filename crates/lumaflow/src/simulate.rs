//! Simulated show: synthetic audio through the whole pipeline into a
//! recording DMX output.
//!
//! The tick loop owns the pipeline, director and compositor. Frames go to a
//! separate output task over a bounded channel, and pipeline events are
//! tallied on a blocking task that only observes.

use anyhow::{Context, Result};
use lumaflow_control::{Compositor, Director, DmxFrame, DmxOutput, RecordingOutput};
use lumaflow_core::{
    AudioPipeline, OperatingMode, PipelineEvent, PipelineStats, SectionType, SyntheticSource,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;

/// What the observer saw on the event stream
#[derive(Debug, Default)]
pub struct EventTally {
    pub counts: BTreeMap<&'static str, u64>,
    pub sections: Vec<(u64, SectionType)>,
    pub last_mode: Option<OperatingMode>,
}

impl EventTally {
    fn record(&mut self, event: &PipelineEvent) {
        *self.counts.entry(event.kind()).or_default() += 1;
        match event {
            PipelineEvent::SectionChanged {
                to, timestamp_ms, ..
            } => self.sections.push((*timestamp_ms, *to)),
            PipelineEvent::ModeChanged { to, .. } => self.last_mode = Some(*to),
            _ => {}
        }
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.counts.get(kind).copied().unwrap_or(0)
    }
}

/// Result of a simulated run
#[derive(Debug)]
pub struct RunSummary {
    pub duration_ms: u64,
    pub pipeline: PipelineStats,
    pub events: EventTally,
    pub dropped_events: u64,
    pub effects_triggered: u64,
    pub optics_commits: u64,
    pub universe_sends: u64,
    pub final_bpm: f32,
    pub final_section: SectionType,
    pub final_frame: DmxFrame,
    pub interrupted: bool,
}

/// Run the configured simulation to completion or Ctrl-C
pub async fn run(config: &AppConfig, base_dir: Option<&Path>) -> Result<RunSummary> {
    let sim = &config.simulation;

    let mut pipeline =
        AudioPipeline::new(config.pipeline.clone()).context("Failed to start pipeline")?;
    let events = pipeline.subscribe(1024);
    let observer = tokio::task::spawn_blocking(move || {
        let mut tally = EventTally::default();
        // Ends once the pipeline and its event bus are dropped
        for event in events.iter() {
            tally.record(&event);
        }
        tally
    });

    let fixtures = config.fixtures(base_dir)?;
    let mut compositor = Compositor::new(config.compositor.clone(), fixtures)
        .context("Failed to patch fixtures")?;
    let mut director = Director::new(config.director.clone());
    director.attach(&mut compositor);

    let (frame_tx, mut frame_rx) = mpsc::channel::<DmxFrame>(sim.output_queue.max(1));
    let output_task = tokio::spawn(async move {
        let mut output = RecordingOutput::new();
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = output.send_frame(&frame) {
                warn!("DMX output failed: {}", e);
            }
        }
        output
    });

    let mut source = SyntheticSource::new(sim.synthetic.clone());
    let mut script = sim.script.clone();
    script.sort_by_key(|step| step.at_ms);
    let mut script = script.into_iter().peekable();

    let duration_ms = (sim.duration_secs.max(0.0) * 1000.0) as u64;
    let mut pacing = sim.realtime.then(|| {
        let period = Duration::from_secs_f64(source.frame_period_ms() / 1000.0);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        duration_ms,
        realtime = sim.realtime,
        fixtures = compositor.fixtures().len(),
        "Simulation started"
    );

    let mut interrupted = false;
    let mut last_frame = DmxFrame::new();
    let mut blackout_pending = sim.blackout_at_ms;
    while source.next_timestamp_ms() < duration_ms {
        if let Some(interval) = pacing.as_mut() {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut ctrl_c => {
                    info!("Interrupted");
                    interrupted = true;
                    break;
                }
            }
        }

        let now = source.next_timestamp_ms();
        while let Some(step) = script.next_if(|step| step.at_ms <= now) {
            info!(at_ms = step.at_ms, level = step.level, "Signal level change");
            source.set_level(step.level);
        }
        if blackout_pending.is_some_and(|at| at <= now) {
            blackout_pending = None;
            compositor.blackout(now);
        }

        let tick = pipeline
            .process(&source.next_frame())
            .context("Pipeline tick failed")?;
        director.apply(&tick.context, tick.prediction.as_ref(), &mut compositor);

        let frame = compositor.merge(tick.context.timestamp_ms);
        trace!(
            t = tick.context.timestamp_ms,
            energy = tick.context.energy,
            section = ?tick.context.section.current,
            "Tick"
        );
        last_frame = frame.clone();
        if frame_tx.send(frame).await.is_err() {
            anyhow::bail!("DMX output task stopped");
        }
    }

    let context = pipeline.context();
    let stats = pipeline.stats();
    let dropped_events = pipeline.dropped_events();
    drop(pipeline);
    drop(frame_tx);

    let output = output_task.await.context("Output task panicked")?;
    let events = observer.await.context("Event observer panicked")?;
    debug!(counts = ?events.counts, "Event stream closed");

    Ok(RunSummary {
        duration_ms: context.timestamp_ms,
        pipeline: stats,
        events,
        dropped_events,
        effects_triggered: director.triggered(),
        optics_commits: compositor.optics().commit_count(),
        universe_sends: output.send_count(),
        final_bpm: context.rhythm.bpm,
        final_section: context.section.current,
        final_frame: last_frame,
        interrupted,
    })
}
