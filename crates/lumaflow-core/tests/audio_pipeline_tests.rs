use lumaflow_core::{
    AudioFrame, AudioPipeline, CoreError, DriverConfig, HarmonyMode, OperatingMode,
    PipelineConfig, PipelineEvent, SectionType, SyntheticConfig, SyntheticSource,
};
use std::thread;
use std::time::{Duration, Instant};

fn inline_config() -> PipelineConfig {
    PipelineConfig {
        driver: DriverConfig {
            harmony_mode: HarmonyMode::Inline,
            ..DriverConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn wait_for_condition<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        thread::yield_now();
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_data_flow_with_worker() {
    let mut pipeline = AudioPipeline::new(PipelineConfig::default()).unwrap();
    let mut source = SyntheticSource::new(SyntheticConfig {
        level: 0.4,
        ..SyntheticConfig::default()
    });

    let success = wait_for_condition(Duration::from_secs(5), || {
        let frame = source.next_frame();
        match pipeline.process(&frame) {
            Ok(out) => out.context.harmony.as_ref().map_or(false, |h| h.key.is_some()),
            Err(_) => false,
        }
    });
    assert!(success, "Failed to receive a harmony result from the worker");
}

#[test]
fn test_synthetic_drop_scenario() {
    let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
    let mut source = SyntheticSource::new(SyntheticConfig {
        bpm: 128.0,
        level: 0.2,
        ..SyntheticConfig::default()
    });

    let mut before_jump = None;
    while source.next_timestamp_ms() < 12_000 {
        before_jump = Some(pipeline.process(&source.next_frame()).unwrap());
    }
    let before_jump = before_jump.unwrap();
    assert_eq!(before_jump.context.section.current, SectionType::Intro);
    assert!(
        (before_jump.context.rhythm.bpm - 128.0).abs() < 4.0,
        "bpm {}",
        before_jump.context.rhythm.bpm
    );

    source.set_level(0.95);
    let mut drop_at = None;
    let mut drop_event = false;
    while source.next_timestamp_ms() < 17_000 {
        let out = pipeline.process(&source.next_frame()).unwrap();
        for event in &out.events {
            if let PipelineEvent::SectionChanged { to: SectionType::Drop, .. } = event {
                drop_event = true;
                assert_eq!(out.context.mode, OperatingMode::Intelligent);
            }
        }
        if out.context.section.current == SectionType::Drop && drop_at.is_none() {
            drop_at = Some(out.context.timestamp_ms);
        }
    }

    let drop_at = drop_at.expect("drop never reached");
    assert!(drop_at < 13_000, "drop only at {} ms", drop_at);
    assert!(drop_event);
    // Held for the whole loud passage
    assert_eq!(pipeline.context().section.current, SectionType::Drop);
}

#[test]
fn test_events_reach_subscriber() {
    let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
    let rx = pipeline.subscribe(1024);
    let mut source = SyntheticSource::default();
    for frame in source.by_ref().take(200) {
        pipeline.process(&frame).unwrap();
    }

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    let contexts = events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::ContextUpdated(_)))
        .count();
    assert_eq!(contexts, 200);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::SectionChanged { .. })));
}

#[test]
fn test_source_switch_resets_everything() {
    let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
    let mut source = SyntheticSource::new(SyntheticConfig {
        level: 0.5,
        ..SyntheticConfig::default()
    });
    for frame in source.by_ref().take(600) {
        pipeline.process(&frame).unwrap();
    }
    assert_ne!(pipeline.context().section.current, SectionType::Unknown);
    assert!(pipeline.context().rhythm.beat_count > 0);

    pipeline.reset_source();
    let out = pipeline.process(&source.next_frame()).unwrap();
    assert_eq!(out.context.section.current, SectionType::Unknown);
    assert_eq!(out.context.rhythm.beat_count, 0);
    assert_eq!(out.context.mode, OperatingMode::Reactive);
    assert!(out.context.harmony.as_ref().map_or(true, |h| h.timestamp_ms == out.context.timestamp_ms));
}

#[test]
fn test_silence_limit() {
    let mut pipeline = AudioPipeline::new(PipelineConfig {
        driver: DriverConfig {
            harmony_mode: HarmonyMode::Inline,
            silence_limit_ms: 1000,
            ..DriverConfig::default()
        },
        ..PipelineConfig::default()
    })
    .unwrap();

    pipeline.process(&AudioFrame::new(vec![0.0; 1024], 0, 44_100)).unwrap();
    assert!(pipeline.idle(500).is_ok());
    match pipeline.idle(1500) {
        Err(CoreError::SourceLost { silent_ms }) => assert_eq!(silent_ms, 1500),
        other => panic!("expected source loss, got {:?}", other),
    }
    assert!(pipeline.is_source_lost());
}

#[test]
fn test_garbage_samples_are_no_signal() {
    let mut pipeline = AudioPipeline::new(inline_config()).unwrap();
    let frame = AudioFrame::new(vec![f32::NAN; 1024], 0, 44_100);
    let out = pipeline.process(&frame).unwrap();
    assert!(out.context.energy.is_finite());
    assert!(out.context.confidence.is_finite());
    assert_eq!(out.context.mode, OperatingMode::Reactive);
}
