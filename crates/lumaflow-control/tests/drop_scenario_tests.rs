use lumaflow_control::{
    Compositor, CompositorConfig, Director, DirectorConfig, EffectKind, Fixture, FixtureProfile,
    RecordingOutput, DmxOutput,
};
use lumaflow_core::{
    AudioPipeline, CoreError, DriverConfig, HarmonyMode, OperatingMode, PipelineConfig,
    SectionType, SyntheticConfig, SyntheticSource,
};

const DIMMER: u16 = 1;

struct Rig {
    pipeline: AudioPipeline,
    director: Director,
    compositor: Compositor,
    output: RecordingOutput,
}

impl Rig {
    fn new() -> Self {
        let pipeline = AudioPipeline::new(PipelineConfig {
            driver: DriverConfig {
                harmony_mode: HarmonyMode::Inline,
                ..DriverConfig::default()
            },
            ..PipelineConfig::default()
        })
        .unwrap();
        let mut compositor = Compositor::new(
            CompositorConfig::default(),
            vec![
                Fixture::new(1, "Par".to_string(), FixtureProfile::dimmer_rgb_par(), 0, 1),
                Fixture::new(2, "Spot".to_string(), FixtureProfile::moving_head(), 0, 10),
            ],
        )
        .unwrap();
        let director = Director::new(DirectorConfig::default());
        director.attach(&mut compositor);
        Self {
            pipeline,
            director,
            compositor,
            output: RecordingOutput::new(),
        }
    }

    fn send(&mut self, now_ms: u64) -> u8 {
        let frame = self.compositor.merge(now_ms);
        self.output.send_frame(&frame).unwrap();
        frame.get(0, DIMMER)
    }
}

#[test]
fn test_drop_drives_dimmer_then_returns_to_base() {
    let mut rig = Rig::new();
    let mut source = SyntheticSource::new(SyntheticConfig {
        bpm: 128.0,
        level: 0.2,
        ..SyntheticConfig::default()
    });

    while source.next_timestamp_ms() < 12_000 {
        let out = rig.pipeline.process(&source.next_frame()).unwrap();
        rig.director
            .apply(&out.context, out.prediction.as_ref(), &mut rig.compositor);
        let dimmer = rig.send(out.context.timestamp_ms);
        assert!(dimmer >= 102, "dimmer {} below base", dimmer);
    }
    assert!(!rig.compositor.effects().is_active(EffectKind::DropBurst));

    source.set_level(0.95);
    let mut drop_at = None;
    let mut sustain_frames = 0;
    while source.next_timestamp_ms() < 17_000 {
        let out = rig.pipeline.process(&source.next_frame()).unwrap();
        let now = out.context.timestamp_ms;
        if let Some(change) = out.context.section.changed {
            if change.to == SectionType::Drop && drop_at.is_none() {
                assert_eq!(out.context.mode, OperatingMode::Intelligent);
                drop_at = Some(now);
            }
        }
        rig.director
            .apply(&out.context, out.prediction.as_ref(), &mut rig.compositor);
        let dimmer = rig.send(now);

        if let Some(start) = drop_at {
            if now >= start + 50 && now <= start + 2050 {
                assert_eq!(dimmer, 255, "dimmer {} at {} ms into the drop", dimmer, now - start);
                sustain_frames += 1;
            }
        }
    }
    let drop_at = drop_at.expect("drop never triggered");
    assert!(drop_at < 13_000, "drop only at {} ms", drop_at);
    assert!(sustain_frames > 75, "only {} sustain frames", sustain_frames);

    // Audio stops: the pipeline reports the loss, effects run out
    let mut lost = false;
    let mut t = 17_000;
    while t <= 35_000 {
        match rig.pipeline.idle(t) {
            Ok(()) => {}
            Err(CoreError::SourceLost { .. }) => {
                if !lost {
                    // Whoever owns the session drops forecasts for the dead source
                    rig.director.reset();
                }
                lost = true;
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }
        rig.director.tick(t, &mut rig.compositor);
        rig.send(t);
        t += 23;
    }
    assert!(lost);
    assert!(rig.compositor.effects().is_empty());
    assert_eq!(rig.send(t), 102);
    assert_eq!(rig.output.latest().get(0, DIMMER), 102);
    assert!(rig.output.send_count() > 1000);
}

#[test]
fn test_low_confidence_keeps_section_looks_off() {
    let mut rig = Rig::new();
    // Noise-free silence never reaches intelligent mode
    let mut source = SyntheticSource::new(SyntheticConfig {
        level: 0.0,
        ..SyntheticConfig::default()
    });
    for _ in 0..400 {
        let out = rig.pipeline.process(&source.next_frame()).unwrap();
        assert_eq!(out.context.mode, OperatingMode::Reactive);
        assert!(out.prediction.is_none());
        rig.director
            .apply(&out.context, out.prediction.as_ref(), &mut rig.compositor);
        rig.send(out.context.timestamp_ms);
    }
    assert_eq!(rig.director.scheduled_len(), 0);
    for kind in [EffectKind::DropBurst, EffectKind::IntensityRamp, EffectKind::Breathe] {
        assert!(!rig.compositor.effects().is_active(kind));
    }
    assert!(rig.compositor.optics().commit_log().next().is_none());
}
