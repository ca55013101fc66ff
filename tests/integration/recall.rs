//! Recall duplication, ports, the step sequencer and the mixer

use crate::helpers::tolerances::FLOAT_EPSILON;
use crate::helpers::*;
use approx::assert_relative_eq;
use ostinato::core::{AudioGraph, EffectRegistry, EngineConfig, RecallKind};
use ostinato::prelude::*;
use proptest::prelude::*;

/// The instance `template` got in `root`.
fn instance_of(engine: &OstinatoEngine, template: RecallHandle, root: RecallId) -> RecallHandle {
    engine.with_graph(|g| {
        g.recalls()
            .find(|r| {
                r.template() == Some(template) && r.recall_id() == Some(root) && r.parent().is_none()
            })
            .map(|r| r.handle())
            .expect("instance exists")
    })
}

fn port_value(engine: &OstinatoEngine, recall: RecallHandle, port: &str) -> f64 {
    engine.with_graph(|g| g.recall(recall).unwrap().port(port).unwrap().value())
}

#[test]
fn test_volume_port_reaches_running_instance() {
    let engine = test_engine();
    let audio = engine
        .add_audio(AudioSpec::new("synth").audio_channels(2).input_pads(1))
        .unwrap();
    let input = first_input(&engine, audio);
    engine
        .load_template(input, constant_signal(TEST_BUFFER_SIZE * 8, 0.5), (TEST_BUFFER_SIZE * 8) as u64)
        .unwrap();
    let volume = engine
        .attach(RecallOwner::Channel(input), RecallSpec::volume(0.2))
        .unwrap();
    engine
        .attach(RecallOwner::Channel(input), RecallSpec::playback())
        .unwrap();

    let root = engine.start_playback(audio, SoundScope::Playback).unwrap();
    let instance = instance_of(&engine, volume, root);
    assert_ne!(instance, volume);
    assert_relative_eq!(port_value(&engine, instance, "volume"), 0.2);

    engine.tic().unwrap();
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.1, epsilon = FLOAT_EPSILON);

    engine.set_port(volume, "volume", 1.0).unwrap();
    assert_relative_eq!(port_value(&engine, instance, "volume"), 1.0);
    engine.tic().unwrap();
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.5, epsilon = FLOAT_EPSILON);

    // out of range: rejected, previous value kept
    assert!(engine.set_port(volume, "volume", 7.0).is_err());
    assert_relative_eq!(port_value(&engine, instance, "volume"), 1.0);

    engine.tic().unwrap();
    let changes: Vec<f64> = drain_events(&engine)
        .into_iter()
        .filter_map(|e| match e {
            GraphEvent::ControlChanged { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(changes, vec![1.0]);
}

#[test]
fn test_pattern_drives_notes_on_steps() {
    // 8000 Hz at 120 bpm and a quarter tact: 1000 frames per step, one step every 4 tics
    let engine = test_engine_builder().bpm(120.0).delay_factor(0.25).build().unwrap();
    let drums = engine.add_audio(AudioSpec::new("drums")).unwrap();
    let input = first_input(&engine, drums);
    engine
        .load_template(input, constant_signal(TEST_BUFFER_SIZE, 0.5), TEST_BUFFER_SIZE as u64)
        .unwrap();
    engine
        .attach(RecallOwner::Channel(input), RecallSpec::playback())
        .unwrap();
    let delay = engine
        .attach(RecallOwner::Audio(drums), RecallSpec::delay_counter(120.0, 0.25))
        .unwrap();
    let pattern = engine
        .attach(
            RecallOwner::Audio(drums),
            RecallSpec::pattern(Pattern::from_rows(&["x..."]).unwrap(), delay),
        )
        .unwrap();

    // edits through the shared grid reach the sequence
    engine
        .apply(Task::EditPattern {
            recall: pattern,
            pad: 0,
            step: 2,
            on: true,
        })
        .unwrap();
    let bad = engine.apply(Task::EditPattern {
        recall: delay,
        pad: 0,
        step: 0,
        on: true,
    });
    assert!(bad.is_err());

    let root = engine.start_playback(drums, SoundScope::Sequencer).unwrap();
    engine.run_for(16).unwrap();

    let samples = first_samples(&engine.take_capture());
    assert_eq!(samples.len(), 16);
    for (tic, sample) in samples.iter().enumerate() {
        let expected = if tic == 0 || tic == 8 { 0.5 } else { 0.0 };
        assert_relative_eq!(*sample, expected, epsilon = FLOAT_EPSILON);
    }

    // step 4 ends the sequence; the tree then goes idle and is removed
    engine.run_for(8).unwrap();
    assert_eq!(engine.snapshot().playbacks, 0);
    let events = drain_events(&engine);
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEvent::PlaybackFinished { root: r, .. } if *r == root
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, GraphEvent::RecallDone { .. })));
}

#[test]
fn test_pattern_loop_port_keeps_sequencing() {
    let engine = test_engine();
    let drums = engine.add_audio(AudioSpec::new("drums")).unwrap();
    let input = first_input(&engine, drums);
    engine
        .load_template(input, constant_signal(TEST_BUFFER_SIZE, 0.5), TEST_BUFFER_SIZE as u64)
        .unwrap();
    engine
        .attach(RecallOwner::Channel(input), RecallSpec::playback())
        .unwrap();
    let delay = engine
        .attach(RecallOwner::Audio(drums), RecallSpec::delay_counter(120.0, 0.25))
        .unwrap();
    let pattern = engine
        .attach(
            RecallOwner::Audio(drums),
            RecallSpec::pattern(Pattern::from_rows(&["x."]).unwrap(), delay),
        )
        .unwrap();
    engine.set_port(pattern, "loop", 1.0).unwrap();

    engine.start_playback(drums, SoundScope::Sequencer).unwrap();
    engine.run_for(24).unwrap();
    let samples = first_samples(&engine.take_capture());
    let hits: Vec<usize> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| **s > 0.25)
        .map(|(tic, _)| tic)
        .collect();
    assert_eq!(hits, vec![0, 8, 16]);
    assert_eq!(engine.snapshot().playbacks, 1);
}

#[test]
fn test_mixer_feeds_master_output() {
    let engine = test_engine();
    let synth = engine.add_audio(AudioSpec::new("synth")).unwrap();
    let master = engine
        .add_audio(AudioSpec::new("master").flags(AudioFlags::OUTPUT_HAS_RECYCLING))
        .unwrap();
    let synth_in = first_input(&engine, synth);
    let master_out = first_output(&engine, master);
    engine
        .load_template(synth_in, constant_signal(TEST_BUFFER_SIZE * 2, 0.5), (TEST_BUFFER_SIZE * 2) as u64)
        .unwrap();
    engine
        .link(first_output(&engine, synth), first_input(&engine, master))
        .unwrap();
    let mixer = engine
        .attach(RecallOwner::Channel(synth_in), RecallSpec::mixer(master_out).recall())
        .unwrap();
    engine
        .attach(RecallOwner::Channel(master_out), RecallSpec::playback())
        .unwrap();

    engine.start_playback(master, SoundScope::Playback).unwrap();
    engine.with_graph(|g| {
        let feed = g
            .recalls()
            .filter(|r| r.template() == Some(mixer))
            .find_map(|r| r.kind().as_mixer().and_then(|m| m.feed()))
            .expect("mixer feed");
        let own = g.channel(master_out).unwrap().own_recycling().unwrap();
        let signal = g.signal(feed).unwrap();
        assert!(signal.is_feed());
        assert_eq!(signal.recycling(), own);
    });

    engine.run_for(2).unwrap();
    let samples = first_samples(&engine.take_capture());
    assert_eq!(samples.len(), 2);
    for sample in samples {
        assert_relative_eq!(sample, 0.5, epsilon = FLOAT_EPSILON);
    }
}

#[test]
fn test_cancel_recall_flushes_instance() {
    let engine = test_engine();
    let audio = engine.add_audio(AudioSpec::new("a")).unwrap();
    let input = first_input(&engine, audio);
    engine
        .load_template(input, constant_signal(TEST_BUFFER_SIZE * 8, 0.5), (TEST_BUFFER_SIZE * 8) as u64)
        .unwrap();
    let play = engine
        .attach(RecallOwner::Channel(input), RecallSpec::playback())
        .unwrap();
    let root = engine.start_playback(audio, SoundScope::Playback).unwrap();
    engine.tic().unwrap();
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.5, epsilon = FLOAT_EPSILON);

    // templates cannot be cancelled, instances can
    assert!(engine.apply(Task::CancelRecall(play)).is_err());
    let instance = instance_of(&engine, play, root);
    engine.apply(Task::CancelRecall(instance)).unwrap();
    engine.run_for(3).unwrap();
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.0, epsilon = FLOAT_EPSILON);
    engine.with_graph(|g| assert!(g.recall(instance).is_err()));
}

#[test]
fn test_pattern_recall_kind_is_exposed() {
    let engine = test_engine();
    let drums = engine.add_audio(AudioSpec::new("drums")).unwrap();
    let delay = engine
        .attach(RecallOwner::Audio(drums), RecallSpec::delay_counter(120.0, 0.25))
        .unwrap();
    let pattern = engine
        .attach(
            RecallOwner::Audio(drums),
            RecallSpec::pattern(Pattern::new(1, 16).unwrap(), delay),
        )
        .unwrap();
    engine.with_graph(|g| {
        let recall = g.recall(pattern).unwrap();
        assert!(recall.is_template());
        let RecallKind::PatternSequencer(sequencer) = recall.kind() else {
            panic!("pattern recall expected");
        };
        assert_eq!(sequencer.pattern().read().steps(), 16);
    });
}

fn offline_graph() -> AudioGraph {
    let config = EngineConfig {
        samplerate: TEST_SAMPLERATE,
        buffer_size: TEST_BUFFER_SIZE,
        format: SoundFormat::Float,
        soundcard_channels: 1,
        ..EngineConfig::default()
    };
    AudioGraph::new(config, EffectRegistry::default()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_one_instance_per_template_and_context(
        templates in 1usize..5,
        roots in 1usize..4,
        lookups in prop::collection::vec((0usize..5, 0usize..4), 0..40),
    ) {
        let mut g = offline_graph();
        let audio = g.add_audio(AudioSpec::new("a")).unwrap();
        let input = g.audio(audio).unwrap().inputs()[0];
        let handles: Vec<RecallHandle> = (0..templates)
            .map(|i| {
                g.attach_recall(RecallOwner::Channel(input), RecallSpec::volume(i as f64 * 0.1))
                    .unwrap()
            })
            .collect();
        let contexts: Vec<RecallId> = (0..roots)
            .map(|_| g.start_playback(audio, SoundScope::Notation).unwrap())
            .collect();

        for (t, r) in lookups {
            let template = handles[t % templates];
            let root = contexts[r % roots];
            let first = g.find_or_duplicate(template, root).unwrap();
            let second = g.find_or_duplicate(template, root).unwrap();
            prop_assert_eq!(first, second);
        }

        for template in &handles {
            for root in &contexts {
                let count = g
                    .recalls()
                    .filter(|r| {
                        !r.is_template()
                            && r.parent().is_none()
                            && r.template() == Some(*template)
                            && r.recall_id() == Some(*root)
                    })
                    .count();
                prop_assert_eq!(count, 1);
            }
        }
        prop_assert!(g.check_invariants().is_ok());
    }
}
