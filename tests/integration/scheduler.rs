//! Tic ordering, stream exhaustion and the loop thread

use crate::helpers::tolerances::FLOAT_EPSILON;
use crate::helpers::*;
use approx::assert_relative_eq;
use ostinato::prelude::*;
use ostinato::{TicObserver, TicSnapshot};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Engine with one audio that plays `frames` of `value` on its first input.
fn playing_engine(frames: usize, value: f64) -> (OstinatoEngine, AudioId) {
    let engine = test_engine();
    let audio = engine.add_audio(AudioSpec::new("voice")).unwrap();
    let input = first_input(&engine, audio);
    engine
        .load_template(input, constant_signal(frames, value), frames as u64)
        .unwrap();
    engine
        .attach(RecallOwner::Channel(input), RecallSpec::playback())
        .unwrap();
    (engine, audio)
}

#[derive(Default)]
struct TicCounter {
    tics: AtomicU64,
    events: AtomicUsize,
}

impl TicObserver for TicCounter {
    fn on_tic(&self, _snapshot: &TicSnapshot, events: &[GraphEvent]) {
        self.tics.fetch_add(1, Ordering::SeqCst);
        self.events.fetch_add(events.len(), Ordering::SeqCst);
    }
}

#[test]
fn test_signal_exhausts_after_its_chunks() {
    let p = TEST_BUFFER_SIZE;
    for frames in [p - 1, p, 2 * p, 2 * p + 1] {
        let (engine, audio) = playing_engine(frames, 0.5);
        engine.start_playback(audio, SoundScope::Playback).unwrap();

        let mut exhausted_at = None;
        for tic in 1..=4u64 {
            engine.tic().unwrap();
            let exhausted = drain_events(&engine)
                .iter()
                .any(|e| matches!(e, GraphEvent::SignalExhausted { .. }));
            if exhausted {
                exhausted_at = Some(tic);
                break;
            }
        }
        assert_eq!(
            exhausted_at,
            Some(frames.div_ceil(p) as u64),
            "{frames} frames"
        );
    }
}

#[test]
fn test_queued_task_lands_at_next_tic() {
    let engine = test_engine();
    let audio = engine.add_audio(AudioSpec::new("a")).unwrap();
    let input = first_input(&engine, audio);
    let volume = engine
        .attach(RecallOwner::Channel(input), RecallSpec::volume(1.0))
        .unwrap();

    // submit without draining
    let ticket = engine
        .submit(Task::SetPort {
            recall: volume,
            port: "volume".into(),
            value: 0.3,
        })
        .unwrap();
    assert!(ticket.try_result().is_none());
    engine.with_graph(|g| {
        assert_relative_eq!(g.recall(volume).unwrap().port("volume").unwrap().value(), 1.0);
    });

    let snapshot = engine.tic().unwrap();
    assert_eq!(snapshot.tasks.applied, 1);
    assert_eq!(snapshot.tasks.rejected, 0);
    assert!(matches!(ticket.try_result(), Some(Ok(TaskOutcome::Done))));
    engine.with_graph(|g| {
        assert_relative_eq!(g.recall(volume).unwrap().port("volume").unwrap().value(), 0.3);
    });

    // rejected tasks are answered too and counted
    let bad = engine
        .submit(Task::SetPort {
            recall: volume,
            port: "volume".into(),
            value: -1.0,
        })
        .unwrap();
    let snapshot = engine.tic().unwrap();
    assert_eq!(snapshot.tasks.rejected, 1);
    assert!(matches!(bad.try_result(), Some(Err(_))));
}

#[test]
fn test_observer_sees_every_tic() {
    let (engine, audio) = playing_engine(TEST_BUFFER_SIZE * 2, 0.25);
    let counter = Arc::new(TicCounter::default());
    engine.add_observer(counter.clone());

    engine.start_playback(audio, SoundScope::Playback).unwrap();
    let snapshot = engine.run_for(6).unwrap();
    assert_eq!(snapshot.tic, 6);
    assert_eq!(counter.tics.load(Ordering::SeqCst), 6);
    assert!(counter.events.load(Ordering::SeqCst) > 0);
    assert_eq!(snapshot.playbacks, 0);
}

#[test]
fn test_tasks_are_atomic_while_running() {
    let mut engine = test_engine();
    let audio = engine
        .add_audio(AudioSpec::new("pads").audio_channels(2).input_pads(1))
        .unwrap();

    let checks = Arc::new(AtomicU64::new(0));
    let violations = Arc::new(AtomicU64::new(0));
    let launcher = engine.launcher();
    let cyclic = {
        let checks = checks.clone();
        let violations = violations.clone();
        launcher.add_cyclic(move |graph| {
            checks.fetch_add(1, Ordering::SeqCst);
            let consistent = graph.check_invariants().is_ok()
                && graph.audio(audio).is_ok_and(|a| {
                    a.inputs().len() == a.input_pads() * a.audio_channels()
                        && a.outputs().len() == a.output_pads() * a.audio_channels()
                });
            if !consistent {
                violations.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
    };

    engine.start().unwrap();
    assert!(engine.is_running());
    assert!(engine.tic().is_err(), "manual tics are refused while running");

    let submitter = thread::spawn(move || {
        for round in 0..8usize {
            let task = if round % 2 == 0 {
                Task::SetPads {
                    audio,
                    kind: ChannelKind::Input,
                    count: round + 2,
                }
            } else {
                Task::SetAudioChannels {
                    audio,
                    count: round % 3 + 1,
                }
            };
            launcher.submit(task).unwrap().wait().unwrap();
        }
        launcher.remove_cyclic(cyclic)
    });
    let removed = submitter.join().unwrap();
    engine.stop().unwrap();

    assert!(removed);
    assert!(checks.load(Ordering::SeqCst) >= 8);
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    engine.with_graph(|g| {
        let node = g.audio(audio).unwrap();
        assert_eq!(node.input_pads(), 8);
        assert_eq!(node.audio_channels(), 2);
        g.check_invariants().unwrap();
    });
}

#[test]
fn test_loop_thread_start_stop() {
    let (mut engine, audio) = playing_engine(TEST_BUFFER_SIZE * 400, 0.5);
    engine.start_playback(audio, SoundScope::Playback).unwrap();

    engine.start().unwrap();
    assert!(engine.start().is_err());
    thread::sleep(Duration::from_millis(200));
    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert!(engine.stop().is_err());

    let snapshot = engine.snapshot();
    assert!(snapshot.tic >= 3, "only {} tics", snapshot.tic);
    let captured = engine.take_capture();
    assert_eq!(captured.len() as u64, snapshot.tic);
    for sample in first_samples(&captured) {
        assert_relative_eq!(sample, 0.5, epsilon = FLOAT_EPSILON);
    }

    // offline tics resume where the thread stopped
    let next = engine.tic().unwrap();
    assert_eq!(next.tic, snapshot.tic + 1);
}

#[test]
fn test_super_threaded_trees_mix() {
    let engine = test_engine_builder().super_threaded(true).build().unwrap();
    let mut roots = Vec::new();
    for (name, value) in [("low", 0.25), ("high", 0.5)] {
        let audio = engine.add_audio(AudioSpec::new(name)).unwrap();
        let input = first_input(&engine, audio);
        engine
            .load_template(input, constant_signal(TEST_BUFFER_SIZE * 8, value), (TEST_BUFFER_SIZE * 8) as u64)
            .unwrap();
        engine
            .attach(RecallOwner::Channel(input), RecallSpec::playback())
            .unwrap();
        roots.push(engine.start_playback(audio, SoundScope::Playback).unwrap());
    }

    let snapshot = engine.tic().unwrap();
    assert_eq!(snapshot.playbacks, 2);
    assert_eq!(snapshot.stats.runtime_errors, 0);
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.75, epsilon = FLOAT_EPSILON);

    engine.stop_playback(roots[0]).unwrap();
    engine.run_for(3).unwrap();
    assert_relative_eq!(engine.output().sample(0).unwrap(), 0.5, epsilon = FLOAT_EPSILON);
}

#[test]
fn test_tempo_change_reaches_delay_counters() {
    let engine = test_engine();
    let drums = engine.add_audio(AudioSpec::new("drums")).unwrap();
    let delay = engine
        .attach(RecallOwner::Audio(drums), RecallSpec::delay_counter(120.0, 0.25))
        .unwrap();
    let bpm = |engine: &OstinatoEngine| {
        engine.with_graph(|g| g.recall(delay).unwrap().port("bpm").unwrap().value())
    };

    engine.set_bpm(ControlScope::Audio(drums), 90.0).unwrap();
    assert_relative_eq!(bpm(&engine), 90.0);
    assert_relative_eq!(engine.config().bpm, 120.0);

    engine.set_bpm(ControlScope::Global, 140.0).unwrap();
    assert_relative_eq!(bpm(&engine), 140.0);
    assert_relative_eq!(engine.config().bpm, 140.0);

    engine
        .apply(Task::SetTact {
            scope: ControlScope::Global,
            value: 0.5,
        })
        .unwrap();
    assert_relative_eq!(engine.config().delay_factor, 0.5);
}

#[cfg(unix)]
#[test]
fn test_polling_thread_follows_engine() {
    let mut engine = test_engine_builder().polling(1000).build().unwrap();
    assert!(engine.polling().is_some_and(|p| !p.is_running()));

    engine.start().unwrap();
    assert!(engine.polling().is_some_and(|p| p.is_running()));
    thread::sleep(Duration::from_millis(50));
    engine.stop().unwrap();

    let polling = engine.polling().unwrap();
    assert!(!polling.is_running());
    assert!(polling.passes() + polling.omitted() > 0);
}
