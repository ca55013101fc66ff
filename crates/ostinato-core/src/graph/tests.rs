use super::*;
use crate::audio::AudioFlags;
use crate::buffer::SoundFormat;
use crate::recall::{RecallOwner, RecallSpec, RecallState, SoundScope, StageIo};
use crate::soundcard::{MemorySoundcard, Soundcard};
use approx::assert_relative_eq;
use std::time::Duration;

const PERIOD: usize = 64;

fn config() -> EngineConfig {
    EngineConfig {
        buffer_size: PERIOD,
        format: SoundFormat::Float,
        soundcard_channels: 1,
        sub_blocks: 2,
        ..EngineConfig::default()
    }
}

fn graph() -> AudioGraph {
    AudioGraph::new(config(), EffectRegistry::default()).unwrap()
}

fn input(g: &AudioGraph, audio: AudioId) -> ChannelId {
    g.audio(audio).unwrap().inputs()[0]
}

fn output(g: &AudioGraph, audio: AudioId) -> ChannelId {
    g.audio(audio).unwrap().outputs()[0]
}

fn constant(value: f64, frames: usize) -> Stream {
    Stream::from_normalized(SoundFormat::Float, PERIOD, &vec![value; frames])
}

#[test]
fn test_add_audio_builds_grids() {
    let mut g = graph();
    let audio = g
        .add_audio(AudioSpec::new("drums").audio_channels(2).input_pads(3))
        .unwrap();
    let node = g.audio(audio).unwrap();
    assert_eq!(node.inputs().len(), 6);
    assert_eq!(node.outputs().len(), 2);
    g.check_invariants().unwrap();

    // output on audio channel 1 spans the three pads' inputs on that channel
    let out = node.outputs()[1];
    let spans = g.channel_recyclings(out);
    assert_eq!(spans.len(), 3);
    for (pad, recycling) in spans.iter().enumerate() {
        let owner = g.recycling(*recycling).unwrap().channel();
        assert_eq!(g.channel(owner).unwrap().pad(), pad);
        assert_eq!(g.channel(owner).unwrap().audio_channel(), 1);
    }
    assert_eq!(g.recycling(spans[0]).unwrap().next(), Some(spans[1]));
    assert_eq!(g.recycling(spans[2]).unwrap().prev(), Some(spans[1]));

    assert!(matches!(
        g.add_audio(AudioSpec::new("empty").audio_channels(0)),
        Err(Error::InvalidGraph(_))
    ));
}

#[test]
fn test_output_with_own_recycling() {
    let mut g = graph();
    let master = g
        .add_audio(AudioSpec::new("master").flags(AudioFlags::OUTPUT_HAS_RECYCLING))
        .unwrap();
    let out = output(&g, master);
    let own = g.channel(out).unwrap().own_recycling().unwrap();
    assert_eq!(g.channel_recyclings(out).as_slice(), &[own]);
    assert!(g.channel_recyclings(input(&g, master)).is_empty());
}

#[test]
fn test_link_shares_upstream_range() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let b = g.add_audio(AudioSpec::new("b")).unwrap();
    let (a_in, a_out, b_in, b_out) = (input(&g, a), output(&g, a), input(&g, b), output(&g, b));
    let a_rec = g.channel(a_in).unwrap().own_recycling().unwrap();
    let b_rec = g.channel(b_in).unwrap().own_recycling().unwrap();
    g.drain_events();

    g.link_channel(a_out, b_in).unwrap();
    g.check_invariants().unwrap();
    assert_eq!(g.channel(b_in).unwrap().link(), Some(a_out));
    assert_eq!(g.channel_recyclings(b_in).as_slice(), &[a_rec]);
    assert_eq!(g.channel_recyclings(b_out).as_slice(), &[a_rec]);
    assert!(g.recycling(b_rec).is_err(), "unowned recycling is freed");

    let events = g.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEvent::RecyclingChanged { channel, .. } if *channel == b_in
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEvent::RecyclingChanged { channel, .. } if *channel == b_out
    )));
    assert!(matches!(events.last(), Some(GraphEvent::Linked { .. })));

    // linking the same pair again changes nothing
    g.link_channel(a_out, b_in).unwrap();
    assert!(g.drain_events().is_empty());

    g.unlink_channel(b_in).unwrap();
    g.check_invariants().unwrap();
    let restored = g.channel(b_in).unwrap().own_recycling().unwrap();
    assert_ne!(restored, a_rec);
    assert_eq!(g.channel_recyclings(b_out).as_slice(), &[restored]);
    assert!(g
        .drain_events()
        .iter()
        .any(|e| matches!(e, GraphEvent::Unlinked { output, input } if *output == a_out && *input == b_in)));
}

#[test]
fn test_link_rejects_loops_and_conflicts() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let b = g.add_audio(AudioSpec::new("b")).unwrap();
    let c = g.add_audio(AudioSpec::new("c").input_pads(2)).unwrap();
    let (a_in, a_out, b_in, b_out) = (input(&g, a), output(&g, a), input(&g, b), output(&g, b));

    assert!(matches!(
        g.link_channel(a_out, a_in),
        Err(Error::LoopInLink { .. })
    ));
    g.link_channel(a_out, b_in).unwrap();
    assert!(matches!(
        g.link_channel(b_out, a_in),
        Err(Error::LoopInLink { .. })
    ));
    assert!(matches!(
        g.link_channel(a_out, input(&g, c)),
        Err(Error::RecyclingRangeConflict { .. })
    ));
    assert!(matches!(
        g.link_channel(a_in, b_out),
        Err(Error::ChannelKindMismatch(_))
    ));
    assert!(g.feeds(a, b));
    assert!(!g.feeds(b, a));
    g.check_invariants().unwrap();
}

#[test]
fn test_resize_pads_and_audio_channels() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let b = g.add_audio(AudioSpec::new("b")).unwrap();
    g.link_channel(output(&g, a), input(&g, b)).unwrap();

    g.set_pads(b, ChannelKind::Input, 3).unwrap();
    g.check_invariants().unwrap();
    assert_eq!(g.channel_recyclings(output(&g, b)).len(), 3);

    g.set_audio_channels(b, 2).unwrap();
    g.check_invariants().unwrap();
    let node = g.audio(b).unwrap();
    assert_eq!(node.inputs().len(), 6);
    assert_eq!(node.outputs().len(), 2);
    assert_eq!(g.channel(node.inputs()[0]).unwrap().link(), Some(output(&g, a)));

    // back to one pad; pad 0 keeps its link
    g.set_pads(b, ChannelKind::Input, 1).unwrap();
    g.check_invariants().unwrap();
    assert_eq!(g.channel_recyclings(g.audio(b).unwrap().outputs()[0]).len(), 1);

    g.set_audio_channels(b, 1).unwrap();
    // dropping the last input pad takes the link with it
    g.set_pads(b, ChannelKind::Input, 0).unwrap();
    assert_eq!(g.channel(output(&g, a)).unwrap().link(), None);
    g.check_invariants().unwrap();

    assert!(matches!(
        g.set_audio_channels(b, 0),
        Err(Error::InvalidGraph(_))
    ));
    assert!(g
        .drain_events()
        .iter()
        .any(|e| matches!(e, GraphEvent::Resized { audio, input_pads: 0, .. } if *audio == b)));
}

#[test]
fn test_load_template_requires_own_recycling() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    assert!(matches!(
        g.load_template(output(&g, a), constant(0.5, PERIOD), PERIOD as u64),
        Err(Error::InvalidGraph(_))
    ));
    let first = g
        .load_template(input(&g, a), constant(0.5, PERIOD), PERIOD as u64)
        .unwrap();
    let second = g
        .load_template(input(&g, a), constant(0.2, PERIOD), PERIOD as u64)
        .unwrap();
    assert!(g.signal(first).is_none());
    let recycling = g.channel(input(&g, a)).unwrap().own_recycling().unwrap();
    assert_eq!(g.recycling(recycling).unwrap().template(), Some(second));
}

#[test]
fn test_load_template_rejects_interleaved_stream() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a").audio_channels(2)).unwrap();
    let loaded = g
        .load_template(input(&g, a), constant(0.5, PERIOD), PERIOD as u64)
        .unwrap();
    let stereo = Stream::interleaved(SoundFormat::Float, PERIOD, 2);
    assert!(matches!(
        g.load_template(input(&g, a), stereo, PERIOD as u64),
        Err(Error::InvalidGraph(_))
    ));
    let recycling = g.channel(input(&g, a)).unwrap().own_recycling().unwrap();
    assert_eq!(g.recycling(recycling).unwrap().template(), Some(loaded));
}

#[test]
fn test_start_playback_duplicates_once_per_context() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let b = g.add_audio(AudioSpec::new("b")).unwrap();
    g.link_channel(output(&g, a), input(&g, b)).unwrap();
    let nested = g
        .attach_recall(RecallOwner::Channel(input(&g, a)), RecallSpec::volume(1.0).recall())
        .unwrap();
    let root_only = g
        .attach_recall(RecallOwner::Channel(input(&g, b)), RecallSpec::volume(1.0))
        .unwrap();

    let root = g.start_playback(b, SoundScope::Notation).unwrap();
    let ctx = g.context(root).unwrap();
    assert_eq!(ctx.children().len(), 1);
    let child = ctx.children()[0];
    assert_eq!(g.context(child).unwrap().audio(), a);
    assert_eq!(g.context(child).unwrap().parent(), Some(root));

    let in_root: Vec<_> = g.context(root).unwrap().instances().to_vec();
    let in_child: Vec<_> = g.context(child).unwrap().instances().to_vec();
    assert_eq!(in_root.len(), 1);
    assert_eq!(in_child.len(), 1);
    assert_eq!(g.recall(in_root[0]).unwrap().template(), Some(root_only));
    assert_eq!(g.recall(in_child[0]).unwrap().template(), Some(nested));
    assert_eq!(g.recall(in_child[0]).unwrap().recall_id(), Some(child));

    let again = g.start_playback(b, SoundScope::Notation).unwrap();
    assert_ne!(again, root);
    assert_ne!(g.context(again).unwrap().instances(), in_root.as_slice());
    g.check_invariants().unwrap();
}

#[test]
fn test_volume_reaches_soundcard() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let a_in = input(&g, a);
    g.load_template(a_in, constant(0.5, PERIOD * 2), (PERIOD * 2) as u64)
        .unwrap();
    g.attach_recall(RecallOwner::Channel(a_in), RecallSpec::volume(0.5))
        .unwrap();
    g.attach_recall(RecallOwner::Channel(a_in), RecallSpec::playback())
        .unwrap();
    let card = MemorySoundcard::from_config(g.config());

    let root = g.start_playback(a, SoundScope::Playback).unwrap();
    let voices: Vec<_> = g.signals().filter(|s| !s.is_template()).collect();
    assert_eq!(voices.len(), 1);
    assert_eq!(voices[0].recall_id(), Some(root));

    for _ in 0..2 {
        card.begin_period();
        let mut io = StageIo::new(&card, Duration::from_millis(5));
        g.process_tic(&mut io);
        card.commit_period();
        assert!(io.stats.instances_run > 0);
        assert_eq!(io.stats.runtime_errors, 0);
        let out = card.get_buffer();
        assert_relative_eq!(out.sample(0).unwrap(), 0.25, epsilon = 1e-6);
        assert_relative_eq!(out.sample(PERIOD - 1).unwrap(), 0.25, epsilon = 1e-6);
    }

    for _ in 0..4 {
        g.process_tic(&mut StageIo::offline());
    }
    assert!(g.playbacks().is_empty());
    assert!(g.context(root).is_err());
    assert!(g.recalls().all(|r| r.is_template()));
    assert!(g.signals().all(|s| s.is_template()));

    let events = g.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, GraphEvent::SignalExhausted { .. })));
    assert!(matches!(
        events.iter().rev().find(|e| matches!(e, GraphEvent::PlaybackFinished { .. })),
        Some(GraphEvent::PlaybackFinished { root: r, audio }) if *r == root && *audio == a
    ));
}

#[test]
fn test_peak_reads_after_processing() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let a_in = input(&g, a);
    let mut samples = vec![0.8; PERIOD];
    samples.extend(vec![-0.4; PERIOD]);
    g.load_template(
        a_in,
        Stream::from_normalized(SoundFormat::Float, PERIOD, &samples),
        (PERIOD * 2) as u64,
    )
    .unwrap();
    // attached before the volume it measures
    let peak = g
        .attach_recall(RecallOwner::Channel(a_in), RecallSpec::peak())
        .unwrap();
    g.attach_recall(RecallOwner::Channel(a_in), RecallSpec::volume(0.5))
        .unwrap();
    let root = g.start_playback(a, SoundScope::Playback).unwrap();
    let meter = g
        .recalls()
        .find(|r| r.template() == Some(peak) && r.recall_id() == Some(root) && r.parent().is_none())
        .map(|r| r.handle())
        .unwrap();
    let reading = |g: &AudioGraph| g.recall(meter).unwrap().port("peak").unwrap().value();

    g.process_tic(&mut StageIo::offline());
    assert_relative_eq!(reading(&g), 0.4, epsilon = 1e-6);

    // reset every tic, not a running maximum
    g.process_tic(&mut StageIo::offline());
    assert_relative_eq!(reading(&g), 0.2, epsilon = 1e-6);
}

#[test]
fn test_done_instances_stay_for_one_pass() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let a_in = input(&g, a);
    g.load_template(a_in, constant(0.5, PERIOD), PERIOD as u64)
        .unwrap();
    g.attach_recall(RecallOwner::Channel(a_in), RecallSpec::volume(1.0))
        .unwrap();
    g.start_playback(a, SoundScope::Playback).unwrap();

    g.process_tic(&mut StageIo::offline());
    let done: Vec<_> = g
        .recalls()
        .filter(|r| r.state() == RecallState::Done)
        .map(|r| r.handle())
        .collect();
    assert_eq!(done.len(), 1, "signal-level instance of the exhausted voice");

    g.begin_tic();
    for handle in done {
        assert!(g.recall(handle).is_err());
    }
}

#[test]
fn test_link_migrates_recycling_children() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let b = g.add_audio(AudioSpec::new("b")).unwrap();
    let b_in = input(&g, b);
    g.attach_recall(RecallOwner::Channel(b_in), RecallSpec::volume(1.0))
        .unwrap();
    let root = g.start_playback(b, SoundScope::Notation).unwrap();
    let instance = g.context(root).unwrap().instances()[0];
    let own = g.channel(b_in).unwrap().own_recycling().unwrap();
    let child = g.recall(instance).unwrap().children()[0];
    assert_eq!(g.recall(child).unwrap().owner(), RecallOwner::Recycling(own));

    g.link_channel(output(&g, a), b_in).unwrap();
    let upstream = g.channel(input(&g, a)).unwrap().own_recycling().unwrap();
    let children = g.recall(instance).unwrap().children().to_vec();
    assert_eq!(children.len(), 1);
    assert!(g.recall(child).is_err());
    assert_eq!(
        g.recall(children[0]).unwrap().owner(),
        RecallOwner::Recycling(upstream)
    );
    g.check_invariants().unwrap();
}

#[test]
fn test_start_note_rejects_late_attack() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let a_in = input(&g, a);
    g.load_template(a_in, constant(0.5, PERIOD), PERIOD as u64)
        .unwrap();
    let root = g.start_playback(a, SoundScope::Notation).unwrap();
    assert!(matches!(
        g.start_note(root, a_in, PERIOD),
        Err(Error::InvalidGraph(_))
    ));
    let voices = g.start_note(root, a_in, 10).unwrap();
    assert_eq!(voices.len(), 1);
    assert_eq!(g.signal(voices[0]).unwrap().attack(), 10);
}

#[test]
fn test_cancel_recall_rejects_templates() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let template = g
        .attach_recall(RecallOwner::Channel(input(&g, a)), RecallSpec::volume(1.0))
        .unwrap();
    assert!(matches!(
        g.cancel_recall(template),
        Err(Error::InvalidGraph(_))
    ));
    assert!(!g.recall_done(template));
}

#[test]
fn test_busy_sub_block_is_skipped() {
    let mut g = graph();
    let a = g.add_audio(AudioSpec::new("a")).unwrap();
    let a_in = input(&g, a);
    g.load_template(a_in, constant(0.5, PERIOD * 4), (PERIOD * 4) as u64)
        .unwrap();
    g.attach_recall(RecallOwner::Channel(a_in), RecallSpec::playback())
        .unwrap();
    g.start_playback(a, SoundScope::Playback).unwrap();

    let card = MemorySoundcard::from_config(g.config());
    card.begin_period();
    let held = card.lock_sub_block(0).unwrap();
    let mut io = StageIo::new(&card, Duration::from_micros(200));
    g.process_tic(&mut io);
    drop(held);
    card.commit_period();

    assert_eq!(io.stats.missed_sub_blocks, 1);
    let out = card.get_buffer();
    assert_eq!(out.sample(0).unwrap(), 0.0);
    assert_relative_eq!(out.sample(PERIOD - 1).unwrap(), 0.5, epsilon = 1e-6);
    let missed: u64 = g
        .recalls()
        .filter_map(|r| r.kind().as_playback())
        .map(|p| p.missed_sub_blocks())
        .sum();
    assert_eq!(missed, 1);
}
