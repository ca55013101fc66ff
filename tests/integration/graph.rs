//! Graph mutation through the task queue

use crate::helpers::*;
use ostinato::core::{AudioGraph, Error as CoreError, RecyclingId};
use ostinato::prelude::*;

/// Every recall owner that is still referenced exists.
fn owners_exist(graph: &AudioGraph) -> bool {
    graph.recalls().all(|r| match r.owner() {
        RecallOwner::Audio(id) => graph.audio(id).is_ok(),
        RecallOwner::Channel(id) => graph.channel(id).is_ok(),
        RecallOwner::Recycling(id) => graph.recycling(id).is_ok(),
        RecallOwner::AudioSignal(id) => graph.signal(id).is_some(),
    })
}

/// Link and recycling range of every channel.
fn link_table(engine: &OstinatoEngine) -> Vec<(ChannelId, Option<ChannelId>, Vec<RecyclingId>)> {
    engine.with_graph(|g| {
        g.audios()
            .flat_map(|node| node.inputs().iter().chain(node.outputs()).copied())
            .map(|ch| (ch, g.channel(ch).unwrap().link(), g.channel_recyclings(ch).to_vec()))
            .collect()
    })
}

fn recyclings_of(engine: &OstinatoEngine, channel: ChannelId) -> Vec<RecyclingId> {
    engine.with_graph(|g| g.channel_recyclings(channel).to_vec())
}

#[test]
fn test_link_through_task_shares_range() {
    let engine = test_engine();
    let synth = engine.add_audio(AudioSpec::new("synth")).unwrap();
    let mixer = engine
        .add_audio(AudioSpec::new("mixer").input_pads(2))
        .unwrap();

    let synth_in = first_input(&engine, synth);
    let synth_out = first_output(&engine, synth);
    let mixer_in = first_input(&engine, mixer);
    let mixer_out = first_output(&engine, mixer);

    let upstream = recyclings_of(&engine, synth_in);
    assert_eq!(upstream.len(), 1);
    assert_eq!(recyclings_of(&engine, mixer_out).len(), 2);

    engine.link(synth_out, mixer_in).unwrap();
    assert_eq!(recyclings_of(&engine, mixer_in), upstream);

    // the mixer output chain now starts at the synth's recycling
    let chain = recyclings_of(&engine, mixer_out);
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0], upstream[0]);

    let events = drain_events(&engine);
    assert!(events.is_empty(), "events are delivered per tic");
    engine.tic().unwrap();
    let events = drain_events(&engine);
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEvent::Linked { output, input } if *output == synth_out && *input == mixer_in
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        GraphEvent::RecyclingChanged { channel, .. } if *channel == mixer_in
    )));

    engine
        .apply(Task::UnlinkChannel(mixer_in))
        .unwrap();
    engine.with_graph(|g| {
        assert!(g.channel(mixer_in).unwrap().link().is_none());
        assert!(g.channel(synth_out).unwrap().link().is_none());
        g.check_invariants().unwrap();
    });
    assert_ne!(recyclings_of(&engine, mixer_in), upstream);
}

#[test]
fn test_rejected_link_leaves_graph_untouched() {
    let engine = test_engine();
    let a = engine.add_audio(AudioSpec::new("a")).unwrap();
    let b = engine.add_audio(AudioSpec::new("b")).unwrap();
    let c = engine.add_audio(AudioSpec::new("c")).unwrap();

    engine
        .link(first_output(&engine, a), first_input(&engine, b))
        .unwrap();

    let before = link_table(&engine);

    // b feeds nothing upstream of a, so b -> a closes a loop
    let looped = engine.link(first_output(&engine, b), first_input(&engine, a));
    assert!(matches!(
        looped.as_ref().map_err(|e| e.core()),
        Err(Some(CoreError::LoopInLink { .. }))
    ));

    // a's output is taken
    let taken = engine.link(first_output(&engine, a), first_input(&engine, c));
    assert!(matches!(
        taken.as_ref().map_err(|e| e.core()),
        Err(Some(CoreError::RecyclingRangeConflict { .. }))
    ));

    // wrong direction
    let reversed = engine.link(first_input(&engine, c), first_output(&engine, c));
    assert!(matches!(
        reversed.as_ref().map_err(|e| e.core()),
        Err(Some(CoreError::ChannelKindMismatch(_)))
    ));

    let after = link_table(&engine);
    assert_eq!(before.len(), after.len());
    for entry in &before {
        assert!(after.contains(entry), "{entry:?} changed");
    }
    engine.with_graph(|g| g.check_invariants().unwrap());
}

#[test]
fn test_link_migrates_running_instances() {
    let engine = test_engine();
    let a = engine.add_audio(AudioSpec::new("a")).unwrap();
    let b = engine.add_audio(AudioSpec::new("b")).unwrap();
    let b_in = first_input(&engine, b);
    let volume = engine
        .attach(RecallOwner::Channel(b_in), RecallSpec::volume(1.0))
        .unwrap();
    engine.start_playback(b, SoundScope::Notation).unwrap();

    let own = recyclings_of(&engine, b_in)[0];
    engine.link(first_output(&engine, a), b_in).unwrap();
    let upstream = recyclings_of(&engine, first_input(&engine, a))[0];

    engine.with_graph(|g| {
        assert!(g.recycling(own).is_err(), "released recycling is freed");
        let instance = g
            .recalls()
            .find(|r| r.template() == Some(volume))
            .expect("volume instance");
        let owners: Vec<_> = instance
            .children()
            .iter()
            .map(|c| g.recall(*c).unwrap().owner())
            .collect();
        assert_eq!(owners, vec![RecallOwner::Recycling(upstream)]);
        assert!(owners_exist(g));
        g.check_invariants().unwrap();
    });
}

#[test]
fn test_resize_during_playback() {
    let engine = test_engine();
    let audio = engine
        .add_audio(AudioSpec::new("pads").audio_channels(2).input_pads(2))
        .unwrap();
    let inputs = engine.with_graph(|g| g.audio(audio).unwrap().inputs().to_vec());
    assert_eq!(inputs.len(), 4);
    for input in &inputs {
        engine
            .attach(RecallOwner::Channel(*input), RecallSpec::volume(1.0))
            .unwrap();
    }
    engine.start_playback(audio, SoundScope::Notation).unwrap();

    engine
        .apply(Task::SetPads {
            audio,
            kind: ChannelKind::Input,
            count: 3,
        })
        .unwrap();
    engine.with_graph(|g| {
        assert_eq!(g.audio(audio).unwrap().inputs().len(), 6);
        assert_eq!(g.channel_recyclings(g.audio(audio).unwrap().outputs()[0]).len(), 3);
        g.check_invariants().unwrap();
    });

    engine
        .apply(Task::SetAudioChannels { audio, count: 1 })
        .unwrap();
    engine.with_graph(|g| {
        let node = g.audio(audio).unwrap();
        assert_eq!(node.audio_channels(), 1);
        assert_eq!(node.inputs().len(), 3);
        assert_eq!(node.outputs().len(), 1);
        for removed in inputs.iter().filter(|c| g.channel(**c).is_err()) {
            assert!(g
                .recalls()
                .all(|r| r.owner() != RecallOwner::Channel(*removed)));
        }
        assert!(owners_exist(g));
        g.check_invariants().unwrap();
    });

    engine.run_for(2).unwrap();
    let resized = drain_events(&engine)
        .into_iter()
        .filter(|e| matches!(e, GraphEvent::Resized { .. }))
        .count();
    assert_eq!(resized, 2);
}

#[test]
fn test_unknown_audio_is_rejected() {
    let engine = test_engine();
    let result = engine.apply(Task::SetAudioChannels {
        audio: AudioId(999),
        count: 2,
    });
    assert!(matches!(
        result.as_ref().map_err(|e| e.core()),
        Err(Some(CoreError::UnknownAudio(_)))
    ));
}
