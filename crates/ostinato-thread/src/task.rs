//! Graph mutations submitted from outside the audio thread.
//!
//! A [`Task`] is applied with exclusive access to the graph between two tics.
//! Every core operation it calls either commits fully or leaves the graph
//! untouched, so a rejected task has no visible effect.

use crate::Result;
use ostinato_core::{
    AudioGraph, AudioId, ChannelId, ChannelKind, Error as CoreError, RecallHandle, RecallId,
    RecallOwner, RecallSpec, SoundScope,
};
use std::fmt;

/// Which delay counters a tempo change reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlScope {
    /// The engine default and every delay counter.
    Global,
    /// Delay counters attached to one audio.
    Audio(AudioId),
}

impl ControlScope {
    fn audio(self) -> Option<AudioId> {
        match self {
            Self::Global => None,
            Self::Audio(audio) => Some(audio),
        }
    }
}

/// Result of a successfully applied task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Done,
    /// The template created by `AttachRecall`.
    Recall(RecallHandle),
    /// The root context created by `StartPlayback`.
    Playback(RecallId),
}

pub type CustomTask = Box<dyn FnOnce(&mut AudioGraph) -> Result<TaskOutcome> + Send>;

pub enum Task {
    LinkChannel {
        output: ChannelId,
        input: ChannelId,
    },
    UnlinkChannel(ChannelId),
    SetPads {
        audio: AudioId,
        kind: ChannelKind,
        count: usize,
    },
    SetAudioChannels {
        audio: AudioId,
        count: usize,
    },
    CancelRecall(RecallHandle),
    SetBpm {
        scope: ControlScope,
        value: f64,
    },
    SetTact {
        scope: ControlScope,
        value: f64,
    },
    StartPlayback {
        audio: AudioId,
        scope: SoundScope,
    },
    StopPlayback(RecallId),
    /// Write a port through the validating entry point.
    SetPort {
        recall: RecallHandle,
        port: String,
        value: f64,
    },
    AttachRecall {
        owner: RecallOwner,
        spec: RecallSpec,
    },
    /// Set one bit of a pattern sequencer's grid.
    EditPattern {
        recall: RecallHandle,
        pad: usize,
        step: usize,
        on: bool,
    },
    Custom(CustomTask),
}

impl Task {
    pub fn custom<F>(f: F) -> Self
    where
        F: FnOnce(&mut AudioGraph) -> Result<TaskOutcome> + Send + 'static,
    {
        Self::Custom(Box::new(f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LinkChannel { .. } => "link-channel",
            Self::UnlinkChannel(_) => "unlink-channel",
            Self::SetPads { .. } => "set-pads",
            Self::SetAudioChannels { .. } => "set-audio-channels",
            Self::CancelRecall(_) => "cancel-recall",
            Self::SetBpm { .. } => "set-bpm",
            Self::SetTact { .. } => "set-tact",
            Self::StartPlayback { .. } => "start-playback",
            Self::StopPlayback(_) => "stop-playback",
            Self::SetPort { .. } => "set-port",
            Self::AttachRecall { .. } => "attach-recall",
            Self::EditPattern { .. } => "edit-pattern",
            Self::Custom(_) => "custom",
        }
    }

    /// Apply the task to `graph`.
    pub fn apply(self, graph: &mut AudioGraph) -> Result<TaskOutcome> {
        match self {
            Self::LinkChannel { output, input } => graph.link_channel(output, input)?,
            Self::UnlinkChannel(channel) => graph.unlink_channel(channel)?,
            Self::SetPads { audio, kind, count } => graph.set_pads(audio, kind, count)?,
            Self::SetAudioChannels { audio, count } => graph.set_audio_channels(audio, count)?,
            Self::CancelRecall(handle) => graph.cancel_recall(handle)?,
            Self::SetBpm { scope, value } => graph.set_bpm(scope.audio(), value)?,
            Self::SetTact { scope, value } => graph.set_tact(scope.audio(), value)?,
            Self::StartPlayback { audio, scope } => {
                return Ok(TaskOutcome::Playback(graph.start_playback(audio, scope)?));
            }
            Self::StopPlayback(root) => graph.stop_playback(root)?,
            Self::SetPort {
                recall,
                port,
                value,
            } => graph.safe_write_port(recall, &port, value)?,
            Self::AttachRecall { owner, spec } => {
                return Ok(TaskOutcome::Recall(graph.attach_recall(owner, spec)?));
            }
            Self::EditPattern {
                recall,
                pad,
                step,
                on,
            } => {
                let pattern = graph
                    .recall(recall)?
                    .kind()
                    .as_pattern()
                    .map(|p| p.pattern())
                    .ok_or_else(|| {
                        CoreError::InvalidGraph(format!("{recall} is not a pattern sequencer"))
                    })?;
                pattern.write().set(pad, step, on)?;
            }
            Self::Custom(f) => return f(graph),
        }
        Ok(TaskOutcome::Done)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkChannel { output, input } => f
                .debug_struct("LinkChannel")
                .field("output", output)
                .field("input", input)
                .finish(),
            Self::SetPort {
                recall,
                port,
                value,
            } => f
                .debug_struct("SetPort")
                .field("recall", recall)
                .field("port", port)
                .field("value", value)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}
