//! Audio signals: chunk streams owned by a recycling.
//!
//! A template signal is a prototype (a sample, a recorded take) and is never
//! advanced. Instances are duplicated from a template when a voice starts and
//! move their cursor one chunk per tic until the stream runs out.

use crate::buffer::{Buffer, SoundFormat, Stream};
use crate::handle::{AudioSignalId, RecallId, RecyclingId};
use crate::{Error, Result};

/// Outcome of advancing an instance cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Playing,
    /// The cursor wrapped back to the loop start.
    Looped,
    /// The cursor ran off the end; the signal is done.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalRole {
    Template,
    Voice,
    /// Accumulates mixed input; grows as it is read and never exhausts.
    Feed,
}

#[derive(Debug, Clone)]
pub struct AudioSignal {
    pub(crate) id: AudioSignalId,
    pub(crate) recycling: RecyclingId,
    pub(crate) recall_id: Option<RecallId>,
    role: SignalRole,
    stream: Stream,
    current: Option<usize>,
    exhausted: bool,
    samplerate: u32,
    frame_count: u64,
    attack: usize,
    /// Tic at which the signal started, keeps recyclings time-ordered.
    pub(crate) start_tic: u64,
    loop_start: u64,
    loop_end: u64,
}

impl AudioSignal {
    pub(crate) fn template(
        id: AudioSignalId,
        recycling: RecyclingId,
        stream: Stream,
        frame_count: u64,
        samplerate: u32,
    ) -> Self {
        Self {
            id,
            recycling,
            recall_id: None,
            role: SignalRole::Template,
            stream,
            current: None,
            exhausted: false,
            samplerate,
            frame_count,
            attack: 0,
            start_tic: 0,
            loop_start: 0,
            loop_end: 0,
        }
    }

    /// Duplicate a voice from `template`, starting `attack` frames into the
    /// first chunk.
    pub(crate) fn voice(
        id: AudioSignalId,
        template: &AudioSignal,
        recall_id: RecallId,
        attack: usize,
        start_tic: u64,
    ) -> Result<Self> {
        let mut signal = Self {
            id,
            recycling: template.recycling,
            recall_id: Some(recall_id),
            role: SignalRole::Voice,
            stream: Stream::new(template.format(), template.buffer_size()),
            current: None,
            exhausted: false,
            samplerate: template.samplerate,
            frame_count: template.frame_count,
            attack,
            start_tic,
            loop_start: template.loop_start,
            loop_end: template.loop_end,
        };
        signal.duplicate_stream(template, attack)?;
        signal.current = if signal.stream.is_empty() {
            None
        } else {
            Some(0)
        };
        signal.exhausted = signal.current.is_none();
        Ok(signal)
    }

    pub(crate) fn feed(
        id: AudioSignalId,
        recycling: RecyclingId,
        recall_id: RecallId,
        format: SoundFormat,
        buffer_size: usize,
        samplerate: u32,
        start_tic: u64,
    ) -> Self {
        let mut stream = Stream::new(format, buffer_size);
        stream.resize(2);
        Self {
            id,
            recycling,
            recall_id: Some(recall_id),
            role: SignalRole::Feed,
            stream,
            current: Some(0),
            exhausted: false,
            samplerate,
            frame_count: 0,
            attack: 0,
            start_tic,
            loop_start: 0,
            loop_end: 0,
        }
    }

    pub fn id(&self) -> AudioSignalId {
        self.id
    }

    pub fn recycling(&self) -> RecyclingId {
        self.recycling
    }

    /// Owning playback context, `None` for templates.
    pub fn recall_id(&self) -> Option<RecallId> {
        self.recall_id
    }

    pub fn is_template(&self) -> bool {
        self.role == SignalRole::Template
    }

    pub fn is_feed(&self) -> bool {
        self.role == SignalRole::Feed
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    pub fn format(&self) -> SoundFormat {
        self.stream.format()
    }

    pub fn buffer_size(&self) -> usize {
        self.stream.buffer_size()
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn attack(&self) -> usize {
        self.attack
    }

    /// Index of the chunk played this tic.
    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_chunk(&self) -> Option<&Buffer> {
        self.current.and_then(|i| self.stream.chunk(i))
    }

    pub fn current_chunk_mut(&mut self) -> Option<&mut Buffer> {
        match self.current {
            Some(i) => self.stream.chunk_mut(i),
            None => None,
        }
    }

    /// Arm a loop region in frames; `end <= start` disarms it.
    pub fn set_loop(&mut self, start: u64, end: u64) {
        self.loop_start = start;
        self.loop_end = end;
    }

    pub fn loop_region(&self) -> Option<(u64, u64)> {
        (self.loop_end > self.loop_start).then_some((self.loop_start, self.loop_end))
    }

    /// Append one silent chunk.
    pub fn add_stream(&mut self) {
        self.stream.push_zeroed();
    }

    /// Grow or truncate to `len` chunks.
    pub fn stream_resize(&mut self, len: usize) {
        self.stream.resize(len);
        if let Some(current) = self.current {
            if current >= len {
                self.current = None;
                self.exhausted = !self.is_template();
            }
        }
    }

    /// Like [`stream_resize`](Self::stream_resize) but never truncates the
    /// chunk under the cursor or anything before it.
    pub fn stream_safe_resize(&mut self, len: usize) {
        let floor = self.current.map_or(0, |c| c + 1);
        self.stream.resize(len.max(floor));
    }

    /// Chunks already played.
    pub fn length_till_current(&self) -> usize {
        match self.current {
            Some(current) => current,
            None if self.exhausted => self.stream.len(),
            None => 0,
        }
    }

    /// Mix the template's stream into this signal starting `attack` frames in.
    ///
    /// The stream ends up exactly `ceil((attack + frame_count) / buffer_size)`
    /// chunks long.
    pub fn duplicate_stream(&mut self, template: &AudioSignal, attack: usize) -> Result<()> {
        let buffer_size = self.buffer_size();
        if template.buffer_size() != buffer_size {
            return Err(Error::InvalidGraph(format!(
                "template period {} differs from signal period {}",
                template.buffer_size(),
                buffer_size
            )));
        }
        for (index, chunk) in template.stream.chunks().iter().enumerate() {
            self.stream
                .copy_with_attack(index, 1, chunk, 1, attack, buffer_size)?;
        }
        let frames = attack as u64 + template.frame_count;
        self.stream
            .resize(frames.div_ceil(buffer_size as u64) as usize);
        Ok(())
    }

    /// Re-chunk into a new period size.
    pub fn realloc_buffer_size(&mut self, buffer_size: usize) -> Result<()> {
        let frames = match self.role {
            SignalRole::Feed => self.stream.len() as u64 * self.buffer_size() as u64,
            _ => self.attack as u64 + self.frame_count,
        };
        let played = self.current.map(|c| c as u64 * self.buffer_size() as u64);
        self.stream.realloc_buffer_size(buffer_size, frames as usize)?;
        if let Some(played) = played {
            self.current = Some((played / buffer_size as u64) as usize);
        }
        Ok(())
    }

    /// Move the cursor one chunk forward.
    pub fn advance(&mut self) -> StreamState {
        let Some(current) = self.current else {
            return if self.exhausted {
                StreamState::Exhausted
            } else {
                StreamState::Playing
            };
        };
        match self.role {
            SignalRole::Template => StreamState::Playing,
            SignalRole::Feed => {
                // the chunk after the cursor may already hold wrapped attack tails
                self.stream.drop_front(current + 1);
                if self.stream.len() < 2 {
                    self.stream.resize(2);
                }
                self.current = Some(0);
                StreamState::Playing
            }
            SignalRole::Voice => {
                let buffer_size = self.buffer_size() as u64;
                if let Some((start, end)) = self.loop_region() {
                    if (current as u64 + 1) * buffer_size >= end {
                        self.current = Some((start / buffer_size) as usize);
                        return StreamState::Looped;
                    }
                }
                if current + 1 >= self.stream.len() {
                    self.current = None;
                    self.exhausted = true;
                    StreamState::Exhausted
                } else {
                    self.current = Some(current + 1);
                    StreamState::Playing
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: usize = 64;

    fn template(frames: usize) -> AudioSignal {
        let samples: Vec<f64> = (0..frames).map(|i| ((i % 50) as f64) / 100.0).collect();
        AudioSignal::template(
            AudioSignalId(1),
            RecyclingId(2),
            Stream::from_normalized(SoundFormat::S16, P, &samples),
            frames as u64,
            48000,
        )
    }

    fn ticks_until_exhausted(signal: &mut AudioSignal) -> usize {
        let mut tics = 0;
        loop {
            tics += 1;
            if signal.advance() == StreamState::Exhausted {
                return tics;
            }
            assert!(tics < 10_000);
        }
    }

    #[test]
    fn test_exhaustion_exact_multiple() {
        let t = template(4 * P);
        let mut voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 0, 0).unwrap();
        assert_eq!(ticks_until_exhausted(&mut voice), 4);
        assert!(voice.is_exhausted());
    }

    #[test]
    fn test_exhaustion_one_short_of_period() {
        let t = template(P - 1);
        let mut voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 0, 0).unwrap();
        assert_eq!(ticks_until_exhausted(&mut voice), 1);
    }

    #[test]
    fn test_attack_extends_stream_only_when_needed() {
        let t = template(2 * P);
        let voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 10, 0).unwrap();
        assert_eq!(voice.stream().len(), 3);

        let t = template(2 * P - 20);
        let voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 10, 0).unwrap();
        assert_eq!(voice.stream().len(), 2);
    }

    #[test]
    fn test_attack_shifts_content() {
        let t = template(P);
        let voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 5, 0).unwrap();
        let chunk = voice.stream().chunk(0).unwrap();
        assert_eq!(chunk.sample(0), Some(0.0));
        assert_eq!(chunk.sample(5), t.stream().chunk(0).unwrap().sample(0));
        assert_eq!(chunk.sample(6), t.stream().chunk(0).unwrap().sample(1));
    }

    #[test]
    fn test_template_never_advances() {
        let mut t = template(P);
        assert_eq!(t.advance(), StreamState::Playing);
        assert_eq!(t.current(), None);
        assert!(!t.is_exhausted());
    }

    #[test]
    fn test_loop_region_wraps_instead_of_exhausting() {
        let mut t = template(4 * P);
        t.set_loop(P as u64, 3 * P as u64);
        let mut voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 0, 0).unwrap();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(voice.current().unwrap());
            assert_ne!(voice.advance(), StreamState::Exhausted);
        }
        assert_eq!(seen, vec![0, 1, 2, 1, 2, 1]);
    }

    #[test]
    fn test_feed_never_exhausts() {
        let mut feed = AudioSignal::feed(
            AudioSignalId(4),
            RecyclingId(2),
            RecallId(9),
            SoundFormat::Float,
            P,
            48000,
            0,
        );
        for _ in 0..100 {
            assert_eq!(feed.advance(), StreamState::Playing);
        }
        assert_eq!(feed.stream().len(), 2);
        assert!(feed.current_chunk().unwrap().is_silent());
    }

    #[test]
    fn test_safe_resize_keeps_cursor_chunk() {
        let t = template(4 * P);
        let mut voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 0, 0).unwrap();
        voice.advance();
        voice.advance();
        voice.stream_safe_resize(1);
        assert_eq!(voice.stream().len(), 3);
        assert_eq!(voice.length_till_current(), 2);

        voice.stream_resize(1);
        assert!(voice.is_exhausted());
    }

    #[test]
    fn test_realloc_buffer_size_moves_cursor() {
        let t = template(4 * P);
        let mut voice = AudioSignal::voice(AudioSignalId(3), &t, RecallId(9), 0, 0).unwrap();
        voice.advance();
        voice.realloc_buffer_size(P / 2).unwrap();
        assert_eq!(voice.buffer_size(), P / 2);
        assert_eq!(voice.stream().len(), 8);
        assert_eq!(voice.current(), Some(2));
    }
}
