//! Audio transport engine
//!
//! Owns the audio thread. The controller talks to it through two channels:
//! a command channel for transport state (start/stop/quit) and a lock-free
//! [`ArcSwapOption`] slot holding the current compiled pattern. Evaluate
//! hot-swaps the slot without touching the transport clock, so a running
//! performance never hiccups on re-eval.
//!
//! The scheduler half is plain data and runs anywhere, which is how the
//! tests exercise scheduling without an output device.

use crate::sample_bank::{SampleBank, StereoSample};
use crate::transpiler::CompiledPattern;
use arc_swap::ArcSwapOption;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Emitted when the scheduler fires a sample, for shells that observe
/// triggers (highlighting, visualizers).
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEvent {
    pub sound: String,
    pub index: usize,
    /// Cycle time of the onset.
    pub cycle: f64,
}

enum EngineCommand {
    Start,
    Stop,
    Quit,
}

/// One playing sample. Adapted round-robin voice with stealing when the
/// pool is exhausted.
struct Voice {
    sample: Arc<StereoSample>,
    position: f32,
    speed: f32,
    gain: f32,
    pan: f32,
    /// Frames to wait before the onset lands inside the current block.
    delay: usize,
    active: bool,
    age: usize,
}

impl Voice {
    fn idle() -> Self {
        Self {
            sample: Arc::new(StereoSample::mono(Vec::new())),
            position: 0.0,
            speed: 1.0,
            gain: 1.0,
            pan: 0.0,
            delay: 0,
            active: false,
            age: 0,
        }
    }

    fn trigger(&mut self, sample: Arc<StereoSample>, gain: f32, pan: f32, speed: f32, delay: usize) {
        self.sample = sample;
        self.position = 0.0;
        self.speed = speed.max(0.01);
        self.gain = gain;
        self.pan = pan.clamp(-1.0, 1.0);
        self.delay = delay;
        self.active = true;
        self.age = 0;
    }

    /// Produce one stereo frame.
    fn process(&mut self) -> (f32, f32) {
        if !self.active {
            return (0.0, 0.0);
        }
        if self.delay > 0 {
            self.delay -= 1;
            return (0.0, 0.0);
        }
        if self.position >= self.sample.len() as f32 {
            self.active = false;
            return (0.0, 0.0);
        }
        let (l, r) = self.sample.frame_at(self.position);
        self.position += self.speed;
        self.age += 1;

        // Constant-power pan.
        let angle = (self.pan + 1.0) * std::f32::consts::FRAC_PI_4;
        (l * self.gain * angle.cos(), r * self.gain * angle.sin())
    }
}

/// Queries the active pattern block by block and mixes triggered voices.
pub struct PatternScheduler {
    sample_rate: f32,
    cps: f64,
    cycle_pos: f64,
    playing: bool,
    voices: Vec<Voice>,
    next_voice: usize,
    bank: Arc<RwLock<SampleBank>>,
    trigger_tx: Option<Sender<TriggerEvent>>,
}

impl PatternScheduler {
    pub fn new(sample_rate: f32, cps: f64, max_voices: usize, bank: Arc<RwLock<SampleBank>>) -> Self {
        Self {
            sample_rate,
            cps,
            cycle_pos: 0.0,
            playing: false,
            voices: (0..max_voices.max(1)).map(|_| Voice::idle()).collect(),
            next_voice: 0,
            bank,
            trigger_tx: None,
        }
    }

    pub fn with_trigger_sink(mut self, tx: Sender<TriggerEvent>) -> Self {
        self.trigger_tx = Some(tx);
        self
    }

    /// Start from cycle zero. Swapping patterns mid-flight does NOT come
    /// through here; the clock only resets on a fresh start.
    pub fn start(&mut self) {
        self.cycle_pos = 0.0;
        self.playing = true;
    }

    /// Stop and silence immediately: voices are cut, not run out.
    pub fn stop(&mut self) {
        self.playing = false;
        for voice in &mut self.voices {
            voice.active = false;
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn cycle_pos(&self) -> f64 {
        self.cycle_pos
    }

    fn allocate_voice(&mut self) -> usize {
        let n = self.voices.len();
        for i in 0..n {
            let idx = (self.next_voice + i) % n;
            if !self.voices[idx].active {
                self.next_voice = (idx + 1) % n;
                return idx;
            }
        }
        // Steal the oldest.
        let mut oldest = 0;
        for (idx, voice) in self.voices.iter().enumerate() {
            if voice.age > self.voices[oldest].age {
                oldest = idx;
            }
        }
        oldest
    }

    /// Render one interleaved block. `out` is zeroed first; frames =
    /// `out.len() / channels`.
    pub fn process_block(
        &mut self,
        pattern: Option<&CompiledPattern>,
        out: &mut [f32],
        channels: usize,
    ) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = out.len() / channels;
        if frames == 0 {
            return;
        }

        if self.playing {
            if let Some(pattern) = pattern {
                let begin = self.cycle_pos;
                let end = begin + frames as f64 * self.cps / self.sample_rate as f64;
                for hap in pattern.events.onsets_in(begin, end) {
                    let onset = hap.part.begin.to_float();
                    let delay =
                        (((onset - begin) / self.cps) * self.sample_rate as f64).max(0.0) as usize;
                    let ev = &hap.value;
                    let sample = {
                        // Never block the audio thread on the bank lock; the
                        // bank is read-mostly after bootstrap.
                        match self.bank.try_read() {
                            Ok(bank) => bank.get(&ev.sound, ev.index),
                            Err(_) => None,
                        }
                    };
                    let Some(sample) = sample else {
                        debug!(sound = %ev.sound, "no sample for event");
                        continue;
                    };
                    let idx = self.allocate_voice();
                    self.voices[idx].trigger(sample, ev.gain, ev.pan, ev.speed, delay);
                    if let Some(tx) = &self.trigger_tx {
                        let _ = tx.send(TriggerEvent {
                            sound: ev.sound.clone(),
                            index: ev.index,
                            cycle: onset,
                        });
                    }
                }
                self.cycle_pos = end;
            }
        }

        for frame in 0..frames {
            let mut left = 0.0;
            let mut right = 0.0;
            for voice in &mut self.voices {
                let (l, r) = voice.process();
                left += l;
                right += r;
            }
            let base = frame * channels;
            if channels == 1 {
                out[base] = (left + right) * 0.5;
            } else {
                out[base] = left;
                out[base + 1] = right;
            }
        }
    }
}

/// Handle to the audio thread. Dropping it shuts the transport down, so a
/// dropped controller can never leave orphaned audio running.
pub struct AudioEngine {
    command_tx: Sender<EngineCommand>,
    slot: Arc<ArcSwapOption<CompiledPattern>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioEngine {
    pub fn spawn(
        cps: f64,
        max_voices: usize,
        bank: Arc<RwLock<SampleBank>>,
        trigger_tx: Option<Sender<TriggerEvent>>,
    ) -> Self {
        let (command_tx, command_rx) = channel();
        let slot: Arc<ArcSwapOption<CompiledPattern>> = Arc::new(ArcSwapOption::from(None));
        let slot_clone = Arc::clone(&slot);

        let thread = thread::spawn(move || {
            run_audio_loop(cps, max_voices, bank, trigger_tx, slot_clone, command_rx);
        });

        Self {
            command_tx,
            slot,
            thread: Some(thread),
        }
    }

    /// Install a pattern and start the transport from cycle zero.
    pub fn start(&self, pattern: Arc<CompiledPattern>) {
        self.slot.store(Some(pattern));
        let _ = self.command_tx.send(EngineCommand::Start);
    }

    /// Hot-swap the pattern. The transport clock is untouched; the new
    /// pattern picks up at the current cycle position.
    pub fn swap(&self, pattern: Arc<CompiledPattern>) {
        self.slot.store(Some(pattern));
    }

    pub fn stop(&self) {
        let _ = self.command_tx.send(EngineCommand::Stop);
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.command_tx.send(EngineCommand::Quit);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_audio_loop(
    cps: f64,
    max_voices: usize,
    bank: Arc<RwLock<SampleBank>>,
    trigger_tx: Option<Sender<TriggerEvent>>,
    slot: Arc<ArcSwapOption<CompiledPattern>>,
    command_rx: Receiver<EngineCommand>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        warn!("no audio output device; transport runs headless");
        return run_headless_loop(command_rx);
    };
    let config = match device.default_output_config() {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "no usable output config; transport runs headless");
            return run_headless_loop(command_rx);
        }
    };
    if config.sample_format() != cpal::SampleFormat::F32 {
        warn!(format = ?config.sample_format(), "unsupported sample format; transport runs headless");
        return run_headless_loop(command_rx);
    }

    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;
    let scheduler = {
        let mut s = PatternScheduler::new(sample_rate, cps, max_voices, bank);
        if let Some(tx) = trigger_tx {
            s = s.with_trigger_sink(tx);
        }
        Arc::new(Mutex::new(s))
    };

    let callback_scheduler = Arc::clone(&scheduler);
    let callback_slot = Arc::clone(&slot);
    let stream = device.build_output_stream(
        &config.config(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            // Contention here means a command is being applied; skip a block
            // rather than stall the device.
            match callback_scheduler.try_lock() {
                Ok(mut scheduler) => {
                    let pattern = callback_slot.load_full();
                    scheduler.process_block(pattern.as_deref(), data, channels);
                }
                Err(_) => data.fill(0.0),
            }
        },
        |err| warn!(error = %err, "audio stream error"),
        None,
    );
    let stream = match stream {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "could not open audio stream; transport runs headless");
            return run_headless_loop(command_rx);
        }
    };
    if let Err(err) = stream.play() {
        warn!(error = %err, "could not start audio stream; transport runs headless");
        return run_headless_loop(command_rx);
    }
    info!(sample_rate, channels, "audio transport ready");

    loop {
        match command_rx.recv() {
            Ok(EngineCommand::Start) => {
                scheduler.lock().expect("scheduler lock poisoned").start();
            }
            Ok(EngineCommand::Stop) => {
                scheduler.lock().expect("scheduler lock poisoned").stop();
            }
            Ok(EngineCommand::Quit) | Err(_) => break,
        }
    }
    // Stream drops here; output stops with it.
}

/// Keeps the command channel drained when no device is available, so the
/// state machine above stays usable on headless machines and CI.
fn run_headless_loop(command_rx: Receiver<EngineCommand>) {
    loop {
        match command_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(EngineCommand::Quit) => break,
            Ok(_) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Render a pattern offline into interleaved stereo. Test and export path;
/// mirrors exactly what the live callback does.
pub fn render_offline(
    pattern: &CompiledPattern,
    seconds: f64,
    sample_rate: f32,
    cps: f64,
    bank: Arc<RwLock<SampleBank>>,
) -> Vec<f32> {
    let mut scheduler = PatternScheduler::new(sample_rate, cps, 64, bank);
    scheduler.start();
    let total_frames = (seconds * sample_rate as f64) as usize;
    let mut out = vec![0.0f32; total_frames * 2];
    for block in out.chunks_mut(512 * 2) {
        scheduler.process_block(Some(pattern), block, 2);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth_sounds::register_synth_sounds;
    use crate::transpiler::{transpile, Runtime};

    fn test_bank() -> Arc<RwLock<SampleBank>> {
        let mut bank = SampleBank::new();
        register_synth_sounds(&mut bank);
        Arc::new(RwLock::new(bank))
    }

    fn compiled(source: &str) -> CompiledPattern {
        transpile(source, &Runtime::with_default_modules()).unwrap()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len().max(1) as f32).sqrt()
    }

    #[test]
    fn playing_pattern_is_audible() {
        let audio = render_offline(&compiled(r#"s("bd hh")"#), 1.0, 44100.0, 2.0, test_bank());
        assert!(rms(&audio) > 0.001, "rendered audio is silent");
    }

    #[test]
    fn stop_cuts_voices_immediately() {
        let bank = test_bank();
        let pattern = compiled(r#"s("bd*4")"#);
        let mut scheduler = PatternScheduler::new(44100.0, 2.0, 8, bank);
        scheduler.start();
        let mut block = vec![0.0f32; 1024];
        scheduler.process_block(Some(&pattern), &mut block, 2);
        assert!(rms(&block) > 0.0);

        scheduler.stop();
        scheduler.process_block(Some(&pattern), &mut block, 2);
        assert_eq!(rms(&block), 0.0, "audio leaked after stop");
    }

    #[test]
    fn swap_preserves_the_cycle_clock() {
        let bank = test_bank();
        let mut scheduler = PatternScheduler::new(44100.0, 2.0, 8, bank);
        scheduler.start();
        let a = compiled(r#"s("bd")"#);
        let b = compiled(r#"s("hh*8")"#);
        let mut block = vec![0.0f32; 2048];
        scheduler.process_block(Some(&a), &mut block, 2);
        let pos = scheduler.cycle_pos();
        assert!(pos > 0.0);
        // A swapped-in pattern continues from the same clock.
        scheduler.process_block(Some(&b), &mut block, 2);
        assert!(scheduler.cycle_pos() > pos);
    }

    #[test]
    fn trigger_events_are_reported() {
        let bank = test_bank();
        let (tx, rx) = channel();
        let mut scheduler =
            PatternScheduler::new(44100.0, 2.0, 8, bank).with_trigger_sink(tx);
        scheduler.start();
        let pattern = compiled(r#"s("bd hh")"#);
        // Half a cycle at cps=2.0 is a quarter second.
        let mut block = vec![0.0f32; 11025 * 2];
        scheduler.process_block(Some(&pattern), &mut block, 2);
        let events: Vec<TriggerEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sound, "bd");
    }

    #[test]
    fn unknown_sounds_are_skipped_not_fatal() {
        let bank = test_bank();
        let pattern = compiled(r#"s("nosuchsound bd")"#);
        let audio = render_offline(&pattern, 0.5, 44100.0, 2.0, bank);
        assert!(rms(&audio) > 0.0);
    }

    #[test]
    fn engine_headless_lifecycle_is_clean() {
        // With or without a device, spawn/start/stop/drop must not hang.
        let engine = AudioEngine::spawn(2.0, 8, test_bank(), None);
        engine.start(Arc::new(compiled(r#"s("bd")"#)));
        engine.stop();
        drop(engine);
    }
}
