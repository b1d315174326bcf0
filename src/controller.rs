//! Playback controller
//!
//! Owns the transport and the `{started, dirty, error}` state the shell
//! observes. Every engine and compile failure is absorbed here and turned
//! into state; nothing escapes to crash the shell.
//!
//! Transitions:
//! - toggle from idle: compile, start transport on success, error on failure
//! - toggle from playing: stop transport
//! - evaluate: compile, hot-swap without clock interruption on success;
//!   on failure keep the previous pattern running and set the error
//! - edit notification: set dirty, compile nothing

use crate::engine::{AudioEngine, TriggerEvent};
use crate::sample_bank::SampleBank;
use crate::transpiler::{transpile, CompileError, Runtime};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Observable playback state. `dirty` means the editor content differs from
/// the last successfully compiled or saved content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackState {
    pub started: bool,
    pub dirty: bool,
    pub error: Option<CompileError>,
}

/// Controller-to-shell notifications. The engine's own callback surface
/// stays behind this boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged(PlaybackState),
}

pub struct PlaybackController {
    state: PlaybackState,
    engine: AudioEngine,
    runtime: Arc<Runtime>,
    events: Sender<ControllerEvent>,
}

impl PlaybackController {
    /// Engine is spawned immediately but stays idle until the first toggle.
    pub fn new(
        runtime: Arc<Runtime>,
        bank: Arc<RwLock<SampleBank>>,
        cps: f64,
        max_voices: usize,
        events: Sender<ControllerEvent>,
        trigger_tx: Option<Sender<TriggerEvent>>,
    ) -> Self {
        Self {
            state: PlaybackState::default(),
            engine: AudioEngine::spawn(cps, max_voices, bank, trigger_tx),
            runtime,
            events,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    fn emit(&self) {
        let _ = self
            .events
            .send(ControllerEvent::StateChanged(self.state.clone()));
    }

    /// User hit play/stop.
    pub fn toggle(&mut self, source: &str) {
        if self.state.started {
            self.engine.stop();
            self.state.started = false;
            info!("transport stopped");
        } else {
            match transpile(source, &self.runtime) {
                Ok(compiled) => {
                    self.engine.start(Arc::new(compiled));
                    self.state.started = true;
                    self.state.error = None;
                    // Compiled content now matches the editor.
                    self.state.dirty = false;
                    info!("transport started");
                }
                Err(err) => {
                    debug!(error = %err, "toggle compile failed");
                    self.state.error = Some(err);
                }
            }
        }
        self.emit();
    }

    /// User asked for a re-eval of the current editor content. If the
    /// transport is running, success swaps patterns in place; failure leaves
    /// the previous pattern playing untouched.
    pub fn evaluate(&mut self, source: &str) {
        match transpile(source, &self.runtime) {
            Ok(compiled) => {
                if self.state.started {
                    self.engine.swap(Arc::new(compiled));
                }
                self.state.dirty = false;
                self.state.error = None;
                debug!("evaluate succeeded");
            }
            Err(err) => {
                debug!(error = %err, "evaluate compile failed");
                self.state.error = Some(err);
            }
        }
        self.emit();
    }

    /// The editor content changed. Synchronous, no compilation.
    pub fn notify_edit(&mut self) {
        if !self.state.dirty {
            self.state.dirty = true;
            self.emit();
        }
    }

    /// A save round-trip completed; the stored content now matches the
    /// editor.
    pub fn mark_saved(&mut self) {
        if self.state.dirty {
            self.state.dirty = false;
            self.emit();
        }
    }

    /// Stop the transport without tearing the engine down (unmount path).
    pub fn shutdown(&mut self) {
        if self.state.started {
            self.engine.stop();
            self.state.started = false;
            self.emit();
        }
    }
}

// AudioEngine's own Drop quits the audio thread, so a dropped controller
// cannot leave audio running.
