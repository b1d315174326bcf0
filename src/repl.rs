//! REPL shell
//!
//! Composes bootstrap readiness, the playback controller, and the editor
//! surface behind the three user actions a pattern block exposes: play/stop,
//! re-evaluate, and save. Save hands a [`SaveRequest`] to the host
//! integration shim and reports the acknowledgement back as a notice.
//!
//! Each shell instance owns its editor buffer and playback state; only the
//! bootstrap (engine context, sample bank, runtime) is shared across
//! instances on a page.

use crate::bootstrap::Bootstrap;
use crate::config::ReplConfig;
use crate::controller::{ControllerEvent, PlaybackController, PlaybackState};
use crate::editor::EditorSurface;
use crate::engine::TriggerEvent;
use crate::host::{apply_save, DocumentStore, SaveError, SaveRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, info};

/// User-facing notifications (the host renders these as toasts or inline
/// messages).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Saved,
    SaveFailed(String),
    EngineLoading,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplEvent {
    State(PlaybackState),
    Trigger(TriggerEvent),
    Notice(Notice),
}

/// Snapshot the embedding view uses to enable/disable header controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderState {
    pub visible: bool,
    /// Play/stop stays disabled until bootstrap readiness.
    pub play_enabled: bool,
    pub started: bool,
    /// Re-evaluate and save are only offered on a dirty buffer.
    pub evaluate_enabled: bool,
    pub save_enabled: bool,
}

type TriggerHook = Box<dyn Fn(&TriggerEvent) + Send>;

#[derive(Default)]
pub struct ReplOptions {
    pub hide_header: bool,
    /// Observer for scheduled events; purely informational.
    pub on_trigger: Option<TriggerHook>,
}

pub struct ReplShell {
    document_id: String,
    editor: EditorSurface,
    seen_revision: u64,
    controller: PlaybackController,
    bootstrap: Arc<Bootstrap>,
    store: Arc<dyn DocumentStore>,
    /// Flipped on unmount; in-flight save completions check it before
    /// reporting, so a disposed instance is never mutated.
    alive: Arc<AtomicBool>,
    controller_rx: Receiver<ControllerEvent>,
    trigger_rx: Receiver<TriggerEvent>,
    save_tx: Sender<Result<(), SaveError>>,
    save_rx: Receiver<Result<(), SaveError>>,
    pending_saves: Vec<tokio::task::JoinHandle<()>>,
    notices: Vec<Notice>,
    options: ReplOptions,
}

impl ReplShell {
    /// Mount a REPL for one document's pattern block. Triggers bootstrap if
    /// this is the first instance on the page; otherwise shares the existing
    /// signals. Must run inside a tokio runtime.
    pub fn mount(
        document_id: &str,
        initial_source: &str,
        store: Arc<dyn DocumentStore>,
        bootstrap: Arc<Bootstrap>,
        config: &ReplConfig,
        options: ReplOptions,
    ) -> Self {
        bootstrap.ensure_started(config);

        let (controller_tx, controller_rx) = channel();
        let (trigger_tx, trigger_rx) = channel();
        let (save_tx, save_rx) = channel();
        let controller = PlaybackController::new(
            bootstrap.runtime(),
            bootstrap.sample_bank(),
            config.cycles_per_second,
            config.max_voices,
            controller_tx,
            Some(trigger_tx),
        );
        info!(document = document_id, "repl mounted");

        Self {
            document_id: document_id.to_string(),
            editor: EditorSurface::new(initial_source, config.editor.clone()),
            seen_revision: 0,
            controller,
            bootstrap,
            store,
            alive: Arc::new(AtomicBool::new(true)),
            controller_rx,
            trigger_rx,
            save_tx,
            save_rx,
            pending_saves: Vec::new(),
            notices: Vec::new(),
            options,
        }
    }

    pub fn editor(&self) -> &EditorSurface {
        &self.editor
    }

    pub fn state(&self) -> PlaybackState {
        self.controller.state().clone()
    }

    /// Route a widget edit through the shell so the dirty flag is set
    /// synchronously, strictly before any later evaluate or save.
    pub fn edit(&mut self, f: impl FnOnce(&mut EditorSurface)) {
        f(&mut self.editor);
        if self.editor.revision() != self.seen_revision {
            self.seen_revision = self.editor.revision();
            self.controller.notify_edit();
        }
    }

    /// Play/stop. Rejected with a notice until bootstrap readiness; the
    /// click itself counts as the audio-unlocking user gesture.
    pub fn play_stop(&mut self) {
        self.bootstrap.unlock_audio();
        if !self.bootstrap.ready_now() {
            debug!("play ignored; engine still loading");
            self.notices.push(Notice::EngineLoading);
            return;
        }
        self.controller.toggle(self.editor.text());
    }

    /// Re-evaluate the current buffer. Only meaningful on a dirty buffer.
    pub fn evaluate(&mut self) {
        if !self.controller.state().dirty {
            return;
        }
        self.controller.evaluate(self.editor.text());
    }

    /// Emit a save request for the current buffer. Returns false (and emits
    /// nothing) when the buffer is clean. Compilation state is irrelevant:
    /// broken code saves verbatim.
    pub fn save(&mut self) -> bool {
        if !self.controller.state().dirty {
            debug!("save skipped; buffer is clean");
            return false;
        }
        let request = SaveRequest {
            document_id: self.document_id.clone(),
            new_source: self.editor.text().to_string(),
        };
        let store = Arc::clone(&self.store);
        let alive = Arc::clone(&self.alive);
        let tx = self.save_tx.clone();
        self.pending_saves.push(tokio::spawn(async move {
            let result = apply_save(store.as_ref(), &request).await;
            // Stale-result guard: a save finishing after unmount is dropped.
            if alive.load(Ordering::SeqCst) {
                let _ = tx.send(result);
            }
        }));
        true
    }

    /// Await every in-flight save round-trip. The acknowledgements still
    /// arrive through [`ReplShell::drain_events`].
    pub async fn flush_saves(&mut self) {
        for handle in self.pending_saves.drain(..) {
            let _ = handle.await;
        }
    }

    /// Pull everything that happened since the last call: state changes,
    /// trigger events (feeding the observer hook), and save outcomes.
    pub fn drain_events(&mut self) -> Vec<ReplEvent> {
        let mut events: Vec<ReplEvent> =
            self.notices.drain(..).map(ReplEvent::Notice).collect();

        while let Ok(ControllerEvent::StateChanged(state)) = self.controller_rx.try_recv() {
            events.push(ReplEvent::State(state));
        }
        while let Ok(trigger) = self.trigger_rx.try_recv() {
            if let Some(hook) = &self.options.on_trigger {
                hook(&trigger);
            }
            events.push(ReplEvent::Trigger(trigger));
        }
        while let Ok(result) = self.save_rx.try_recv() {
            match result {
                Ok(()) => {
                    self.controller.mark_saved();
                    events.push(ReplEvent::Notice(Notice::Saved));
                }
                Err(err) => {
                    // Edited content stays local for a retry.
                    events.push(ReplEvent::Notice(Notice::SaveFailed(err.to_string())));
                }
            }
        }
        // mark_saved may have emitted a fresh state change.
        while let Ok(ControllerEvent::StateChanged(state)) = self.controller_rx.try_recv() {
            events.push(ReplEvent::State(state));
        }
        events
    }

    pub fn header_state(&self) -> HeaderState {
        let state = self.controller.state();
        HeaderState {
            visible: !self.options.hide_header,
            play_enabled: self.bootstrap.ready_now(),
            started: state.started,
            evaluate_enabled: state.dirty,
            save_enabled: state.dirty,
        }
    }

    /// Tear the instance down: transport stops, and any late save or
    /// bootstrap completion is barred from touching this instance.
    pub fn unmount(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.controller.shutdown();
        info!(document = %self.document_id, "repl unmounted");
    }
}

impl Drop for ReplShell {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}
