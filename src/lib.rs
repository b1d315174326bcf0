//! # Cadenza - Embeddable Live Coding Pattern REPL
//!
//! Cadenza turns a block of textual pattern code inside a hosted document
//! into a runnable, audible performance, and keeps the document's persisted
//! source in sync with live edits. It is the audio core of a note-taking
//! application: the host renders documents; Cadenza owns the pattern blocks.
//!
//! ## Core Pieces
//!
//! - **Bootstrap**: one engine context, sample bank, and pattern runtime per
//!   page session, shared by every REPL instance
//! - **Transpiler**: Tidal-style mini-notation and a small combinator
//!   surface (`s("bd hh").fast(2)`) compiled on every evaluate
//! - **Playback controller**: play/stop/evaluate state machine with
//!   hot-swap re-eval that never interrupts the transport clock
//! - **REPL shell**: play/stop, re-evaluate, and save actions over an
//!   editor-owned working copy of the source
//! - **Host shim**: resolves the owning document and applies the
//!   saved source as a partial update
//!
//! ## Quick Start
//!
//! ```no_run
//! use cadenza::bootstrap::Bootstrap;
//! use cadenza::config::ReplConfig;
//! use cadenza::host::{Document, InMemoryDocumentStore};
//! use cadenza::repl::{ReplOptions, ReplShell};
//!
//! # async fn demo() {
//! let store = InMemoryDocumentStore::with_documents([
//!     Document::new("memo-1", r#"s("bd hh")"#),
//! ]);
//! let bootstrap = Bootstrap::shared();
//! let config = ReplConfig::default();
//!
//! let mut repl = ReplShell::mount(
//!     "memo-1",
//!     r#"s("bd hh")"#,
//!     store,
//!     bootstrap.clone(),
//!     &config,
//!     ReplOptions::default(),
//! );
//!
//! bootstrap.ready().await;
//! repl.play_stop();                       // Idle -> Playing
//! repl.edit(|e| e.replace_all(r#"s("bd hh sn hh")"#));
//! repl.evaluate();                        // hot-swap, transport uninterrupted
//! repl.save();                            // persist back into the document
//! # }
//! ```
//!
//! ## Mini-Notation
//!
//! Pattern strings use Tidal Cycles mini-notation:
//!
//! - **`bd sn hh`** - sequence: kick, snare, hi-hat across one cycle
//! - **`bd*4`** - repeat: four kicks per cycle
//! - **`bd/2`** - slow: one kick every two cycles
//! - **`bd ~ ~ ~`** - rests
//! - **`<bd sn cp>`** - alternation: one option per cycle
//! - **`[bd, sn]`** / **`bd, sn`** - layering
//! - **`bd(3,8)`** - Euclidean: 3 kicks over 8 steps
//! - **`bd:2`** - sample selection within a set

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod editor;
pub mod engine;
pub mod host;
pub mod mini_notation;
pub mod pattern;
pub mod repl;
pub mod sample_bank;
pub mod synth_sounds;
pub mod transpiler;

pub use bootstrap::Bootstrap;
pub use config::ReplConfig;
pub use controller::{PlaybackController, PlaybackState};
pub use editor::EditorSurface;
pub use host::{Document, DocumentStore, SaveError, SaveRequest};
pub use repl::{HeaderState, Notice, ReplEvent, ReplOptions, ReplShell};
pub use transpiler::{transpile, CompileError, CompiledPattern, Runtime};
