//! One-time engine and sample bootstrap
//!
//! A page session gets exactly one engine context, one sample bank, and one
//! loaded pattern runtime, shared by every REPL instance. The first
//! `ensure_started` call spawns the work; later calls (and later-mounted
//! REPLs) just await the same signals.
//!
//! Bank loading fans out one task per manifest and joins all-settled: a bank
//! that fails to fetch or decode is logged and skipped, the rest land, and
//! readiness still resolves. Audio output additionally waits for the host to
//! report the first user gesture (`unlock_audio`), per browser-style audio
//! policy.

use crate::config::{ManifestSource, ReplConfig};
use crate::sample_bank::{decode_wav, BankLoadError, SampleBank, SampleManifest};
use crate::synth_sounds::register_synth_sounds;
use crate::transpiler::Runtime;
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

/// Per-bank outcome of the bootstrap fan-out.
#[derive(Debug)]
pub struct BankOutcome {
    pub name: String,
    /// Number of samples loaded on success.
    pub result: Result<usize, BankLoadError>,
}

/// What the fan-out settled to. Partial failure is normal operation.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub banks: Vec<BankOutcome>,
}

impl BootstrapReport {
    pub fn loaded(&self) -> usize {
        self.banks.iter().filter(|b| b.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.banks.len() - self.loaded()
    }
}

pub struct Bootstrap {
    bank: Arc<RwLock<SampleBank>>,
    runtime: Arc<Runtime>,
    started: AtomicBool,
    ready_tx: Arc<watch::Sender<bool>>,
    ready_rx: watch::Receiver<bool>,
    unlock_tx: watch::Sender<bool>,
    unlock_rx: watch::Receiver<bool>,
    report: Arc<Mutex<Option<BootstrapReport>>>,
}

lazy_static! {
    static ref SHARED: Arc<Bootstrap> = Arc::new(Bootstrap::new());
}

impl Bootstrap {
    /// The process-wide instance every REPL on the page shares.
    pub fn shared() -> Arc<Bootstrap> {
        Arc::clone(&SHARED)
    }

    /// A detached instance. Embedding hosts that manage their own session
    /// lifetime (and tests) use this; everything else goes through
    /// [`Bootstrap::shared`].
    pub fn new() -> Self {
        let (ready_tx, ready_rx) = watch::channel(false);
        let (unlock_tx, unlock_rx) = watch::channel(false);
        Self {
            bank: Arc::new(RwLock::new(SampleBank::new())),
            runtime: Arc::new(Runtime::with_default_modules()),
            started: AtomicBool::new(false),
            ready_tx: Arc::new(ready_tx),
            ready_rx,
            unlock_tx,
            unlock_rx,
            report: Arc::new(Mutex::new(None)),
        }
    }

    /// Kick off bootstrap if nobody has. Idempotent; must run inside a tokio
    /// runtime. A second REPL mounting on the same page lands in the
    /// early-return branch and re-triggers nothing.
    pub fn ensure_started(&self, config: &ReplConfig) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let bank = Arc::clone(&self.bank);
        let report_slot = Arc::clone(&self.report);
        let ready_tx = Arc::clone(&self.ready_tx);
        let manifests = config.manifests.clone();
        tokio::spawn(async move {
            {
                let mut bank = bank.write().expect("sample bank lock poisoned");
                register_synth_sounds(&mut bank);
            }

            let mut handles = Vec::new();
            for source in manifests {
                let bank = Arc::clone(&bank);
                handles.push(tokio::spawn(async move {
                    let result = load_bank(&source, &bank).await;
                    BankOutcome {
                        name: source.name,
                        result,
                    }
                }));
            }

            // All-settled join: collect every outcome, fail none.
            let mut outcomes = Vec::new();
            for handle in handles {
                match handle.await {
                    Ok(outcome) => {
                        if let Err(err) = &outcome.result {
                            warn!(bank = %outcome.name, error = %err, "sample bank skipped");
                        }
                        outcomes.push(outcome);
                    }
                    Err(err) => warn!(error = %err, "bank loader task aborted"),
                }
            }

            let report = BootstrapReport { banks: outcomes };
            info!(
                loaded = report.loaded(),
                failed = report.failed(),
                "engine bootstrap complete"
            );
            *report_slot.lock().expect("report lock poisoned") = Some(report);
            let _ = ready_tx.send(true);
        });
    }

    /// Resolves once engine context, runtime modules, and every settled bank
    /// load are done. Safe to await from any number of instances.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn ready_now(&self) -> bool {
        *self.ready_rx.borrow()
    }

    /// Host reports the first user gesture. One-shot; repeat calls are no-ops.
    pub fn unlock_audio(&self) {
        if !self.audio_unlocked_now() {
            info!("audio unlocked by user gesture");
            let _ = self.unlock_tx.send(true);
        }
    }

    /// Resolves once a user gesture has unlocked audio output.
    pub async fn audio_unlocked(&self) {
        let mut rx = self.unlock_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn audio_unlocked_now(&self) -> bool {
        *self.unlock_rx.borrow()
    }

    pub fn sample_bank(&self) -> Arc<RwLock<SampleBank>> {
        Arc::clone(&self.bank)
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime)
    }

    /// Per-bank outcomes, once ready. `None` while bootstrap is in flight.
    pub fn report(&self) -> Option<BootstrapReport> {
        self.report.lock().expect("report lock poisoned").take()
    }
}

impl Default for Bootstrap {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch one manifest and load every sample it lists. Individual sample
/// failures are skipped; the bank fails only if the manifest itself does.
async fn load_bank(
    source: &ManifestSource,
    bank: &Arc<RwLock<SampleBank>>,
) -> Result<usize, BankLoadError> {
    let body = reqwest::get(&source.url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| BankLoadError::Fetch(e.to_string()))?
        .text()
        .await
        .map_err(|e| BankLoadError::Fetch(e.to_string()))?;
    let manifest = SampleManifest::parse(&body)?;

    let mut loaded = 0;
    for (name, files) in &manifest.entries {
        let mut samples = Vec::new();
        for path in files {
            let url = manifest.resolve(path);
            match fetch_sample(&url).await {
                Ok(sample) => samples.push(sample),
                Err(err) => warn!(%url, error = %err, "sample skipped"),
            }
        }
        if !samples.is_empty() {
            loaded += samples.len();
            bank.write()
                .expect("sample bank lock poisoned")
                .insert_set(name, samples);
        }
    }
    Ok(loaded)
}

async fn fetch_sample(url: &str) -> Result<crate::sample_bank::StereoSample, BankLoadError> {
    let bytes = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| BankLoadError::Fetch(e.to_string()))?
        .bytes()
        .await
        .map_err(|e| BankLoadError::Fetch(e.to_string()))?;
    decode_wav(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_resolves_without_manifests() {
        let bootstrap = Arc::new(Bootstrap::new());
        assert!(!bootstrap.ready_now());
        bootstrap.ensure_started(&ReplConfig::default());
        bootstrap.ready().await;
        assert!(bootstrap.ready_now());
        // Built-in kit landed.
        let bank = bootstrap.sample_bank();
        assert!(bank.read().unwrap().contains("bd"));
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let bootstrap = Arc::new(Bootstrap::new());
        bootstrap.ensure_started(&ReplConfig::default());
        bootstrap.ready().await;
        let before = bootstrap.sample_bank().read().unwrap().len();
        bootstrap.ensure_started(&ReplConfig::default());
        bootstrap.ready().await;
        assert_eq!(bootstrap.sample_bank().read().unwrap().len(), before);
    }

    #[tokio::test]
    async fn failed_banks_do_not_block_readiness() {
        let bootstrap = Arc::new(Bootstrap::new());
        let config = ReplConfig {
            manifests: vec![
                ManifestSource {
                    name: "unreachable".to_string(),
                    url: "http://127.0.0.1:9/none.json".to_string(),
                },
                ManifestSource {
                    name: "also-bad".to_string(),
                    url: "not a url".to_string(),
                },
            ],
            ..ReplConfig::default()
        };
        bootstrap.ensure_started(&config);
        bootstrap.ready().await;
        let report = bootstrap.report().expect("report available after ready");
        assert_eq!(report.failed(), 2);
        // Engine still usable: the built-in kit is present.
        assert!(bootstrap.sample_bank().read().unwrap().contains("bd"));
    }

    #[tokio::test]
    async fn unlock_is_a_one_shot_latch() {
        let bootstrap = Bootstrap::new();
        assert!(!bootstrap.audio_unlocked_now());
        bootstrap.unlock_audio();
        bootstrap.unlock_audio();
        bootstrap.audio_unlocked().await;
        assert!(bootstrap.audio_unlocked_now());
    }
}
