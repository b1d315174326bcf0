//! Built-in synthesized instruments
//!
//! A small SuperDirt-inspired drum kit rendered to PCM and registered into
//! the shared bank during bootstrap. These guarantee the engine makes sound
//! even when every remote sample bank fails to load.
//!
//! Renders are deterministic: noise comes from a seeded generator, so two
//! bootstraps produce identical buffers.

use crate::sample_bank::{SampleBank, StereoSample};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;
use tracing::debug;

const SAMPLE_RATE: f32 = 44100.0;

fn seconds(n: f32) -> usize {
    (n * SAMPLE_RATE) as usize
}

/// Exponential decay envelope, 1.0 at the start of the buffer.
fn decay(i: usize, rate: f32) -> f32 {
    (-(i as f32) / SAMPLE_RATE * rate).exp()
}

fn noise(rng: &mut StdRng) -> f32 {
    rng.gen_range(-1.0f32..1.0)
}

/// Kick: sine with a fast pitch envelope from 3x down to the base
/// frequency, plus a touch of noise in the attack.
fn render_kick() -> StereoSample {
    let len = seconds(0.3);
    let mut rng = StdRng::seed_from_u64(1);
    let base = 55.0;
    let mut phase = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let pitch_env = decay(i, 20.0);
        let freq = base * (1.0 + 2.0 * pitch_env);
        phase += 2.0 * PI * freq / SAMPLE_RATE;
        let body = phase.sin() * decay(i, 8.0);
        let attack = noise(&mut rng) * 0.1 * decay(i, 80.0);
        out.push((body + attack) * 0.9);
    }
    StereoSample::mono(out)
}

/// Snare: 180 Hz tone under a band-limited noise burst.
fn render_snare() -> StereoSample {
    let len = seconds(0.2);
    let mut rng = StdRng::seed_from_u64(2);
    let mut phase = 0.0f32;
    let mut last = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        phase += 2.0 * PI * 180.0 / SAMPLE_RATE;
        let tone = phase.sin() * decay(i, 25.0) * 0.5;
        // One-pole highpass keeps the noise crisp.
        let n = noise(&mut rng);
        let hp = n - last;
        last = n;
        out.push((tone + hp * 0.6 * decay(i, 18.0)) * 0.8);
    }
    StereoSample::mono(out)
}

/// Closed hat: short highpassed noise burst.
fn render_hat() -> StereoSample {
    let len = seconds(0.08);
    let mut rng = StdRng::seed_from_u64(3);
    let mut last = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let n = noise(&mut rng);
        let hp = n - last;
        last = n;
        out.push(hp * decay(i, 60.0) * 0.5);
    }
    StereoSample::mono(out)
}

/// Open hat: the closed hat with a longer tail.
fn render_open_hat() -> StereoSample {
    let len = seconds(0.35);
    let mut rng = StdRng::seed_from_u64(4);
    let mut last = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        let n = noise(&mut rng);
        let hp = n - last;
        last = n;
        out.push(hp * decay(i, 12.0) * 0.4);
    }
    StereoSample::mono(out)
}

/// Clap: three staggered noise bursts into a common tail.
fn render_clap() -> StereoSample {
    let len = seconds(0.25);
    let mut rng = StdRng::seed_from_u64(5);
    let bursts = [0usize, seconds(0.012), seconds(0.024)];
    let mut out = vec![0.0f32; len];
    for &start in &bursts {
        for (i, slot) in out.iter_mut().enumerate().skip(start) {
            let local = i - start;
            *slot += noise(&mut rng) * decay(local, 40.0) * 0.35;
        }
    }
    StereoSample::mono(out)
}

/// Click: a single-cycle blip for metronome-style patterns.
fn render_click() -> StereoSample {
    let len = seconds(0.02);
    let mut phase = 0.0f32;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        phase += 2.0 * PI * 2000.0 / SAMPLE_RATE;
        out.push(phase.sin() * decay(i, 200.0) * 0.6);
    }
    StereoSample::mono(out)
}

/// Register the built-in kit. Names follow the classic drum-machine
/// shorthand the pattern language expects.
pub fn register_synth_sounds(bank: &mut SampleBank) {
    let kit: [(&str, StereoSample); 6] = [
        ("bd", render_kick()),
        ("sn", render_snare()),
        ("hh", render_hat()),
        ("oh", render_open_hat()),
        ("cp", render_clap()),
        ("click", render_click()),
    ];
    for (name, sample) in kit {
        bank.insert_set(name, vec![sample]);
    }
    debug!("registered built-in synth sounds");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_the_core_kit() {
        let mut bank = SampleBank::new();
        register_synth_sounds(&mut bank);
        for name in ["bd", "sn", "hh", "oh", "cp", "click"] {
            assert!(bank.contains(name), "missing {name}");
        }
    }

    #[test]
    fn rendered_sounds_are_audible_and_bounded() {
        let mut bank = SampleBank::new();
        register_synth_sounds(&mut bank);
        for name in ["bd", "sn", "hh", "cp"] {
            let sample = bank.get(name, 0).unwrap();
            let peak = sample.left.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            assert!(peak > 0.05, "{name} is effectively silent");
            assert!(peak <= 1.5, "{name} clips hard: {peak}");
        }
    }

    #[test]
    fn renders_are_deterministic() {
        let a = render_snare();
        let b = render_snare();
        assert_eq!(a.left, b.left);
    }

    #[test]
    fn registering_twice_does_not_replace() {
        let mut bank = SampleBank::new();
        bank.insert_set("bd", vec![StereoSample::mono(vec![0.25; 4])]);
        register_synth_sounds(&mut bank);
        assert_eq!(bank.get("bd", 0).unwrap().len(), 4);
    }
}
