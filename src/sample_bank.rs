//! Named sample sets shared by every REPL instance
//!
//! The bank maps an instrument name to an ordered set of decoded samples, so
//! `bd` plays the first kick and `bd:3` the fourth. It is populated during
//! bootstrap (built-in synth sounds plus fetched manifest banks) and
//! append-only afterwards: a name that is already present is never replaced.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Decoded PCM audio. Mono samples keep `right` as `None`.
#[derive(Clone, Debug)]
pub struct StereoSample {
    pub left: Vec<f32>,
    pub right: Option<Vec<f32>>,
}

impl StereoSample {
    pub fn mono(data: Vec<f32>) -> Self {
        Self {
            left: data,
            right: None,
        }
    }

    pub fn stereo(left: Vec<f32>, right: Vec<f32>) -> Self {
        Self {
            left,
            right: Some(right),
        }
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Linear-interpolated read at a fractional frame position.
    /// Returns (left, right); mono samples mirror left into right.
    pub fn frame_at(&self, position: f32) -> (f32, f32) {
        if self.left.is_empty() {
            return (0.0, 0.0);
        }
        let idx = position as usize;
        let frac = position - idx as f32;
        if idx >= self.left.len() {
            return (0.0, 0.0);
        }

        let read = |channel: &[f32]| -> f32 {
            if idx + 1 < channel.len() {
                channel[idx] * (1.0 - frac) + channel[idx + 1] * frac
            } else {
                channel.get(idx).copied().unwrap_or(0.0) * (1.0 - frac)
            }
        };

        let left = read(&self.left);
        let right = match &self.right {
            Some(r) => read(r),
            None => left,
        };
        (left, right)
    }
}

/// A sample bank failed to load or decode. Per-bank; never fatal.
#[derive(Debug, Error)]
pub enum BankLoadError {
    #[error("manifest fetch failed: {0}")]
    Fetch(String),
    #[error("manifest is not valid JSON: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("wav decode failed: {0}")]
    Decode(#[from] hound::Error),
}

/// JSON manifest listing an instrument name per key and its sample files,
/// resolved against an optional `_base` URL.
#[derive(Debug, Clone, Deserialize)]
pub struct SampleManifest {
    #[serde(default, rename = "_base")]
    pub base: Option<String>,
    #[serde(flatten)]
    pub entries: HashMap<String, Vec<String>>,
}

impl SampleManifest {
    pub fn parse(json: &str) -> Result<Self, BankLoadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Absolute URL for one sample file.
    pub fn resolve(&self, path: &str) -> String {
        match &self.base {
            Some(base) if !path.starts_with("http") => {
                format!("{}/{}", base.trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        }
    }
}

/// Decode a WAV file held in memory, preserving stereo when present.
pub fn decode_wav(bytes: &[u8]) -> Result<StereoSample, BankLoadError> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let raw: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map(|s| s.unwrap_or(0.0)).collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.unwrap_or(0) as f32 / max_val)
                .collect()
        }
    };

    Ok(if spec.channels == 2 {
        let frames = raw.len() / 2;
        let mut left = Vec::with_capacity(frames);
        let mut right = Vec::with_capacity(frames);
        for chunk in raw.chunks(2) {
            left.push(chunk[0]);
            right.push(chunk.get(1).copied().unwrap_or(0.0));
        }
        StereoSample::stereo(left, right)
    } else {
        StereoSample::mono(raw)
    })
}

/// The process-wide instrument store.
#[derive(Default)]
pub struct SampleBank {
    sets: HashMap<String, Vec<Arc<StereoSample>>>,
}

impl SampleBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named sample set. Existing names win: the bank is
    /// append-only once populated.
    pub fn insert_set(&mut self, name: &str, samples: Vec<StereoSample>) {
        self.sets
            .entry(name.to_string())
            .or_insert_with(|| samples.into_iter().map(Arc::new).collect());
    }

    /// Append one sample to a set, creating the set if needed.
    pub fn push_sample(&mut self, name: &str, sample: StereoSample) {
        self.sets
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(sample));
    }

    /// Look up `name` or `name` + index. Out-of-range indices wrap, matching
    /// the pattern language's `bd:7` behavior on small sets.
    pub fn get(&self, name: &str, index: usize) -> Option<Arc<StereoSample>> {
        let set = self.sets.get(name)?;
        if set.is_empty() {
            return None;
        }
        Some(Arc::clone(&set[index % set.len()]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.sets.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click(len: usize) -> StereoSample {
        StereoSample::mono(vec![1.0; len])
    }

    #[test]
    fn get_wraps_sample_indices() {
        let mut bank = SampleBank::new();
        bank.insert_set("bd", vec![click(10), click(20)]);
        assert_eq!(bank.get("bd", 0).unwrap().len(), 10);
        assert_eq!(bank.get("bd", 1).unwrap().len(), 20);
        assert_eq!(bank.get("bd", 2).unwrap().len(), 10);
    }

    #[test]
    fn missing_names_return_none() {
        let bank = SampleBank::new();
        assert!(bank.get("nope", 0).is_none());
    }

    #[test]
    fn insert_is_append_only() {
        let mut bank = SampleBank::new();
        bank.insert_set("bd", vec![click(10)]);
        bank.insert_set("bd", vec![click(99)]);
        assert_eq!(bank.get("bd", 0).unwrap().len(), 10);
    }

    #[test]
    fn frame_at_interpolates() {
        let sample = StereoSample::mono(vec![0.0, 1.0]);
        let (l, r) = sample.frame_at(0.5);
        assert!((l - 0.5).abs() < 1e-6);
        assert_eq!(l, r);
    }

    #[test]
    fn frame_at_past_the_end_is_silent() {
        let sample = StereoSample::mono(vec![1.0, 1.0]);
        assert_eq!(sample.frame_at(5.0), (0.0, 0.0));
    }

    #[test]
    fn manifest_parses_and_resolves() {
        let manifest = SampleManifest::parse(
            r#"{"_base": "https://samples.example/kit/", "bd": ["bd/one.wav"], "sn": ["sn/a.wav", "sn/b.wav"]}"#,
        )
        .unwrap();
        assert_eq!(manifest.entries["sn"].len(), 2);
        assert_eq!(
            manifest.resolve("bd/one.wav"),
            "https://samples.example/kit/bd/one.wav"
        );
        assert_eq!(
            manifest.resolve("https://cdn.example/x.wav"),
            "https://cdn.example/x.wav"
        );
    }

    #[test]
    fn decode_roundtrips_a_generated_wav() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            for i in 0..64 {
                writer.write_sample((i * 256) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        let sample = decode_wav(&bytes).unwrap();
        assert_eq!(sample.len(), 64);
        assert!(sample.right.is_none());
    }
}
