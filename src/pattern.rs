//! Cycle-based pattern engine
//!
//! Patterns are queries: given a span of cycle time, a pattern answers with
//! the events ("haps") that occur inside it. Everything the transpiler builds
//! bottoms out in these combinators.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;

/// Rational cycle time, so subdivision arithmetic stays exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub numerator: i64,
    pub denominator: i64,
}

impl Fraction {
    pub fn new(n: i64, d: i64) -> Self {
        let g = gcd(n.abs(), d.abs()).max(1);
        Self {
            numerator: n / g * d.signum(),
            denominator: d.abs() / g,
        }
    }

    pub fn from_float(f: f64) -> Self {
        let denominator = 1_000_000;
        Self::new((f * denominator as f64).round() as i64, denominator)
    }

    pub fn to_float(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Cycle number this time falls in.
    pub fn floor_cycle(&self) -> i64 {
        self.to_float().floor() as i64
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl std::ops::Add for Fraction {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator + other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl std::ops::Sub for Fraction {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator - other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.numerator * other.denominator).cmp(&(other.numerator * self.denominator))
    }
}

/// Half-open interval of cycle time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub begin: Fraction,
    pub end: Fraction,
}

impl TimeSpan {
    pub fn new(begin: Fraction, end: Fraction) -> Self {
        Self { begin, end }
    }

    pub fn duration(&self) -> Fraction {
        self.end - self.begin
    }
}

/// One pattern event. `whole` is the event's full extent; `part` is the
/// fragment of it that intersects the query span. An event is an onset when
/// `part.begin == whole.begin`.
#[derive(Debug, Clone)]
pub struct Hap<T> {
    pub whole: Option<TimeSpan>,
    pub part: TimeSpan,
    pub value: T,
}

impl<T: Clone> Hap<T> {
    pub fn new(whole: Option<TimeSpan>, part: TimeSpan, value: T) -> Self {
        Self { whole, part, value }
    }

    /// Whether this hap begins inside the queried span (vs. a tail fragment).
    pub fn is_onset(&self) -> bool {
        match self.whole {
            Some(whole) => whole.begin == self.part.begin,
            None => true,
        }
    }

    pub fn with_value<U>(&self, f: impl FnOnce(&T) -> U) -> Hap<U> {
        Hap {
            whole: self.whole,
            part: self.part,
            value: f(&self.value),
        }
    }
}

/// Query context handed to a pattern.
#[derive(Debug, Clone)]
pub struct State {
    pub span: TimeSpan,
    pub controls: HashMap<String, f64>,
}

impl State {
    pub fn span(begin: f64, end: f64) -> Self {
        Self {
            span: TimeSpan::new(Fraction::from_float(begin), Fraction::from_float(end)),
            controls: HashMap::new(),
        }
    }
}

/// A pattern is a function from a time span to the events inside it.
pub struct Pattern<T: Clone + Send + Sync> {
    query: Arc<dyn Fn(&State) -> Vec<Hap<T>> + Send + Sync>,
}

impl<T: Clone + Send + Sync> Clone for Pattern<T> {
    fn clone(&self) -> Self {
        Self {
            query: Arc::clone(&self.query),
        }
    }
}

impl<T: Clone + Send + Sync> std::fmt::Debug for Pattern<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern").field("query", &"<closure>").finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    pub fn new(query: impl Fn(&State) -> Vec<Hap<T>> + Send + Sync + 'static) -> Self {
        Self {
            query: Arc::new(query),
        }
    }

    pub fn query(&self, state: &State) -> Vec<Hap<T>> {
        (self.query)(state)
    }

    /// One event per cycle, repeating forever.
    pub fn pure(value: T) -> Self {
        Self::new(move |state| {
            let mut haps = Vec::new();
            let start_cycle = state.span.begin.floor_cycle();
            let end_cycle = state.span.end.to_float().ceil() as i64;

            for cycle in start_cycle..end_cycle {
                let cycle_begin = Fraction::new(cycle, 1);
                let cycle_end = Fraction::new(cycle + 1, 1);
                if cycle_end > state.span.begin && cycle_begin < state.span.end {
                    haps.push(Hap::new(
                        Some(TimeSpan::new(cycle_begin, cycle_end)),
                        TimeSpan::new(
                            cycle_begin.max(state.span.begin),
                            cycle_end.min(state.span.end),
                        ),
                        value.clone(),
                    ));
                }
            }
            haps
        })
    }

    pub fn silence() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn fmap<U: Clone + Send + Sync + 'static>(
        self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> Pattern<U> {
        let f = Arc::new(f);
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .map(|hap| hap.with_value(|v| f(v.clone())))
                .collect()
        })
    }

    /// Compress the pattern in time: factor 2 plays it twice per cycle.
    pub fn fast(self, factor: f64) -> Self {
        let factor = factor.max(0.001);
        Pattern::new(move |state| {
            let scaled = State {
                span: TimeSpan::new(
                    Fraction::from_float(state.span.begin.to_float() * factor),
                    Fraction::from_float(state.span.end.to_float() * factor),
                ),
                controls: state.controls.clone(),
            };
            self.query(&scaled)
                .into_iter()
                .map(|mut hap| {
                    hap.part = TimeSpan::new(
                        Fraction::from_float(hap.part.begin.to_float() / factor),
                        Fraction::from_float(hap.part.end.to_float() / factor),
                    );
                    if let Some(whole) = hap.whole {
                        hap.whole = Some(TimeSpan::new(
                            Fraction::from_float(whole.begin.to_float() / factor),
                            Fraction::from_float(whole.end.to_float() / factor),
                        ));
                    }
                    hap
                })
                .collect()
        })
    }

    /// Stretch the pattern: factor 2 plays it once every two cycles.
    pub fn slow(self, factor: f64) -> Self {
        self.fast(1.0 / factor.max(0.001))
    }

    /// Shift the pattern later by a fraction of a cycle.
    pub fn late(self, amount: f64) -> Self {
        Pattern::new(move |state| {
            let shifted = State {
                span: TimeSpan::new(
                    Fraction::from_float(state.span.begin.to_float() - amount),
                    Fraction::from_float(state.span.end.to_float() - amount),
                ),
                controls: state.controls.clone(),
            };
            self.query(&shifted)
                .into_iter()
                .map(|mut hap| {
                    hap.part = TimeSpan::new(
                        Fraction::from_float(hap.part.begin.to_float() + amount),
                        Fraction::from_float(hap.part.end.to_float() + amount),
                    );
                    if let Some(whole) = hap.whole {
                        hap.whole = Some(TimeSpan::new(
                            Fraction::from_float(whole.begin.to_float() + amount),
                            Fraction::from_float(whole.end.to_float() + amount),
                        ));
                    }
                    hap
                })
                .collect()
        })
    }

    /// Mirror each cycle: the last event plays first.
    pub fn rev(self) -> Self {
        Pattern::new(move |state| {
            let mut result = Vec::new();
            let start_cycle = state.span.begin.floor_cycle();
            let end_cycle = state.span.end.to_float().ceil() as i64;

            for cycle in start_cycle..end_cycle {
                let cycle_f = cycle as f64;
                let cycle_state = State {
                    span: TimeSpan::new(
                        Fraction::new(cycle, 1),
                        Fraction::new(cycle + 1, 1),
                    ),
                    controls: state.controls.clone(),
                };
                for mut hap in self.query(&cycle_state) {
                    // Reflect the event around the cycle midpoint.
                    let begin = 2.0 * cycle_f + 1.0 - hap.part.end.to_float();
                    let end = 2.0 * cycle_f + 1.0 - hap.part.begin.to_float();
                    hap.part =
                        TimeSpan::new(Fraction::from_float(begin), Fraction::from_float(end));
                    if let Some(whole) = hap.whole {
                        let wb = 2.0 * cycle_f + 1.0 - whole.end.to_float();
                        let we = 2.0 * cycle_f + 1.0 - whole.begin.to_float();
                        hap.whole =
                            Some(TimeSpan::new(Fraction::from_float(wb), Fraction::from_float(we)));
                    }
                    if hap.part.end > state.span.begin && hap.part.begin < state.span.end {
                        result.push(hap);
                    }
                }
            }
            result
        })
    }

    /// Randomly drop events. Seeded from event position, so a given cycle
    /// always drops the same events.
    pub fn degrade_by(self, probability: f64) -> Self {
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .filter(|hap| {
                    let cycle = hap.part.begin.floor_cycle() as u64;
                    let position = (hap.part.begin.to_float() * 1_000_000.0) as u64;
                    let seed = cycle.wrapping_mul(2654435761).wrapping_add(position);
                    StdRng::seed_from_u64(seed).gen::<f64>() >= probability
                })
                .collect()
        })
    }

    pub fn degrade(self) -> Self {
        self.degrade_by(0.5)
    }

    /// Play patterns simultaneously.
    pub fn stack(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        Pattern::new(move |state| patterns.iter().flat_map(|p| p.query(state)).collect())
    }

    /// Subdivide each cycle equally among the given patterns, in order.
    pub fn fastcat(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        let len = patterns.len();
        if len == 0 {
            return Pattern::silence();
        }
        let stretched = Pattern::slowcat(patterns);
        stretched.fast(len as f64)
    }

    /// One pattern per cycle, cycling through the list.
    pub fn slowcat(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        if patterns.is_empty() {
            return Pattern::silence();
        }
        let len = patterns.len();
        Pattern::new(move |state| {
            let mut all = Vec::new();
            let start_cycle = state.span.begin.floor_cycle();
            let end_cycle = state.span.end.to_float().ceil() as i64;

            for cycle in start_cycle..end_cycle {
                let idx = (cycle.rem_euclid(len as i64)) as usize;
                let clipped_begin = Fraction::new(cycle, 1).max(state.span.begin);
                let clipped_end = Fraction::new(cycle + 1, 1).min(state.span.end);
                if clipped_end <= clipped_begin {
                    continue;
                }
                let cycle_state = State {
                    span: TimeSpan::new(clipped_begin, clipped_end),
                    controls: state.controls.clone(),
                };
                all.extend(patterns[idx].query(&cycle_state));
            }
            all
        })
    }

    /// Euclidean rhythm: distribute `pulses` of `value` maximally evenly over
    /// `steps` slots, optionally rotated.
    pub fn euclid(value: T, pulses: usize, steps: usize, rotation: i32) -> Pattern<T> {
        if pulses == 0 || steps == 0 {
            return Pattern::silence();
        }
        let pulses = pulses.min(steps);
        let mut slots = vec![false; steps];
        for (i, slot) in slots.iter_mut().enumerate() {
            // Bresenham spacing, matching the classic Bjorklund output.
            *slot = (i * pulses) % steps < pulses;
        }
        if rotation != 0 {
            let rot = ((rotation % steps as i32) + steps as i32) as usize % steps;
            slots.rotate_left(rot);
        }

        let step = 1.0 / steps as f64;
        Pattern::new(move |state| {
            let mut haps = Vec::new();
            let start_cycle = state.span.begin.floor_cycle();
            let end_cycle = state.span.end.to_float().ceil() as i64;
            for cycle in start_cycle..end_cycle {
                for (i, &active) in slots.iter().enumerate() {
                    if !active {
                        continue;
                    }
                    let begin = cycle as f64 + i as f64 * step;
                    let end = begin + step;
                    if begin < state.span.end.to_float() && end > state.span.begin.to_float() {
                        haps.push(Hap::new(
                            Some(TimeSpan::new(
                                Fraction::from_float(begin),
                                Fraction::from_float(end),
                            )),
                            TimeSpan::new(
                                Fraction::from_float(begin.max(state.span.begin.to_float())),
                                Fraction::from_float(end.min(state.span.end.to_float())),
                            ),
                            value.clone(),
                        ));
                    }
                }
            }
            haps
        })
    }

    /// Onsets that begin inside `span`, sorted by onset time.
    pub fn onsets_in(&self, begin: f64, end: f64) -> Vec<Hap<T>> {
        let state = State::span(begin, end);
        let mut haps: Vec<_> = self
            .query(&state)
            .into_iter()
            .filter(|h| h.is_onset())
            .collect();
        haps.sort_by(|a, b| a.part.begin.cmp(&b.part.begin));
        haps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(haps: &[Hap<String>]) -> Vec<String> {
        haps.iter().map(|h| h.value.clone()).collect()
    }

    #[test]
    fn pure_repeats_once_per_cycle() {
        let p = Pattern::pure("bd".to_string());
        let haps = p.query(&State::span(0.0, 2.0));
        assert_eq!(haps.len(), 2);
        assert_eq!(haps[0].whole.unwrap().begin, Fraction::new(0, 1));
        assert_eq!(haps[1].whole.unwrap().begin, Fraction::new(1, 1));
    }

    #[test]
    fn silence_has_no_events() {
        let p: Pattern<String> = Pattern::silence();
        assert!(p.query(&State::span(0.0, 4.0)).is_empty());
    }

    #[test]
    fn fastcat_subdivides_the_cycle() {
        let p = Pattern::fastcat(vec![
            Pattern::pure("bd".to_string()),
            Pattern::pure("hh".to_string()),
        ]);
        let haps = p.onsets_in(0.0, 1.0);
        assert_eq!(values(&haps), vec!["bd", "hh"]);
        assert_eq!(haps[0].whole.unwrap().begin.to_float(), 0.0);
        assert!((haps[1].whole.unwrap().begin.to_float() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fast_doubles_events_per_cycle() {
        let p = Pattern::pure("bd".to_string()).fast(2.0);
        assert_eq!(p.onsets_in(0.0, 1.0).len(), 2);
    }

    #[test]
    fn slow_halves_events() {
        let p = Pattern::pure("bd".to_string()).slow(2.0);
        assert_eq!(p.onsets_in(0.0, 2.0).len(), 1);
    }

    #[test]
    fn slowcat_alternates_cycles() {
        let p = Pattern::slowcat(vec![
            Pattern::pure("bd".to_string()),
            Pattern::pure("sn".to_string()),
        ]);
        assert_eq!(values(&p.onsets_in(0.0, 1.0)), vec!["bd"]);
        assert_eq!(values(&p.onsets_in(1.0, 2.0)), vec!["sn"]);
        assert_eq!(values(&p.onsets_in(2.0, 3.0)), vec!["bd"]);
    }

    #[test]
    fn stack_layers_patterns() {
        let p = Pattern::stack(vec![
            Pattern::pure("bd".to_string()),
            Pattern::pure("hh".to_string()).fast(2.0),
        ]);
        assert_eq!(p.onsets_in(0.0, 1.0).len(), 3);
    }

    #[test]
    fn rev_mirrors_the_cycle() {
        let p = Pattern::fastcat(vec![
            Pattern::pure("bd".to_string()),
            Pattern::pure("sn".to_string()),
        ])
        .rev();
        let haps = p.onsets_in(0.0, 1.0);
        assert_eq!(values(&haps), vec!["sn", "bd"]);
    }

    #[test]
    fn euclid_three_eight() {
        let p = Pattern::euclid("bd".to_string(), 3, 8, 0);
        let haps = p.onsets_in(0.0, 1.0);
        let onsets: Vec<f64> = haps.iter().map(|h| h.part.begin.to_float()).collect();
        assert_eq!(haps.len(), 3);
        assert!((onsets[0] - 0.0).abs() < 1e-6);
        assert!((onsets[1] - 3.0 / 8.0).abs() < 1e-6);
        assert!((onsets[2] - 6.0 / 8.0).abs() < 1e-6);
    }

    #[test]
    fn degrade_is_deterministic() {
        let p = Pattern::pure("hh".to_string()).fast(16.0).degrade();
        let a = p.onsets_in(0.0, 1.0).len();
        let b = p.onsets_in(0.0, 1.0).len();
        assert_eq!(a, b);
        assert!(a < 16, "degrade should drop some events");
    }

    #[test]
    fn late_shifts_onsets() {
        let p = Pattern::pure("bd".to_string()).late(0.25);
        let haps = p.onsets_in(0.0, 1.0);
        assert_eq!(haps.len(), 1);
        assert!((haps[0].whole.unwrap().begin.to_float() - 0.25).abs() < 1e-6);
    }
}
