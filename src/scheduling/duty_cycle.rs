use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::band::SubBand;
use crate::core::{Error, Result};
use crate::time::{util::to_micros, ConcentratorTime};

/// A transmission interval in concentrator time, end exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Emission {
    pub start: ConcentratorTime,
    pub end: ConcentratorTime,
}

impl Emission {
    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Emission) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Part of the emission that falls within `[from, to)`
    fn clipped(&self, from: ConcentratorTime, to: ConcentratorTime) -> i64 {
        (self.end.min(to) - self.start.max(from)).max(0)
    }
}

/// Committed emissions per sub-band within a trailing window
#[derive(Debug)]
pub struct DutyCycle {
    window: i64,
    sub_bands: HashMap<(u64, u64), VecDeque<Emission>>,
}

impl DutyCycle {
    pub fn new(window: Duration) -> Self {
        DutyCycle {
            window: to_micros(window),
            sub_bands: HashMap::new(),
        }
    }

    /// Time on air in the sub-band during the window ending at `at`
    pub fn usage(&self, sub_band: &SubBand, at: ConcentratorTime) -> i64 {
        self.emissions(sub_band)
            .map(|emission| emission.clipped(at - self.window, at))
            .sum()
    }

    /// Checks whether the emission fits within the sub-band's duty cycle
    ///
    /// Every window that would contain the new emission is checked: the one
    /// ending with it and the ones ending with each later committed emission.
    pub fn check(&self, sub_band: &SubBand, emission: Emission) -> Result<()> {
        let budget = (sub_band.duty_cycle as f64 * self.window as f64).round() as i64;

        let window_ends = std::iter::once(emission.end).chain(
            self.emissions(sub_band)
                .map(|committed| committed.end)
                .filter(|end| *end > emission.end && *end - self.window < emission.end),
        );

        for end in window_ends {
            let used = self.usage(sub_band, end) + emission.clipped(end - self.window, end);
            if used > budget {
                return Err(Error::DutyCycleExceeded {
                    min_frequency: sub_band.min_frequency,
                    max_frequency: sub_band.max_frequency,
                });
            }
        }
        Ok(())
    }

    /// Records a committed emission
    pub fn commit(&mut self, sub_band: &SubBand, emission: Emission) {
        self.sub_bands
            .entry(key(sub_band))
            .or_default()
            .push_back(emission);
    }

    /// Forgets emissions that ended before the window preceding `now`
    pub fn prune(&mut self, now: ConcentratorTime) {
        let horizon = now - self.window;
        for emissions in self.sub_bands.values_mut() {
            emissions.retain(|emission| emission.end > horizon);
        }
        self.sub_bands.retain(|_, emissions| !emissions.is_empty());
    }

    /// Drops all state, e.g. after the concentrator counter rolled over
    pub fn clear(&mut self) {
        self.sub_bands.clear();
    }

    fn emissions<'a>(&'a self, sub_band: &SubBand) -> impl Iterator<Item = &'a Emission> + 'a {
        self.sub_bands
            .get(&key(sub_band))
            .into_iter()
            .flat_map(|emissions| emissions.iter())
    }
}

fn key(sub_band: &SubBand) -> (u64, u64) {
    (sub_band.min_frequency, sub_band.max_frequency)
}
