use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::{
    airtime, AbsoluteTime, DeviceClass, DownlinkRequest, DutyCycle, Emission, Slot,
    TransmissionMode, Window,
};
use crate::band::Band;
use crate::core::{Error, Result, SchedulerConfig};
use crate::time::{util::to_micros, ClockModel, ConcentratorTime};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Evaluating,
    Committed,
    Rejected,
}

/// A window a request could be transmitted in, before any checks
#[derive(Debug, Clone, Copy)]
struct Candidate {
    window: Window,
    concentrator_time: ConcentratorTime,
    frequency: u64,
    data_rate_index: u8,
    dwell_time: bool,
}

/// Per-connection downlink scheduler
///
/// Owns the duty-cycle and antenna occupancy of one gateway. A single task
/// drives it, so decisions are serialized against that state.
#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    duty_cycle: DutyCycle,
    antennas: HashMap<u8, Vec<Emission>>,
    state: SchedulerState,
    last_rejection: Option<Error>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            duty_cycle: DutyCycle::new(config.duty_cycle_window),
            config,
            antennas: HashMap::new(),
            state: SchedulerState::Idle,
            last_rejection: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Reason of the most recent rejection
    pub fn last_rejection(&self) -> Option<&Error> {
        self.last_rejection.as_ref()
    }

    pub fn duty_cycle(&self) -> &DutyCycle {
        &self.duty_cycle
    }

    /// Forgets all committed transmissions
    pub fn reset(&mut self) {
        self.duty_cycle.clear();
        self.antennas.clear();
        self.state = SchedulerState::Idle;
    }

    /// Places a downlink in the most preferred eligible window and commits it
    ///
    /// Rejections are returned as-is and never retried; the state returns
    /// to [`SchedulerState::Idle`] with the reason kept in
    /// [`last_rejection`](Self::last_rejection).
    pub fn schedule(
        &mut self,
        request: &DownlinkRequest,
        band: &Band,
        clock: &ClockModel,
        now: DateTime<Utc>,
    ) -> Result<Slot> {
        self.state = SchedulerState::Evaluating;
        match self.evaluate(request, band, clock, now) {
            Ok(slot) => {
                self.commit(&slot);
                self.state = SchedulerState::Committed;
                debug!(
                    window = %slot.window,
                    frequency = slot.frequency,
                    data_rate = slot.data_rate_index,
                    concentrator_time = slot.concentrator_time,
                    antenna = slot.antenna,
                    "Downlink scheduled"
                );
                Ok(slot)
            }
            Err(e) => {
                self.state = SchedulerState::Rejected;
                debug!(error = %e, device_id = %request.device.device_id, "Downlink rejected");
                self.last_rejection = Some(e.clone());
                self.state = SchedulerState::Idle;
                Err(e)
            }
        }
    }

    fn evaluate(
        &mut self,
        request: &DownlinkRequest,
        band: &Band,
        clock: &ClockModel,
        now: DateTime<Utc>,
    ) -> Result<Slot> {
        let now = clock.from_wall_clock(now)?;
        self.prune(now);

        let candidates = candidates(request, band, clock)?;

        let mut eligible = Vec::new();
        let mut first_rejection = None;
        for candidate in candidates {
            match candidate.and_then(|c| self.check(request, band, clock, now, c)) {
                Ok(slot) => eligible.push(slot),
                Err(e) => {
                    trace!(error = %e, "Candidate window rejected");
                    first_rejection.get_or_insert(e);
                }
            }
        }

        eligible.sort_by_key(|slot| (Reverse(slot.priority), slot.concentrator_time, slot.window));
        match eligible.into_iter().next() {
            Some(slot) => Ok(slot),
            None => Err(first_rejection.unwrap_or_else(|| Error::protocol("no candidate window"))),
        }
    }

    fn check(
        &self,
        request: &DownlinkRequest,
        band: &Band,
        clock: &ClockModel,
        now: ConcentratorTime,
        candidate: Candidate,
    ) -> Result<Slot> {
        let data_rate = *band.data_rate(candidate.data_rate_index)?;

        let max = band.max_phy_payload(candidate.data_rate_index, candidate.dwell_time)?;
        if request.payload.len() > max {
            return Err(Error::PayloadTooLarge {
                size: request.payload.len(),
                max,
            });
        }

        let earliest = now + to_micros(self.config.schedule_lead);
        if candidate.concentrator_time < earliest {
            return Err(Error::TooLate {
                late_by_ms: ((earliest - candidate.concentrator_time) / 1000) as u64,
            });
        }

        let airtime = airtime(&data_rate, request.payload.len(), band.lora_coding_rate)?;
        let sub_band = *band.sub_band_for(candidate.frequency).ok_or(Error::NoSubBand {
            frequency: candidate.frequency,
        })?;

        let emission = Emission {
            start: candidate.concentrator_time,
            end: candidate.concentrator_time + to_micros(airtime),
        };
        self.duty_cycle.check(&sub_band, emission)?;

        let busy = self
            .antennas
            .get(&request.antenna)
            .is_some_and(|emissions| emissions.iter().any(|e| e.overlaps(&emission)));
        if busy {
            return Err(Error::SlotConflict {
                antenna: request.antenna,
            });
        }

        Ok(Slot {
            window: candidate.window,
            concentrator_time: candidate.concentrator_time,
            transmit_at: clock.to_wall_clock(candidate.concentrator_time)?,
            airtime,
            frequency: candidate.frequency,
            data_rate_index: candidate.data_rate_index,
            data_rate,
            antenna: request.antenna,
            priority: request.priority,
            sub_band,
        })
    }

    fn commit(&mut self, slot: &Slot) {
        let emission = slot.emission();
        self.duty_cycle.commit(&slot.sub_band, emission);
        self.antennas.entry(slot.antenna).or_default().push(emission);
    }

    fn prune(&mut self, now: ConcentratorTime) {
        self.duty_cycle.prune(now);
        for emissions in self.antennas.values_mut() {
            emissions.retain(|e| e.end > now);
        }
    }
}

/// Lists the candidate windows of a request in order of preference
///
/// A class A RX1 window whose parameters cannot be derived is kept as an
/// error so that it is reported when RX2 fails too.
fn candidates(
    request: &DownlinkRequest,
    band: &Band,
    clock: &ClockModel,
) -> Result<Vec<Result<Candidate>>> {
    match request.mode {
        TransmissionMode::ClassA {
            uplink,
            rx1_offset,
            dwell_time,
            join_accept,
        } => {
            let (delay_1, delay_2) = if join_accept {
                (band.join_accept_delay_1, band.join_accept_delay_2)
            } else {
                (band.receive_delay_1, band.receive_delay_2)
            };

            let rx1 = band
                .compute_rx1_data_rate(uplink.data_rate_index, rx1_offset, dwell_time)
                .and_then(|data_rate_index| {
                    let frequency = band.rx1_frequency(uplink.frequency, uplink.channel_index)?;
                    Ok(Candidate {
                        window: Window::Rx1,
                        concentrator_time: uplink.concentrator_time + to_micros(delay_1),
                        frequency,
                        data_rate_index,
                        dwell_time,
                    })
                });
            let rx2 = Candidate {
                window: Window::Rx2,
                concentrator_time: uplink.concentrator_time + to_micros(delay_2),
                frequency: band.default_rx2.frequency,
                data_rate_index: band.default_rx2.data_rate_index,
                dwell_time,
            };
            Ok(vec![rx1, Ok(rx2)])
        }
        TransmissionMode::Scheduled {
            at,
            class,
            frequency,
            data_rate_index,
        } => {
            let concentrator_time = match at {
                AbsoluteTime::Wall(wall) => clock.from_wall_clock(wall)?,
                AbsoluteTime::Gps(gps) => clock.from_gps(gps)?,
            };
            let frequency = match (frequency, class) {
                (Some(frequency), _) => frequency,
                (None, DeviceClass::B) => match band.ping_slot_frequency {
                    Some(frequency) => frequency,
                    None => {
                        let gps = clock.to_gps(concentrator_time)?;
                        band.beacon_frequency(gps.as_secs_f64(), None)?
                    }
                },
                (None, _) => band.default_rx2.frequency,
            };
            let data_rate_index = match (data_rate_index, class) {
                (Some(index), _) => index,
                (None, DeviceClass::B) => band.beacon.data_rate_index,
                (None, _) => band.default_rx2.data_rate_index,
            };
            Ok(vec![Ok(Candidate {
                window: Window::Scheduled,
                concentrator_time,
                frequency,
                data_rate_index,
                dwell_time: false,
            })])
        }
    }
}
