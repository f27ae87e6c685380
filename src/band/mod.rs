//! Regional band parameters
//!
//! A [`Band`] is an immutable description of one LoRaWAN region at one
//! regional parameters revision: its channels, data rates, sub-band limits,
//! timing constants and the per-family rules that derive RX1 parameters,
//! encode channel masks and place beacons. Bands are only obtained through
//! the process-wide [`BandRegistry`], which is built once and never mutated.
//!
//! # Examples
//!
//! ```
//! use lorawan_gs::band::{self, EU_863_870};
//!
//! let eu = band::get_latest(EU_863_870).unwrap();
//! // DR5 uplink with RX1 offset 2 is answered on DR3
//! assert_eq!(eu.compute_rx1_data_rate(5, 2, false).unwrap(), 3);
//! ```

mod chmask;
mod regions;
mod registry;
mod rx1;

pub use self::chmask::{ChMaskBlock, ChMaskFormat};
pub use self::regions::{
    AS_923, AS_923_2, AS_923_3, AU_915_928, CN_470_510, CN_470_510_26_A, EU_433, EU_863_870,
    IN_865_867, KR_920_923, US_902_928,
};
pub use self::registry::{get, get_latest, BandRegistry, LATEST_SUPPORTED_VERSION};
pub use self::rx1::{Rx1ChannelRule, Rx1DataRateRule};

use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result, PHY_PAYLOAD_OVERHEAD};

/// LoRaWAN regional parameters revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PhyVersion {
    Ts001V1_0,
    Ts001V1_0_1,
    Rp001V1_0_2,
    Rp001V1_0_2RevB,
    Rp001V1_0_3RevA,
    Rp001V1_1RevA,
    Rp001V1_1RevB,
    Rp002V1_0_0,
}

impl PhyVersion {
    /// All known revisions in ascending order
    pub const ALL: [PhyVersion; 8] = [
        PhyVersion::Ts001V1_0,
        PhyVersion::Ts001V1_0_1,
        PhyVersion::Rp001V1_0_2,
        PhyVersion::Rp001V1_0_2RevB,
        PhyVersion::Rp001V1_0_3RevA,
        PhyVersion::Rp001V1_1RevA,
        PhyVersion::Rp001V1_1RevB,
        PhyVersion::Rp002V1_0_0,
    ];

    /// Returns the revisions from `first` up to and including `last`
    pub fn range(first: PhyVersion, last: PhyVersion) -> impl Iterator<Item = PhyVersion> {
        Self::ALL.into_iter().filter(move |v| *v >= first && *v <= last)
    }
}

impl fmt::Display for PhyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhyVersion::Ts001V1_0 => "TS001 v1.0",
            PhyVersion::Ts001V1_0_1 => "TS001 v1.0.1",
            PhyVersion::Rp001V1_0_2 => "RP001 v1.0.2",
            PhyVersion::Rp001V1_0_2RevB => "RP001 v1.0.2 Rev B",
            PhyVersion::Rp001V1_0_3RevA => "RP001 v1.0.3 Rev A",
            PhyVersion::Rp001V1_1RevA => "RP001 v1.1 Rev A",
            PhyVersion::Rp001V1_1RevB => "RP001 v1.1 Rev B",
            PhyVersion::Rp002V1_0_0 => "RP002 v1.0.0",
        };
        f.write_str(s)
    }
}

/// Radio modulation of a data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Modulation {
    /// LoRa chirp spread spectrum
    LoRa {
        /// Spreading factor (7-12)
        spreading_factor: u8,
        /// Bandwidth in Hz
        bandwidth: u32,
    },
    /// Frequency shift keying
    Fsk {
        /// Bit rate in bits per second
        bit_rate: u32,
    },
}

/// Maximum MAC payload size of a data rate, depending on the dwell time limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxPayload {
    /// Same limit with and without dwell time restrictions
    Constant(u16),
    /// Separate limits without and with dwell time restrictions
    DwellTime { no_dwell: u16, dwell: u16 },
}

impl MaxPayload {
    /// Returns the maximum MAC payload size in bytes
    pub fn size(&self, dwell_time: bool) -> u16 {
        match *self {
            MaxPayload::Constant(size) => size,
            MaxPayload::DwellTime { no_dwell, dwell } => {
                if dwell_time {
                    dwell
                } else {
                    no_dwell
                }
            }
        }
    }
}

/// Parameters of one data rate index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataRate {
    /// Modulation parameters
    pub modulation: Modulation,
    /// Maximum MAC payload size
    pub max_mac_payload: MaxPayload,
}

impl DataRate {
    /// Creates a LoRa data rate
    pub const fn lora(spreading_factor: u8, bandwidth: u32, max_mac_payload: MaxPayload) -> Self {
        DataRate {
            modulation: Modulation::LoRa {
                spreading_factor,
                bandwidth,
            },
            max_mac_payload,
        }
    }

    /// Creates an FSK data rate
    pub const fn fsk(bit_rate: u32, max_mac_payload: MaxPayload) -> Self {
        DataRate {
            modulation: Modulation::Fsk { bit_rate },
            max_mac_payload,
        }
    }
}

/// A channel definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    /// Center frequency in Hz
    pub frequency: u64,
    /// Lowest data rate index allowed on the channel
    pub min_data_rate: u8,
    /// Highest data rate index allowed on the channel
    pub max_data_rate: u8,
}

/// A contiguous frequency range with its own regulatory limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubBand {
    /// Lowest frequency in Hz (inclusive)
    pub min_frequency: u64,
    /// Highest frequency in Hz (inclusive)
    pub max_frequency: u64,
    /// Fraction of time the sub-band may be occupied (0-1]
    pub duty_cycle: f32,
    /// Maximum EIRP in dBm
    pub max_eirp: f32,
}

impl SubBand {
    /// Returns whether the frequency falls within this sub-band
    pub fn contains(&self, frequency: u64) -> bool {
        frequency >= self.min_frequency && frequency <= self.max_frequency
    }
}

/// Default RX2 window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rx2Parameters {
    pub data_rate_index: u8,
    pub frequency: u64,
}

/// How the beacon frequency of a band is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconFrequency {
    /// A single fixed frequency
    Fixed(u64),
    /// Hops over `channels` frequencies every beacon period
    Hopping { base: u64, step: u64, channels: u64 },
    /// Selected by a channel plan offset that is not part of the band
    ChannelPlanOffset,
}

/// Class B beacon parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Beacon {
    pub data_rate_index: u8,
    pub coding_rate: &'static str,
    pub frequency: BeaconFrequency,
}

/// Beacon period in seconds
pub const BEACON_PERIOD_SECS: f64 = 128.0;

/// Content of the CFList in join-accept messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfListType {
    Frequencies,
    ChannelMasks,
}

/// Immutable description of one regional band at one revision
#[derive(Debug, Clone)]
pub struct Band {
    pub id: &'static str,
    pub version: PhyVersion,

    pub enable_adr: bool,

    pub max_uplink_channels: usize,
    pub uplink_channels: Vec<Channel>,

    pub max_downlink_channels: usize,
    pub downlink_channels: Vec<Channel>,

    pub sub_bands: Vec<SubBand>,

    pub data_rates: BTreeMap<u8, DataRate>,
    pub max_adr_data_rate_index: u8,

    pub receive_delay_1: Duration,
    pub receive_delay_2: Duration,
    pub join_accept_delay_1: Duration,
    pub join_accept_delay_2: Duration,
    pub max_fcnt_gap: u32,
    pub adr_ack_limit: u16,
    pub adr_ack_delay: u16,
    pub min_retransmit_timeout: Duration,
    pub max_retransmit_timeout: Duration,

    pub default_max_eirp: f32,
    pub tx_offsets: Vec<f32>,

    pub lora_coding_rate: &'static str,

    pub freq_multiplier: u64,
    pub implements_cf_list: bool,
    pub cf_list_type: CfListType,
    pub tx_param_setup_req_support: bool,

    pub rx1_data_rate: Rx1DataRateRule,
    pub rx1_channel: Rx1ChannelRule,
    pub ch_mask_format: ChMaskFormat,

    pub default_rx2: Rx2Parameters,
    pub beacon: Beacon,
    pub ping_slot_frequency: Option<u64>,
}

impl Band {
    /// Returns the highest data rate index defined by the band
    pub fn max_data_rate_index(&self) -> u8 {
        self.data_rates.keys().next_back().copied().unwrap_or(0)
    }

    /// Looks up the parameters of a data rate index
    pub fn data_rate(&self, index: u8) -> Result<&DataRate> {
        self.data_rates.get(&index).ok_or(Error::DataRateOutOfRange {
            index,
            max: self.max_data_rate_index(),
        })
    }

    /// Maximum PHY payload (MAC payload plus header and MIC) for a data rate
    pub fn max_phy_payload(&self, index: u8, dwell_time: bool) -> Result<usize> {
        let data_rate = self.data_rate(index)?;
        Ok(data_rate.max_mac_payload.size(dwell_time) as usize + PHY_PAYLOAD_OVERHEAD)
    }

    /// Derives the RX1 downlink data rate index from the uplink data rate
    /// index, the RX1 data rate offset and the dwell time flag
    pub fn compute_rx1_data_rate(&self, index: u8, offset: u8, dwell_time: bool) -> Result<u8> {
        self.rx1_data_rate
            .compute(index, offset, dwell_time, self.max_data_rate_index())
    }

    /// Range every successful RX1 data rate derivation falls into
    pub fn rx1_data_rate_range(&self, dwell_time: bool) -> RangeInclusive<u8> {
        self.rx1_data_rate
            .range(dwell_time, self.max_data_rate_index())
    }

    /// Derives the RX1 downlink channel index from the uplink channel index
    pub fn rx1_channel(&self, uplink_channel: u8) -> u8 {
        self.rx1_channel.channel(uplink_channel)
    }

    /// Derives the RX1 frequency for an uplink
    ///
    /// Bands with an identity channel mapping answer on the uplink frequency;
    /// the others need the uplink channel index to select a downlink channel.
    pub fn rx1_frequency(&self, uplink_frequency: u64, uplink_channel: Option<u8>) -> Result<u64> {
        match self.rx1_channel {
            Rx1ChannelRule::Identity => Ok(uplink_frequency),
            Rx1ChannelRule::Modulo(_) => {
                let index = uplink_channel.ok_or(Error::UnknownChannel {
                    frequency: uplink_frequency,
                })?;
                self.downlink_channels
                    .get(self.rx1_channel(index) as usize)
                    .map(|channel| channel.frequency)
                    .ok_or(Error::UnknownChannel {
                        frequency: uplink_frequency,
                    })
            }
        }
    }

    /// Returns the index of the default uplink channel on this frequency
    pub fn uplink_channel_index(&self, frequency: u64) -> Option<u8> {
        self.uplink_channels
            .iter()
            .position(|channel| channel.frequency == frequency)
            .and_then(|index| u8::try_from(index).ok())
    }

    /// Returns the sub-band covering the frequency
    pub fn sub_band_for(&self, frequency: u64) -> Option<&SubBand> {
        self.sub_bands.iter().find(|sub_band| sub_band.contains(frequency))
    }

    /// Encodes the set of enabled uplink channels as channel mask blocks
    pub fn generate_ch_masks(&self, enabled: &[bool]) -> Result<Vec<ChMaskBlock>> {
        self.ch_mask_format.generate(enabled)
    }

    /// Decodes channel mask blocks into the set of enabled uplink channels
    pub fn parse_ch_mask(&self, blocks: &[ChMaskBlock]) -> Result<Vec<bool>> {
        self.ch_mask_format.parse(blocks)
    }

    /// Returns whether beacon placement needs an external channel plan offset
    pub fn requires_channel_plan_offset(&self) -> bool {
        matches!(self.beacon.frequency, BeaconFrequency::ChannelPlanOffset)
    }

    /// Computes the beacon frequency for a beacon time (GPS seconds)
    pub fn beacon_frequency(&self, beacon_time: f64, channel_plan_offset: Option<u8>) -> Result<u64> {
        match self.beacon.frequency {
            BeaconFrequency::Fixed(frequency) => Ok(frequency),
            BeaconFrequency::Hopping {
                base,
                step,
                channels,
            } => {
                let period = (beacon_time / BEACON_PERIOD_SECS).floor().max(0.0) as u64;
                Ok(base + (period % channels) * step)
            }
            BeaconFrequency::ChannelPlanOffset => {
                let offset = channel_plan_offset
                    .ok_or_else(|| Error::ChannelPlanOffsetRequired(self.id.to_string()))?;
                self.downlink_channels
                    .get(offset as usize)
                    .map(|channel| channel.frequency)
                    .ok_or_else(|| {
                        Error::config(format!(
                            "channel plan offset {} exceeds {} downlink channels",
                            offset,
                            self.downlink_channels.len()
                        ))
                    })
            }
        }
    }
}
