//! Band definitions per region family

mod as923;
mod cn470;
mod eu;
mod in865;
mod kr920;
mod us;

use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    Band, Beacon, BeaconFrequency, CfListType, ChMaskFormat, Channel, DataRate, MaxPayload,
    PhyVersion, Rx1ChannelRule, Rx1DataRateRule, Rx2Parameters, SubBand,
};

pub const EU_863_870: &str = "EU_863_870";
pub const EU_433: &str = "EU_433";
pub const US_902_928: &str = "US_902_928";
pub const AU_915_928: &str = "AU_915_928";
pub const AS_923: &str = "AS_923";
pub const AS_923_2: &str = "AS_923_2";
pub const AS_923_3: &str = "AS_923_3";
pub const CN_470_510: &str = "CN_470_510";
pub const CN_470_510_26_A: &str = "CN_470_510_26_A";
pub const KR_920_923: &str = "KR_920_923";
pub const IN_865_867: &str = "IN_865_867";

/// Builds every band at every revision it is defined for
pub(super) fn all() -> Vec<Band> {
    let mut bands = Vec::new();
    bands.extend(eu::eu_863_870());
    bands.extend(eu::eu_433());
    bands.extend(us::us_902_928());
    bands.extend(us::au_915_928());
    bands.extend(as923::as_923());
    bands.extend(cn470::cn_470_510());
    bands.extend(cn470::cn_470_510_26_a());
    bands.extend(kr920::kr_920_923());
    bands.extend(in865::in_865_867());
    bands
}

const EIRP_DELTA: f32 = 2.15;

/// Fields shared by most bands; region definitions override what differs
fn template(id: &'static str, version: PhyVersion) -> Band {
    Band {
        id,
        version,
        enable_adr: true,
        max_uplink_channels: 16,
        uplink_channels: Vec::new(),
        max_downlink_channels: 16,
        downlink_channels: Vec::new(),
        sub_bands: Vec::new(),
        data_rates: BTreeMap::new(),
        max_adr_data_rate_index: 5,
        receive_delay_1: Duration::from_secs(1),
        receive_delay_2: Duration::from_secs(2),
        join_accept_delay_1: Duration::from_secs(5),
        join_accept_delay_2: Duration::from_secs(6),
        max_fcnt_gap: 16384,
        adr_ack_limit: 64,
        adr_ack_delay: 32,
        min_retransmit_timeout: Duration::from_secs(1),
        max_retransmit_timeout: Duration::from_secs(3),
        default_max_eirp: 16.0 + EIRP_DELTA,
        tx_offsets: tx_offsets(8, 2.0),
        lora_coding_rate: "4/5",
        freq_multiplier: 100,
        implements_cf_list: true,
        cf_list_type: CfListType::Frequencies,
        tx_param_setup_req_support: false,
        rx1_data_rate: Rx1DataRateRule::Subtract { max_offset: 5 },
        rx1_channel: Rx1ChannelRule::Identity,
        ch_mask_format: ChMaskFormat::Sixteen,
        default_rx2: Rx2Parameters {
            data_rate_index: 0,
            frequency: 869_525_000,
        },
        beacon: Beacon {
            data_rate_index: 3,
            coding_rate: "4/5",
            frequency: BeaconFrequency::Fixed(869_525_000),
        },
        ping_slot_frequency: None,
    }
}

/// `count` offsets of `step` dB, starting at 0 dB
fn tx_offsets(count: usize, step: f32) -> Vec<f32> {
    (0..count).map(|i| -(i as f32) * step).collect()
}

/// `count` channels spaced `step` Hz apart from `first`
fn channel_range(first: u64, step: u64, count: u64, min_dr: u8, max_dr: u8) -> Vec<Channel> {
    (0..count)
        .map(|i| Channel {
            frequency: first + i * step,
            min_data_rate: min_dr,
            max_data_rate: max_dr,
        })
        .collect()
}

fn sub_band(min: u64, max: u64, duty_cycle: f32, max_eirp: f32) -> SubBand {
    SubBand {
        min_frequency: min,
        max_frequency: max,
        duty_cycle,
        max_eirp,
    }
}

fn channels(frequencies: &[u64], min_dr: u8, max_dr: u8) -> Vec<Channel> {
    frequencies
        .iter()
        .map(|frequency| Channel {
            frequency: *frequency,
            min_data_rate: min_dr,
            max_data_rate: max_dr,
        })
        .collect()
}

/// LoRa DR0-DR5 at 125 kHz (SF12 to SF7) with the common payload limits
fn lora_125_data_rates() -> BTreeMap<u8, DataRate> {
    let payloads = [59, 59, 59, 123, 230, 230];
    (0..6u8)
        .map(|i| {
            (
                i,
                DataRate::lora(12 - i, 125_000, MaxPayload::Constant(payloads[i as usize])),
            )
        })
        .collect()
}
