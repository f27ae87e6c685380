use std::collections::BTreeMap;

use super::{
    channels, sub_band, template, Band, Beacon, BeaconFrequency, DataRate, MaxPayload,
    PhyVersion, Rx1DataRateRule, Rx2Parameters, AS_923, AS_923_2, AS_923_3, EIRP_DELTA,
};

/// Frequency offset of each AS923 group from the 923.2 MHz base plan
const GROUPS: [(&str, i64); 3] = [(AS_923, 0), (AS_923_2, -1_800_000), (AS_923_3, -6_600_000)];

fn data_rates() -> BTreeMap<u8, DataRate> {
    let dwell = |no_dwell, dwell| MaxPayload::DwellTime { no_dwell, dwell };
    BTreeMap::from([
        (0, DataRate::lora(12, 125_000, dwell(59, 0))),
        (1, DataRate::lora(11, 125_000, dwell(59, 0))),
        (2, DataRate::lora(10, 125_000, dwell(123, 19))),
        (3, DataRate::lora(9, 125_000, dwell(123, 61))),
        (4, DataRate::lora(8, 125_000, dwell(230, 133))),
        (5, DataRate::lora(7, 125_000, dwell(230, 250))),
        (6, DataRate::lora(7, 250_000, dwell(230, 250))),
        (7, DataRate::fsk(50_000, dwell(230, 250))),
    ])
}

fn shift(frequency: u64, offset: i64) -> u64 {
    frequency.saturating_add_signed(offset)
}

fn group(id: &'static str, offset: i64, version: PhyVersion) -> Band {
    let defaults = [shift(923_200_000, offset), shift(923_400_000, offset)];
    let beacon_frequency = shift(923_400_000, offset);
    Band {
        uplink_channels: channels(&defaults, 0, 5),
        downlink_channels: channels(&defaults, 0, 5),
        sub_bands: vec![sub_band(
            shift(915_000_000, offset),
            shift(928_000_000, offset),
            0.01,
            16.0 + EIRP_DELTA,
        )],
        data_rates: data_rates(),
        tx_param_setup_req_support: true,
        rx1_data_rate: Rx1DataRateRule::FoldedOffset {
            max_offset: 7,
            dwell_min: 2,
            max_data_rate: 7,
        },
        default_rx2: Rx2Parameters {
            data_rate_index: 2,
            frequency: shift(923_200_000, offset),
        },
        beacon: Beacon {
            data_rate_index: 3,
            coding_rate: "4/5",
            frequency: BeaconFrequency::Fixed(beacon_frequency),
        },
        ping_slot_frequency: Some(beacon_frequency),
        ..template(id, version)
    }
}

pub(super) fn as_923() -> Vec<Band> {
    let mut bands = Vec::new();
    for (id, offset) in GROUPS {
        // the additional groups only exist from RP002 on
        let first = if offset == 0 {
            PhyVersion::Rp001V1_0_2
        } else {
            PhyVersion::Rp002V1_0_0
        };
        bands.extend(
            PhyVersion::range(first, PhyVersion::Rp002V1_0_0).map(|version| group(id, offset, version)),
        );
    }
    bands
}
