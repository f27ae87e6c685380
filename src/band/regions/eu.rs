use std::collections::BTreeMap;

use super::{
    channels, lora_125_data_rates, sub_band, template, tx_offsets, Band, Beacon, BeaconFrequency,
    DataRate, MaxPayload, PhyVersion, Rx2Parameters, EIRP_DELTA, EU_433, EU_863_870,
};

fn eu_data_rates() -> BTreeMap<u8, DataRate> {
    let mut rates = lora_125_data_rates();
    rates.insert(6, DataRate::lora(7, 250_000, MaxPayload::Constant(230)));
    rates.insert(7, DataRate::fsk(50_000, MaxPayload::Constant(230)));
    rates
}

pub(super) fn eu_863_870() -> Vec<Band> {
    PhyVersion::ALL
        .into_iter()
        .map(|version| Band {
            uplink_channels: channels(&[868_100_000, 868_300_000, 868_500_000], 0, 5),
            downlink_channels: channels(&[868_100_000, 868_300_000, 868_500_000], 0, 5),
            sub_bands: vec![
                sub_band(863_000_000, 865_000_000, 0.001, 14.0 + EIRP_DELTA),
                sub_band(865_000_000, 868_000_000, 0.01, 14.0 + EIRP_DELTA),
                sub_band(868_000_000, 868_600_000, 0.01, 14.0 + EIRP_DELTA),
                sub_band(868_700_000, 869_200_000, 0.001, 14.0 + EIRP_DELTA),
                sub_band(869_400_000, 869_650_000, 0.1, 27.0 + EIRP_DELTA),
                sub_band(869_700_000, 870_000_000, 0.01, 14.0 + EIRP_DELTA),
            ],
            data_rates: eu_data_rates(),
            ping_slot_frequency: Some(869_525_000),
            ..template(EU_863_870, version)
        })
        .collect()
}

pub(super) fn eu_433() -> Vec<Band> {
    PhyVersion::ALL
        .into_iter()
        .map(|version| Band {
            uplink_channels: channels(&[433_175_000, 433_375_000, 433_575_000], 0, 5),
            downlink_channels: channels(&[433_175_000, 433_375_000, 433_575_000], 0, 5),
            sub_bands: vec![sub_band(433_175_000, 434_665_000, 0.01, 10.0 + EIRP_DELTA)],
            data_rates: eu_data_rates(),
            default_max_eirp: 10.0 + EIRP_DELTA,
            tx_offsets: tx_offsets(6, 2.0),
            default_rx2: Rx2Parameters {
                data_rate_index: 0,
                frequency: 434_665_000,
            },
            beacon: Beacon {
                data_rate_index: 3,
                coding_rate: "4/5",
                frequency: BeaconFrequency::Fixed(434_665_000),
            },
            ping_slot_frequency: Some(434_665_000),
            ..template(EU_433, version)
        })
        .collect()
}
