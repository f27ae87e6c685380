use std::collections::BTreeMap;

use super::{
    channel_range, sub_band, template, tx_offsets, Band, Beacon, BeaconFrequency, CfListType,
    ChMaskFormat, DataRate, MaxPayload, PhyVersion, Rx1ChannelRule, Rx1DataRateRule,
    Rx2Parameters, AU_915_928, EIRP_DELTA, US_902_928,
};

static US_RX1_DATA_RATES: [&[u8]; 5] = [
    &[10, 9, 8, 8],
    &[11, 10, 9, 8],
    &[12, 11, 10, 9],
    &[13, 12, 11, 10],
    &[13, 13, 12, 11],
];

static AU_RX1_DATA_RATES: [&[u8]; 7] = [
    &[8, 8, 8, 8, 8, 8],
    &[9, 8, 8, 8, 8, 8],
    &[10, 9, 8, 8, 8, 8],
    &[11, 10, 9, 8, 8, 8],
    &[12, 11, 10, 9, 8, 8],
    &[13, 12, 11, 10, 9, 8],
    &[13, 13, 12, 11, 10, 9],
];

/// Eight 500 kHz downlink channels from 923.3 MHz
fn downlink_channels() -> Vec<super::Channel> {
    channel_range(923_300_000, 600_000, 8, 8, 13)
}

/// DR8-DR13: LoRa SF12 to SF7 at 500 kHz
fn insert_wide_downlink_rates(rates: &mut BTreeMap<u8, DataRate>) {
    let payloads = [61, 137, 250, 250, 250, 250];
    for (i, payload) in payloads.into_iter().enumerate() {
        let i = i as u8;
        rates.insert(8 + i, DataRate::lora(12 - i, 500_000, MaxPayload::Constant(payload)));
    }
}

fn hopping_beacon() -> Beacon {
    Beacon {
        data_rate_index: 8,
        coding_rate: "4/5",
        frequency: BeaconFrequency::Hopping {
            base: 923_300_000,
            step: 600_000,
            channels: 8,
        },
    }
}

pub(super) fn us_902_928() -> Vec<Band> {
    PhyVersion::ALL
        .into_iter()
        .map(|version| {
            let mut uplink_channels = channel_range(902_300_000, 200_000, 64, 0, 3);
            uplink_channels.extend(channel_range(903_000_000, 1_600_000, 8, 4, 4));

            let mut data_rates = BTreeMap::new();
            let payloads = [19, 61, 133, 250];
            for (i, payload) in payloads.into_iter().enumerate() {
                let i = i as u8;
                data_rates.insert(i, DataRate::lora(10 - i, 125_000, MaxPayload::Constant(payload)));
            }
            data_rates.insert(4, DataRate::lora(8, 500_000, MaxPayload::Constant(250)));
            insert_wide_downlink_rates(&mut data_rates);

            Band {
                max_uplink_channels: 72,
                uplink_channels,
                max_downlink_channels: 8,
                downlink_channels: downlink_channels(),
                sub_bands: vec![sub_band(902_000_000, 928_000_000, 1.0, 30.0 + EIRP_DELTA)],
                data_rates,
                max_adr_data_rate_index: 3,
                default_max_eirp: 30.0,
                tx_offsets: tx_offsets(15, 2.0),
                implements_cf_list: version >= PhyVersion::Rp001V1_1RevA,
                cf_list_type: CfListType::ChannelMasks,
                rx1_data_rate: Rx1DataRateRule::Table(&US_RX1_DATA_RATES),
                rx1_channel: Rx1ChannelRule::Modulo(8),
                ch_mask_format: ChMaskFormat::SeventyTwo,
                default_rx2: Rx2Parameters {
                    data_rate_index: 8,
                    frequency: 923_300_000,
                },
                beacon: hopping_beacon(),
                ..template(US_902_928, version)
            }
        })
        .collect()
}

pub(super) fn au_915_928() -> Vec<Band> {
    PhyVersion::range(PhyVersion::Rp001V1_0_2, PhyVersion::Rp002V1_0_0)
        .map(|version| {
            let mut uplink_channels = channel_range(915_200_000, 200_000, 64, 0, 5);
            uplink_channels.extend(channel_range(915_900_000, 1_600_000, 8, 6, 6));

            let mut data_rates = super::lora_125_data_rates();
            data_rates.insert(6, DataRate::lora(8, 500_000, MaxPayload::Constant(230)));
            insert_wide_downlink_rates(&mut data_rates);

            Band {
                max_uplink_channels: 72,
                uplink_channels,
                max_downlink_channels: 8,
                downlink_channels: downlink_channels(),
                sub_bands: vec![sub_band(915_000_000, 928_000_000, 1.0, 30.0 + EIRP_DELTA)],
                data_rates,
                default_max_eirp: 30.0,
                tx_offsets: tx_offsets(15, 2.0),
                implements_cf_list: version >= PhyVersion::Rp001V1_1RevA,
                cf_list_type: CfListType::ChannelMasks,
                tx_param_setup_req_support: version >= PhyVersion::Rp001V1_0_2RevB,
                rx1_data_rate: Rx1DataRateRule::Table(&AU_RX1_DATA_RATES),
                rx1_channel: Rx1ChannelRule::Modulo(8),
                ch_mask_format: ChMaskFormat::SeventyTwo,
                default_rx2: Rx2Parameters {
                    data_rate_index: 8,
                    frequency: 923_300_000,
                },
                beacon: hopping_beacon(),
                ..template(AU_915_928, version)
            }
        })
        .collect()
}
