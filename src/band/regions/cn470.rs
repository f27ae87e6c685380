use super::{
    channel_range, lora_125_data_rates, sub_band, template, Band, Beacon, BeaconFrequency,
    CfListType, ChMaskFormat, PhyVersion, Rx1ChannelRule, Rx1DataRateRule, Rx2Parameters,
    CN_470_510, CN_470_510_26_A, EIRP_DELTA,
};

/// Downlink index is the uplink index minus the offset, floored at DR0
static RX1_DATA_RATES: [&[u8]; 6] = [
    &[0, 0, 0, 0, 0, 0],
    &[1, 0, 0, 0, 0, 0],
    &[2, 1, 0, 0, 0, 0],
    &[3, 2, 1, 0, 0, 0],
    &[4, 3, 2, 1, 0, 0],
    &[5, 4, 3, 2, 1, 0],
];

fn sub_bands() -> Vec<super::SubBand> {
    vec![sub_band(470_000_000, 510_000_000, 1.0, 17.0 + EIRP_DELTA)]
}

pub(super) fn cn_470_510() -> Vec<Band> {
    PhyVersion::range(PhyVersion::Ts001V1_0_1, PhyVersion::Rp001V1_1RevB)
        .map(|version| Band {
            max_uplink_channels: 96,
            uplink_channels: channel_range(470_300_000, 200_000, 96, 0, 5),
            max_downlink_channels: 48,
            downlink_channels: channel_range(500_300_000, 200_000, 48, 0, 5),
            sub_bands: sub_bands(),
            data_rates: lora_125_data_rates(),
            default_max_eirp: 17.0 + EIRP_DELTA,
            cf_list_type: CfListType::ChannelMasks,
            implements_cf_list: version >= PhyVersion::Rp001V1_1RevA,
            rx1_data_rate: Rx1DataRateRule::Table(&RX1_DATA_RATES),
            rx1_channel: Rx1ChannelRule::Modulo(48),
            ch_mask_format: ChMaskFormat::NinetySix,
            default_rx2: Rx2Parameters {
                data_rate_index: 0,
                frequency: 505_300_000,
            },
            beacon: Beacon {
                data_rate_index: 2,
                coding_rate: "4/5",
                frequency: BeaconFrequency::Hopping {
                    base: 508_300_000,
                    step: 200_000,
                    channels: 8,
                },
            },
            ..template(CN_470_510, version)
        })
        .collect()
}

/// The 26 MHz type A plan: 48 uplink and 24 downlink channels
pub(super) fn cn_470_510_26_a() -> Vec<Band> {
    vec![Band {
        max_uplink_channels: 48,
        uplink_channels: channel_range(470_300_000, 200_000, 48, 0, 5),
        max_downlink_channels: 24,
        downlink_channels: channel_range(483_900_000, 200_000, 24, 0, 5),
        sub_bands: sub_bands(),
        data_rates: lora_125_data_rates(),
        default_max_eirp: 17.0 + EIRP_DELTA,
        cf_list_type: CfListType::ChannelMasks,
        rx1_data_rate: Rx1DataRateRule::Table(&RX1_DATA_RATES),
        rx1_channel: Rx1ChannelRule::Modulo(24),
        ch_mask_format: ChMaskFormat::FortyEight,
        default_rx2: Rx2Parameters {
            data_rate_index: 0,
            frequency: 492_500_000,
        },
        beacon: Beacon {
            data_rate_index: 2,
            coding_rate: "4/5",
            frequency: BeaconFrequency::ChannelPlanOffset,
        },
        ..template(CN_470_510_26_A, PhyVersion::Rp002V1_0_0)
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cn_470_rx1_channel() {
        let band = &cn_470_510()[0];
        assert_eq!(band.rx1_channel(95), 47);
        assert_eq!(band.rx1_frequency(489_300_000, Some(95)).unwrap(), 509_700_000);
        assert_eq!(band.compute_rx1_data_rate(5, 2, false).unwrap(), 3);
        assert_eq!(band.compute_rx1_data_rate(1, 5, false).unwrap(), 0);
    }

    #[test]
    fn test_cn_470_26_a() {
        let bands = cn_470_510_26_a();
        assert_eq!(bands.len(), 1);
        let band = &bands[0];
        assert_eq!(band.uplink_channels.len(), 48);
        assert_eq!(band.rx1_channel(30), 6);
        assert_eq!(band.rx1_frequency(476_300_000, Some(30)).unwrap(), 485_100_000);
    }
}
