use super::{
    channels, lora_125_data_rates, sub_band, template, tx_offsets, Band, Beacon, BeaconFrequency,
    DataRate, MaxPayload, PhyVersion, Rx1DataRateRule, Rx2Parameters, IN_865_867,
};

pub(super) fn in_865_867() -> Vec<Band> {
    let defaults = [865_062_500, 865_402_500, 865_985_000];
    PhyVersion::range(PhyVersion::Rp001V1_0_2RevB, PhyVersion::Rp002V1_0_0)
        .map(|version| {
            // DR6 is reserved
            let mut data_rates = lora_125_data_rates();
            data_rates.insert(7, DataRate::fsk(50_000, MaxPayload::Constant(230)));

            Band {
                uplink_channels: channels(&defaults, 0, 5),
                downlink_channels: channels(&defaults, 0, 5),
                sub_bands: vec![sub_band(865_000_000, 867_000_000, 1.0, 30.0)],
                data_rates,
                default_max_eirp: 30.0,
                tx_offsets: tx_offsets(11, 2.0),
                rx1_data_rate: Rx1DataRateRule::FoldedOffset {
                    max_offset: 7,
                    dwell_min: 0,
                    max_data_rate: 5,
                },
                default_rx2: Rx2Parameters {
                    data_rate_index: 2,
                    frequency: 866_550_000,
                },
                beacon: Beacon {
                    data_rate_index: 4,
                    coding_rate: "4/5",
                    frequency: BeaconFrequency::Fixed(866_550_000),
                },
                ping_slot_frequency: Some(866_550_000),
                ..template(IN_865_867, version)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;

    #[test]
    fn test_in_865_folded_offsets() {
        let band = &in_865_867()[0];
        assert_eq!(band.compute_rx1_data_rate(2, 6, false).unwrap(), 3);
        assert_eq!(band.compute_rx1_data_rate(0, 3, true).unwrap(), 0);
        assert!(matches!(band.data_rate(6), Err(Error::DataRateOutOfRange { .. })));
    }
}
