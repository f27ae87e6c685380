use super::{
    channels, lora_125_data_rates, sub_band, template, tx_offsets, Band, Beacon, BeaconFrequency,
    PhyVersion, Rx2Parameters, KR_920_923,
};

pub(super) fn kr_920_923() -> Vec<Band> {
    let defaults = [922_100_000, 922_300_000, 922_500_000];
    PhyVersion::range(PhyVersion::Rp001V1_0_2, PhyVersion::Rp002V1_0_0)
        .map(|version| Band {
            uplink_channels: channels(&defaults, 0, 5),
            downlink_channels: channels(&defaults, 0, 5),
            sub_bands: vec![sub_band(920_900_000, 923_300_000, 1.0, 14.0)],
            data_rates: lora_125_data_rates(),
            default_max_eirp: 14.0,
            tx_offsets: tx_offsets(8, 2.0),
            default_rx2: Rx2Parameters {
                data_rate_index: 0,
                frequency: 921_900_000,
            },
            beacon: Beacon {
                data_rate_index: 3,
                coding_rate: "4/5",
                frequency: BeaconFrequency::Fixed(923_100_000),
            },
            ping_slot_frequency: Some(923_100_000),
            ..template(KR_920_923, version)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kr_920_defaults() {
        let bands = kr_920_923();
        assert_eq!(bands.len(), 6);
        assert_eq!(bands[0].default_rx2.frequency, 921_900_000);
        assert_eq!(bands[0].beacon_frequency(0.0, None).unwrap(), 923_100_000);
    }
}
