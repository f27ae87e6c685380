use std::ops::RangeInclusive;

use crate::core::{Error, Result};

/// Rule deriving the RX1 downlink data rate from the uplink data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rx1DataRateRule {
    /// Downlink index is the uplink index minus the offset, floored at 0
    Subtract { max_offset: u8 },
    /// Offsets above 5 fold into negative offsets (6 becomes -1, 7 becomes
    /// -2), raising the downlink data rate. The result is clamped to
    /// `max_data_rate`, and with the dwell time limit active it never drops
    /// below `dwell_min`.
    FoldedOffset {
        max_offset: u8,
        dwell_min: u8,
        max_data_rate: u8,
    },
    /// Downlink index looked up by uplink index (row) and offset (column)
    Table(&'static [&'static [u8]]),
}

impl Rx1DataRateRule {
    /// Computes the RX1 data rate index
    ///
    /// `max_index` is the highest data rate index the band defines.
    pub fn compute(&self, index: u8, offset: u8, dwell_time: bool, max_index: u8) -> Result<u8> {
        match *self {
            Rx1DataRateRule::Subtract { max_offset } => {
                check_index(index, max_index)?;
                check_offset(offset, max_offset)?;
                Ok(index.saturating_sub(offset))
            }
            Rx1DataRateRule::FoldedOffset {
                max_offset,
                dwell_min,
                max_data_rate,
            } => {
                check_index(index, max_index)?;
                check_offset(offset, max_offset)?;

                let mut so = offset as i16;
                if so > 5 {
                    so = 5 - so;
                }
                let min = if dwell_time { dwell_min } else { 0 } as i16;
                let si = (index as i16 - so).clamp(min, max_data_rate as i16);
                Ok(si as u8)
            }
            Rx1DataRateRule::Table(rows) => {
                let row = rows.get(index as usize).ok_or(Error::DataRateOutOfRange {
                    index,
                    max: rows.len().saturating_sub(1) as u8,
                })?;
                row.get(offset as usize).copied().ok_or(Error::OffsetOutOfRange {
                    offset,
                    max: row.len().saturating_sub(1) as u8,
                })
            }
        }
    }

    /// Highest uplink index [`compute`](Self::compute) accepts
    pub fn max_uplink_index(&self, max_index: u8) -> u8 {
        match *self {
            Rx1DataRateRule::Table(rows) => rows.len().saturating_sub(1) as u8,
            _ => max_index,
        }
    }

    /// Range every successful [`compute`](Self::compute) result falls into
    pub fn range(&self, dwell_time: bool, max_index: u8) -> RangeInclusive<u8> {
        match *self {
            Rx1DataRateRule::Subtract { .. } => 0..=max_index,
            Rx1DataRateRule::FoldedOffset {
                dwell_min,
                max_data_rate,
                ..
            } => {
                let min = if dwell_time { dwell_min } else { 0 };
                min..=max_data_rate
            }
            Rx1DataRateRule::Table(rows) => {
                let values = rows.iter().flat_map(|row| row.iter().copied());
                let min = values.clone().min().unwrap_or(0);
                let max = values.max().unwrap_or(0);
                min..=max
            }
        }
    }
}

fn check_index(index: u8, max_index: u8) -> Result<()> {
    if index > max_index {
        return Err(Error::DataRateOutOfRange {
            index,
            max: max_index,
        });
    }
    Ok(())
}

fn check_offset(offset: u8, max_offset: u8) -> Result<()> {
    if offset > max_offset {
        return Err(Error::OffsetOutOfRange {
            offset,
            max: max_offset,
        });
    }
    Ok(())
}

/// Rule deriving the RX1 downlink channel from the uplink channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rx1ChannelRule {
    /// RX1 uses the uplink channel
    Identity,
    /// RX1 uses downlink channel `uplink mod n`
    Modulo(u8),
}

impl Rx1ChannelRule {
    pub fn channel(&self, uplink_channel: u8) -> u8 {
        match *self {
            Rx1ChannelRule::Identity => uplink_channel,
            Rx1ChannelRule::Modulo(n) => uplink_channel % n.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{self, PhyVersion, AS_923, AU_915_928, CN_470_510, EU_863_870, IN_865_867, US_902_928};

    #[test]
    fn test_subtract() {
        let rule = Rx1DataRateRule::Subtract { max_offset: 5 };
        assert_eq!(rule.compute(5, 0, false, 7).unwrap(), 5);
        assert_eq!(rule.compute(5, 2, false, 7).unwrap(), 3);
        assert_eq!(rule.compute(1, 5, false, 7).unwrap(), 0);
        // SF7/250 kHz and FSK uplinks answer on their own rate or lower
        assert_eq!(rule.compute(6, 0, false, 7).unwrap(), 6);
        assert_eq!(rule.compute(7, 1, false, 7).unwrap(), 6);
        assert!(matches!(
            rule.compute(5, 6, false, 7),
            Err(Error::OffsetOutOfRange { offset: 6, max: 5 })
        ));
        assert!(matches!(
            rule.compute(8, 0, false, 7),
            Err(Error::DataRateOutOfRange { index: 8, max: 7 })
        ));
    }

    #[test]
    fn test_folded_offset() {
        let rule = Rx1DataRateRule::FoldedOffset {
            max_offset: 7,
            dwell_min: 2,
            max_data_rate: 7,
        };
        assert_eq!(rule.compute(5, 0, false, 7).unwrap(), 5);
        assert_eq!(rule.compute(3, 2, false, 7).unwrap(), 1);
        // offset 6 folds to -1
        assert_eq!(rule.compute(3, 6, false, 7).unwrap(), 4);
        assert_eq!(rule.compute(5, 6, false, 7).unwrap(), 6);
        // offset 7 folds to -2 and is clamped at the highest data rate
        assert_eq!(rule.compute(4, 7, false, 7).unwrap(), 6);
        assert_eq!(rule.compute(6, 7, false, 7).unwrap(), 7);
        assert_eq!(rule.compute(7, 0, false, 7).unwrap(), 7);
        // dwell time floors the result at DR2
        assert_eq!(rule.compute(1, 0, true, 7).unwrap(), 2);
        assert_eq!(rule.compute(1, 0, false, 7).unwrap(), 1);
        assert!(rule.compute(0, 8, false, 7).is_err());
        assert!(rule.compute(8, 0, false, 7).is_err());
    }

    #[test]
    fn test_folded_offset_capped_below_band_max() {
        let in865 = band::get(IN_865_867, PhyVersion::Rp002V1_0_0).unwrap();
        assert_eq!(in865.compute_rx1_data_rate(5, 7, false).unwrap(), 5);
        assert_eq!(in865.compute_rx1_data_rate(7, 0, false).unwrap(), 5);

        let as923 = band::get_latest(AS_923).unwrap();
        assert_eq!(as923.compute_rx1_data_rate(5, 6, false).unwrap(), 6);
        assert_eq!(as923.compute_rx1_data_rate(6, 0, true).unwrap(), 6);
    }

    #[test]
    fn test_table() {
        let us = band::get_latest(US_902_928).unwrap();
        assert_eq!(us.compute_rx1_data_rate(0, 0, false).unwrap(), 10);
        assert_eq!(us.compute_rx1_data_rate(4, 1, false).unwrap(), 13);
        assert_eq!(us.compute_rx1_data_rate(3, 3, false).unwrap(), 10);
        assert!(matches!(
            us.compute_rx1_data_rate(0, 4, false),
            Err(Error::OffsetOutOfRange { offset: 4, max: 3 })
        ));
        assert!(matches!(
            us.compute_rx1_data_rate(5, 0, false),
            Err(Error::DataRateOutOfRange { index: 5, max: 4 })
        ));

        let au = band::get_latest(AU_915_928).unwrap();
        assert_eq!(au.compute_rx1_data_rate(6, 0, false).unwrap(), 13);
        assert_eq!(au.compute_rx1_data_rate(0, 5, false).unwrap(), 8);

        let cn = band::get_latest(CN_470_510).unwrap();
        assert!(matches!(
            cn.compute_rx1_data_rate(6, 0, false),
            Err(Error::DataRateOutOfRange { index: 6, max: 5 })
        ));
    }

    #[test]
    fn test_rx1_data_rate_stays_in_range() {
        let bands = [
            band::get_latest(EU_863_870).unwrap(),
            band::get_latest(US_902_928).unwrap(),
            band::get_latest(AU_915_928).unwrap(),
            band::get_latest(AS_923).unwrap(),
            band::get_latest(CN_470_510).unwrap(),
            band::get(IN_865_867, PhyVersion::Rp002V1_0_0).unwrap(),
        ];

        for band in bands {
            let max_offset = match band.rx1_data_rate {
                Rx1DataRateRule::Subtract { max_offset } => max_offset,
                Rx1DataRateRule::FoldedOffset { max_offset, .. } => max_offset,
                Rx1DataRateRule::Table(rows) => rows[0].len() as u8 - 1,
            };
            let max_uplink = band
                .rx1_data_rate
                .max_uplink_index(band.max_data_rate_index());

            for dwell_time in [false, true] {
                let range = band.rx1_data_rate_range(dwell_time);
                for index in band.data_rates.keys().copied().filter(|index| *index <= max_uplink) {
                    for offset in 0..=max_offset {
                        let dr = band
                            .compute_rx1_data_rate(index, offset, dwell_time)
                            .unwrap_or_else(|e| panic!("{} DR{} offset {}: {}", band.id, index, offset, e));
                        assert!(
                            range.contains(&dr),
                            "{} DR{} offset {} gave DR{} outside {:?}",
                            band.id,
                            index,
                            offset,
                            dr,
                            range
                        );
                        assert!(band.data_rate(dr).is_ok(), "{} DR{} undefined", band.id, dr);
                    }
                }
            }
        }
    }

    #[test]
    fn test_channel_rule() {
        assert_eq!(Rx1ChannelRule::Identity.channel(17), 17);
        assert_eq!(Rx1ChannelRule::Modulo(8).channel(17), 1);
        assert_eq!(Rx1ChannelRule::Modulo(48).channel(95), 47);
        assert_eq!(Rx1ChannelRule::Modulo(24).channel(47), 23);
    }
}
