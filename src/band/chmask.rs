use crate::core::{Error, Result};

/// One `LinkADRReq` channel mask block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChMaskBlock {
    /// ChMaskCntl field
    pub cntl: u8,
    /// ChMask field, bit `i` enables channel `16 * block + i`
    pub mask: u16,
}

/// Channel mask encoding of a band family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChMaskFormat {
    /// Up to 16 channels in a single block
    Sixteen,
    /// 48 channels in three blocks
    FortyEight,
    /// 64 narrow plus 8 wide channels, with control shortcuts
    SeventyTwo,
    /// 96 channels in six blocks
    NinetySix,
}

impl ChMaskFormat {
    /// Number of channels covered by the format
    pub fn width(&self) -> usize {
        match self {
            ChMaskFormat::Sixteen => 16,
            ChMaskFormat::FortyEight => 48,
            ChMaskFormat::SeventyTwo => 72,
            ChMaskFormat::NinetySix => 96,
        }
    }

    /// Encodes the enabled channel set as mask blocks
    ///
    /// Channels beyond `enabled.len()` are disabled.
    pub fn generate(&self, enabled: &[bool]) -> Result<Vec<ChMaskBlock>> {
        let width = self.width();
        if enabled.len() > width {
            return Err(Error::InvalidChannelMask(format!(
                "{} channels exceed mask width {}",
                enabled.len(),
                width
            )));
        }
        let mut channels = vec![false; width];
        channels[..enabled.len()].copy_from_slice(enabled);

        let blocks = match self {
            ChMaskFormat::Sixteen | ChMaskFormat::FortyEight => plain_blocks(&channels),
            ChMaskFormat::SeventyTwo => {
                let narrow_on = channels[..64].iter().filter(|on| **on).count();
                let wide = pack(&channels[64..72]);
                match narrow_on {
                    64 => vec![ChMaskBlock { cntl: 6, mask: wide }],
                    0 => vec![ChMaskBlock { cntl: 7, mask: wide }],
                    _ => {
                        let mut blocks = plain_blocks(&channels[..64]);
                        blocks.push(ChMaskBlock { cntl: 4, mask: wide });
                        blocks
                    }
                }
            }
            ChMaskFormat::NinetySix => {
                if channels.iter().all(|on| *on) {
                    vec![ChMaskBlock { cntl: 6, mask: 0 }]
                } else {
                    plain_blocks(&channels)
                }
            }
        };
        Ok(blocks)
    }

    /// Decodes mask blocks, applied in order, into the enabled channel set
    pub fn parse(&self, blocks: &[ChMaskBlock]) -> Result<Vec<bool>> {
        let width = self.width();
        let mut channels = vec![false; width];

        for block in blocks {
            match (self, block.cntl) {
                (ChMaskFormat::Sixteen, 0) => unpack(block.mask, &mut channels[..16]),
                (ChMaskFormat::Sixteen, 6) | (ChMaskFormat::NinetySix, 6) => {
                    channels.iter_mut().for_each(|on| *on = true)
                }
                (ChMaskFormat::FortyEight, cntl @ 0..=2)
                | (ChMaskFormat::SeventyTwo, cntl @ 0..=3)
                | (ChMaskFormat::NinetySix, cntl @ 0..=5) => {
                    let start = cntl as usize * 16;
                    unpack(block.mask, &mut channels[start..start + 16]);
                }
                (ChMaskFormat::SeventyTwo, 4) => {
                    check_wide(block)?;
                    unpack(block.mask, &mut channels[64..72]);
                }
                (ChMaskFormat::SeventyTwo, 5) => {
                    // each of the low 8 bits switches a sub-band of 8 narrow
                    // channels together with its wide channel
                    check_wide(block)?;
                    for sub_band in 0..8 {
                        let on = block.mask & (1 << sub_band) != 0;
                        channels[sub_band * 8..sub_band * 8 + 8]
                            .iter_mut()
                            .for_each(|c| *c = on);
                        channels[64 + sub_band] = on;
                    }
                }
                (ChMaskFormat::SeventyTwo, cntl @ (6 | 7)) => {
                    check_wide(block)?;
                    let on = cntl == 6;
                    channels[..64].iter_mut().for_each(|c| *c = on);
                    unpack(block.mask, &mut channels[64..72]);
                }
                (_, cntl) => {
                    return Err(Error::InvalidChannelMask(format!(
                        "unsupported ChMaskCntl {} for {}-channel mask",
                        cntl, width
                    )))
                }
            }
        }
        Ok(channels)
    }
}

fn plain_blocks(channels: &[bool]) -> Vec<ChMaskBlock> {
    channels
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| ChMaskBlock {
            cntl: i as u8,
            mask: pack(chunk),
        })
        .collect()
}

fn pack(channels: &[bool]) -> u16 {
    channels
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .fold(0u16, |mask, (i, _)| mask | (1 << i))
}

fn unpack(mask: u16, channels: &mut [bool]) {
    for (i, channel) in channels.iter_mut().enumerate() {
        *channel = mask & (1 << i) != 0;
    }
}

fn check_wide(block: &ChMaskBlock) -> Result<()> {
    if block.mask > 0xFF {
        return Err(Error::InvalidChannelMask(format!(
            "ChMaskCntl {} sets bits beyond the 8 wide channels: {:#06x}",
            block.cntl, block.mask
        )));
    }
    Ok(())
}
