use std::time::Duration;

use crate::band::{DataRate, Modulation};
use crate::core::{Error, Result};

const LORA_PREAMBLE_SYMBOLS: f64 = 8.0;

// FSK framing: preamble, sync word, length byte and CRC
const FSK_PREAMBLE_BYTES: usize = 5;
const FSK_SYNC_BYTES: usize = 3;
const FSK_LENGTH_BYTES: usize = 1;
const FSK_CRC_BYTES: usize = 2;

/// Parses a LoRa coding rate such as `4/5` into its denominator
pub fn coding_rate_denominator(coding_rate: &str) -> Result<u8> {
    match coding_rate {
        "4/5" => Ok(5),
        "4/6" => Ok(6),
        "4/7" => Ok(7),
        "4/8" => Ok(8),
        other => Err(Error::config(format!("unknown coding rate `{}`", other))),
    }
}

/// Computes the time on air of a downlink
///
/// Downlinks use an explicit header and no payload CRC. Low data rate
/// optimization applies from SF11 at 125 kHz.
pub fn airtime(data_rate: &DataRate, payload_size: usize, coding_rate: &str) -> Result<Duration> {
    let secs = match data_rate.modulation {
        Modulation::LoRa {
            spreading_factor,
            bandwidth,
        } => {
            if !(6..=12).contains(&spreading_factor) || bandwidth == 0 {
                return Err(Error::config(format!(
                    "invalid LoRa parameters SF{} BW{}",
                    spreading_factor, bandwidth
                )));
            }
            let cr = (coding_rate_denominator(coding_rate)? - 4) as f64;
            let sf = spreading_factor as f64;
            let low_data_rate = spreading_factor >= 11 && bandwidth == 125_000;
            let de = if low_data_rate { 1.0 } else { 0.0 };

            let symbol_time = 2f64.powi(spreading_factor as i32) / bandwidth as f64;
            let preamble = (LORA_PREAMBLE_SYMBOLS + 4.25) * symbol_time;

            let numerator = 8.0 * payload_size as f64 - 4.0 * sf + 28.0;
            let payload_symbols = 8.0 + ((numerator / (4.0 * (sf - 2.0 * de))).ceil() * (cr + 4.0)).max(0.0);
            preamble + payload_symbols * symbol_time
        }
        Modulation::Fsk { bit_rate } => {
            if bit_rate == 0 {
                return Err(Error::config("FSK bit rate must be positive"));
            }
            let bytes = FSK_PREAMBLE_BYTES + FSK_SYNC_BYTES + FSK_LENGTH_BYTES + payload_size + FSK_CRC_BYTES;
            (bytes * 8) as f64 / bit_rate as f64
        }
    };
    Ok(Duration::from_nanos((secs * 1e9).round() as u64))
}
