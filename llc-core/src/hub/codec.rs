//! Hub frame codec
//!
//! Response pages carry a device count in byte 1 followed by fixed-size
//! device records starting at byte 4. Command frames are always padded to
//! 64 bytes.

use tracing::trace;

use llc_error::{LlcError, Result};
use llc_protocol::{FanRecord, MacAddr};

use crate::constants::codec::{COMMAND_TAIL, OPCODE, RECORD_LEN, RECORD_OFFSET, RECORD_SENTINEL};
use crate::constants::usb::FRAME_LEN;

/// One outbound frame
pub type CommandFrame = [u8; FRAME_LEN];

// Record layout
const MAC: std::ops::Range<usize> = 0..6;
const MASTER_MAC: std::ops::Range<usize> = 6..12;
const CHANNEL: usize = 12;
const RX_TYPE: usize = 13;
const FAN_COUNT: usize = 19;
const RPM: usize = 28;
const PWM: usize = 36;

/// Frame asking the query device for `page_count` pages of device records
pub fn encode_page_query(page_count: u8) -> CommandFrame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = OPCODE;
    frame[1] = page_count;
    frame
}

/// Decode the device records in a response buffer.
///
/// Records whose trailing byte is not the sentinel are skipped. A buffer
/// too short for the advertised device count is an error; an empty buffer
/// decodes to no fans.
pub fn decode_page(buf: &[u8]) -> Result<Vec<FanRecord>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }
    if buf.len() < RECORD_OFFSET {
        return Err(LlcError::decode(format!("page header truncated at {} bytes", buf.len())));
    }

    let count = usize::from(buf[1]);
    let mut fans = Vec::with_capacity(count);

    for index in 0..count {
        let start = RECORD_OFFSET + index * RECORD_LEN;
        let record: &[u8; RECORD_LEN] = buf
            .get(start..start + RECORD_LEN)
            .and_then(|slice| slice.try_into().ok())
            .ok_or_else(|| {
                LlcError::decode(format!(
                    "record {} of {} truncated ({} bytes available)",
                    index,
                    count,
                    buf.len()
                ))
            })?;

        if record[RECORD_LEN - 1] != RECORD_SENTINEL {
            trace!(index, marker = record[RECORD_LEN - 1], "Skipping invalid device record");
            continue;
        }

        fans.push(decode_record(record));
    }

    Ok(fans)
}

fn decode_record(record: &[u8; RECORD_LEN]) -> FanRecord {
    let mac = mac_at(record, MAC);
    let master_mac = mac_at(record, MASTER_MAC);

    let mut rpm = [0u16; 4];
    for (i, slot) in rpm.iter_mut().enumerate() {
        let at = RPM + i * 2;
        *slot = u16::from_be_bytes([record[at], record[at + 1]]);
    }

    FanRecord {
        mac,
        master_mac,
        channel: record[CHANNEL],
        rx_type: record[RX_TYPE],
        fan_count: record[FAN_COUNT] % 10,
        pwm: record[PWM],
        rpm,
        target_pwm: 0,
        is_bound: !master_mac.is_zero(),
    }
}

fn mac_at(record: &[u8; RECORD_LEN], range: std::ops::Range<usize>) -> MacAddr {
    let mut octets = [0u8; 6];
    octets.copy_from_slice(&record[range]);
    MacAddr(octets)
}

/// Encode the command frame for `fan` at position `seq` in the batch.
///
/// Only the primary frame (`seq == 0`) carries addressing and the target
/// duty cycle; the rest keep the channel's command stream going.
pub fn encode_command(fan: &FanRecord, seq: u8) -> CommandFrame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = OPCODE;
    frame[1] = seq;
    frame[2] = fan.channel;
    frame[3] = fan.rx_type;
    frame[4..6].copy_from_slice(&COMMAND_TAIL);

    if seq == 0 {
        frame[6..12].copy_from_slice(&fan.mac.octets());
        frame[12..18].copy_from_slice(&fan.master_mac.octets());
        frame[18] = fan.rx_type;
        frame[19] = fan.channel;
        frame[20] = fan.rx_type;
        frame[21..25].fill(fan.target_pwm);
    }

    frame
}
