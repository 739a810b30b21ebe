//! Data log records: `;`-separated fields closed by a CRC-16/MODBUS of the
//! fields in lower-case hex.

use anyhow::{Context, Result};
use time::macros::format_description;
use time::OffsetDateTime;

pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xA001
            } else {
                crc >> 1
            };
        }
    }
    crc
}

/// `body;crc;` where the CRC covers `body` only.  The log appends the line
/// terminator.
pub fn seal(body: &str) -> String {
    format!("{body};{:x};", crc16_modbus(body.as_bytes()))
}

pub fn format_timestamp(at: OffsetDateTime) -> Result<String> {
    let fmt = format_description!(
        "[year repr:last_two]:[month]:[day]:[hour]:[minute]:[second]"
    );
    at.format(&fmt).context("failed to format record timestamp")
}

/// Periodic liveness record so an idle node still produces a data log.
pub fn heartbeat_record(
    device_id: &str,
    at: OffsetDateTime,
    uptime_s: u64,
    queue_size: usize,
) -> Result<String> {
    let ts = format_timestamp(at)?;
    Ok(seal(&format!("{device_id};HB;{ts};{uptime_s};{queue_size}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn crc_check_value() {
        assert_eq!(crc16_modbus(b"123456789"), 0x4B37);
        assert_eq!(crc16_modbus(b""), 0xFFFF);
    }

    #[test]
    fn seal_appends_unpadded_lowercase_crc() {
        let line = seal("123456789");
        assert_eq!(line, "123456789;4b37;");

        // 0x0Fxx-style values must not be zero padded.
        let body = (0u8..=255)
            .map(|b| format!("x{b}"))
            .find(|b| crc16_modbus(b.as_bytes()) < 0x1000)
            .unwrap();
        let sealed = seal(&body);
        let crc = line_crc(&sealed);
        assert!(crc.len() < 4, "{crc}");
    }

    fn line_crc(line: &str) -> &str {
        line.trim_end_matches(';').rsplit(';').next().unwrap()
    }

    #[test]
    fn timestamp_layout() {
        let at = datetime!(2024-03-07 05:09:01 UTC);
        assert_eq!(format_timestamp(at).unwrap(), "24:03:07:05:09:01");
    }

    #[test]
    fn heartbeat_fields() {
        let at = datetime!(2025-12-31 23:59:58 UTC);
        let line = heartbeat_record("A4CF120B9E01", at, 3600, 2).unwrap();
        let body = "A4CF120B9E01;HB;25:12:31:23:59:58;3600;2";
        assert!(line.starts_with(body));
        assert_eq!(
            line_crc(&line),
            format!("{:x}", crc16_modbus(body.as_bytes()))
        );
        assert!(line.ends_with(';'));
        assert!(!line.contains('\n'));
    }
}
