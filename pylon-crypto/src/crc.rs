//! CRC-16/XMODEM, used for TON smart-contract get-method ids.

/// Polynomial 0x1021, zero init, no reflection.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        // standard CRC-16/XMODEM check input
        assert_eq!(crc16(b"123456789"), 0x31c3);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc16(b""), 0);
    }
}
