//! CRC-32 (IEEE, reflected) as used by the BattlEye RCon header.
use std::sync::OnceLock;

const POLYNOMIAL: u32 = 0xEDB8_8320;

static TABLE: OnceLock<[u32; 256]> = OnceLock::new();

fn table() -> &'static [u32; 256] {
    TABLE.get_or_init(|| {
        let mut table = [0u32; 256];
        for (byte, entry) in table.iter_mut().enumerate() {
            let mut crc = byte as u32;
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (POLYNOMIAL & mask);
            }
            *entry = crc;
        }
        table
    })
}

/// Computes the checksum stamped into every packet header. Initial value
/// `0xFFFFFFFF`, final complement.
pub fn checksum(bytes: &[u8]) -> u32 {
    let table = table();
    !bytes.iter().fold(0xFFFF_FFFF, |crc, &byte| {
        (crc >> 8) ^ table[((crc ^ byte as u32) & 0xFF) as usize]
    })
}
