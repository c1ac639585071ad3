//! Envelope checksums.
//!
//! Both CRCs are reflected, table driven, with non-zero seeds fixed by the
//! robot's wire protocol:
//! - header: CRC-8, polynomial 0x31 (reflected 0x8C), seed 0x77
//! - body: CRC-16, polynomial 0x1021 (reflected 0x8408), seed 0x3692

const CRC8_INIT: u8 = 0x77;
const CRC16_INIT: u16 = 0x3692;

static CRC8_TABLE: [u8; 256] = crc8_table(0x8C);
static CRC16_TABLE: [u16; 256] = crc16_table(0x8408);

const fn crc8_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

const fn crc16_table(poly: u16) -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Header checksum over the magic and length bytes.
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(CRC8_INIT, |crc, &byte| CRC8_TABLE[usize::from(crc ^ byte)])
}

/// Body checksum over everything before the trailer.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_INIT, |crc, &byte| {
        (crc >> 8) ^ CRC16_TABLE[usize::from((crc as u8) ^ byte)]
    })
}
