//! Serialization of the fixed Etherbone packet and record structures.
//! Only the 32-bit address / 32-bit port width class is spoken here, because
//! that is all the devices we talk to negotiate. All multi-byte fields are
//! big-endian; a peer that deviates is a decode failure, not a variant.

use thiserror::Error;

/// The magic constant opening every Etherbone packet
pub const MAGIC: u16 = 0x4e6f;
/// Protocol revision this client speaks
pub const VERSION: u8 = 1;
/// Packet header length
pub const PACKET_HEADER_LEN: usize = 8;
/// Record header length
pub const RECORD_HEADER_LEN: usize = 4;
/// Most operations one record can carry; the count fields are a single byte.
/// This also keeps a full packet (8 + 4 + 4 + 255 * 4 bytes) inside one
/// common-MTU UDP datagram.
pub const MAX_RECORD_OPS: usize = 255;
/// Byte-enable mask asserting all four lanes of a bus word
pub const FULL_WORD: u8 = 0x0f;

// Both width nibbles fixed to the 32-bit class
const WIDTHS_32: u8 = 0x44;

// Flag bits in the low nibble of header byte 2
const FLAG_PROBE: u8 = 0x01;
const FLAG_PROBE_REPLY: u8 = 0x02;
const FLAG_NO_READS: u8 = 0x04;
const FLAG_NO_WRITES: u8 = 0x08;

/// Errors that can be thrown packing or unpacking packets
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not enough bytes for the declared structure")]
    Incomplete,
    #[error("Bad magic {0:#06x}, expected 0x4e6f")]
    BadMagic(u16),
    #[error("The peer speaks protocol version {0}, we speak version 1")]
    BadVersion(u8),
    #[error("{0} trailing bytes after the last declared record")]
    TrailingBytes(usize),
    #[error("A record can carry at most 255 operations, got {0}")]
    Oversized(usize),
}

/// The fixed packet header. Magic, version and the width classes are
/// constants; only the flag bits vary.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub probe: bool,
    pub probe_reply: bool,
    pub no_reads: bool,
    pub no_writes: bool,
}

impl PacketHeader {
    fn flag_bits(self) -> u8 {
        let mut bits = 0;
        if self.probe {
            bits |= FLAG_PROBE;
        }
        if self.probe_reply {
            bits |= FLAG_PROBE_REPLY;
        }
        if self.no_reads {
            bits |= FLAG_NO_READS;
        }
        if self.no_writes {
            bits |= FLAG_NO_WRITES;
        }
        bits
    }

    fn from_flag_bits(bits: u8) -> Self {
        Self {
            probe: bits & FLAG_PROBE != 0,
            probe_reply: bits & FLAG_PROBE_REPLY != 0,
            no_reads: bits & FLAG_NO_READS != 0,
            no_writes: bits & FLAG_NO_WRITES != 0,
        }
    }
}

/// One group of bus operations within a packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Which byte lanes of the bus word the operations assert
    pub byte_enable: u8,
    /// Write section: base bus address plus the values written to ascending
    /// word addresses from it
    pub writes: Option<(u32, Vec<u32>)>,
    /// Read section: explicit bus addresses to read
    pub reads: Vec<u32>,
}

impl Record {
    fn wcount(&self) -> usize {
        self.writes.as_ref().map_or(0, |(_, values)| values.len())
    }

    fn pack_into(&self, bytes: &mut Vec<u8>) -> Result<(), Error> {
        let wcount = self.wcount();
        let rcount = self.reads.len();
        if wcount > MAX_RECORD_OPS || rcount > MAX_RECORD_OPS {
            return Err(Error::Oversized(wcount.max(rcount)));
        }
        // Record flags are always clear on the master side
        bytes.push(0);
        bytes.push(self.byte_enable);
        bytes.push(wcount as u8);
        bytes.push(rcount as u8);
        if let Some((base, values)) = &self.writes {
            bytes.extend_from_slice(&base.to_be_bytes());
            for value in values {
                bytes.extend_from_slice(&value.to_be_bytes());
            }
        }
        for addr in &self.reads {
            bytes.extend_from_slice(&addr.to_be_bytes());
        }
        Ok(())
    }

    /// Unpack one record from the front of `bytes`, returning it along with
    /// the number of bytes it occupied. The caller has already checked that
    /// at least the record header is present.
    fn unpack(bytes: &[u8]) -> Result<(Self, usize), Error> {
        let byte_enable = bytes[1];
        let wcount = bytes[2] as usize;
        let rcount = bytes[3] as usize;
        let declared = RECORD_HEADER_LEN
            + if wcount > 0 { 4 + 4 * wcount } else { 0 }
            + 4 * rcount;
        if bytes.len() < declared {
            return Err(Error::Incomplete);
        }
        let mut offset = RECORD_HEADER_LEN;
        let writes = if wcount > 0 {
            let base = read_u32(&bytes[offset..]);
            offset += 4;
            let mut values = Vec::with_capacity(wcount);
            for _ in 0..wcount {
                values.push(read_u32(&bytes[offset..]));
                offset += 4;
            }
            Some((base, values))
        } else {
            None
        };
        let mut reads = Vec::with_capacity(rcount);
        for _ in 0..rcount {
            reads.push(read_u32(&bytes[offset..]));
            offset += 4;
        }
        Ok((
            Self {
                byte_enable,
                writes,
                reads,
            },
            offset,
        ))
    }
}

/// A full Etherbone packet: one header followed by zero or more records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub records: Vec<Record>,
}

impl Packet {
    /// Take an instance of a packet and construct the byte payload to send
    /// over UDP
    /// # Errors
    /// Returns [`Error::Oversized`] if a record declares more operations than
    /// fit its one-byte count fields
    pub fn pack(&self) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::with_capacity(
            PACKET_HEADER_LEN
                + self
                    .records
                    .iter()
                    .map(|r| RECORD_HEADER_LEN + 4 * (r.wcount() + r.reads.len() + 1))
                    .sum::<usize>(),
        );
        bytes.extend_from_slice(&MAGIC.to_be_bytes());
        bytes.push(VERSION << 4 | self.header.flag_bits());
        bytes.push(WIDTHS_32);
        // Reserved padding
        bytes.extend_from_slice(&[0u8; 4]);
        for record in &self.records {
            record.pack_into(&mut bytes)?;
        }
        Ok(bytes)
    }

    /// Given bytes from UDP, construct an instance of a packet
    /// # Errors
    /// Returns an error if the buffer is shorter than its declared
    /// structures, carries the wrong protocol identity, or has leftover bytes
    /// that are not a record
    pub fn unpack(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < PACKET_HEADER_LEN {
            return Err(Error::Incomplete);
        }
        let magic = u16::from_be_bytes(
            bytes[..2]
                .try_into()
                .expect("We've already checked that it will have these"),
        );
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let version = bytes[2] >> 4;
        if version != VERSION {
            return Err(Error::BadVersion(version));
        }
        let header = PacketHeader::from_flag_bits(bytes[2] & 0x0f);
        let mut rest = &bytes[PACKET_HEADER_LEN..];
        let mut records = Vec::new();
        while !rest.is_empty() {
            if rest.len() < RECORD_HEADER_LEN {
                return Err(Error::TrailingBytes(rest.len()));
            }
            let (record, used) = Record::unpack(rest)?;
            records.push(record);
            rest = &rest[used..];
        }
        Ok(Self { header, records })
    }

    /// The values delivered in the write payload sections. A reply to a read
    /// request carries its data here, in the order the addresses were asked.
    pub fn write_values(&self) -> impl Iterator<Item = u32> + '_ {
        self.records
            .iter()
            .filter_map(|record| record.writes.as_ref())
            .flat_map(|(_, values)| values.iter().copied())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes(
        bytes[..4]
            .try_into()
            .expect("The caller already sized this slice"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_request(addrs: Vec<u32>) -> Packet {
        Packet {
            header: PacketHeader::default(),
            records: vec![Record {
                byte_enable: FULL_WORD,
                writes: None,
                reads: addrs,
            }],
        }
    }

    #[test]
    fn test_pack_read_request() {
        let packed = read_request(vec![0xe000_6000]).pack().unwrap();
        assert_eq!(
            packed,
            vec![
                0x4e, 0x6f, 0x10, 0x44, 0, 0, 0, 0, // header
                0x00, 0x0f, 0x00, 0x01, // record header
                0xe0, 0x00, 0x60, 0x00, // address
            ]
        );
    }

    #[test]
    fn test_pack_write_request() {
        let packet = Packet {
            header: PacketHeader::default(),
            records: vec![Record {
                byte_enable: FULL_WORD,
                writes: Some((0xe000_6000, vec![0xdead_beef])),
                reads: vec![],
            }],
        };
        assert_eq!(
            packet.pack().unwrap(),
            vec![
                0x4e, 0x6f, 0x10, 0x44, 0, 0, 0, 0, // header
                0x00, 0x0f, 0x01, 0x00, // record header
                0xe0, 0x00, 0x60, 0x00, // base address
                0xde, 0xad, 0xbe, 0xef, // value
            ]
        );
    }

    #[test]
    fn test_pack_probe() {
        let packet = Packet {
            header: PacketHeader {
                probe: true,
                ..Default::default()
            },
            records: vec![],
        };
        assert_eq!(
            packet.pack().unwrap(),
            vec![0x4e, 0x6f, 0x11, 0x44, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_roundtrip_mixed_record() {
        let packet = Packet {
            header: PacketHeader {
                no_reads: true,
                ..Default::default()
            },
            records: vec![Record {
                byte_enable: 0x03,
                writes: Some((0x1000_0000, vec![1, 2, 3])),
                reads: vec![0x2000_0000, 0x2000_0004],
            }],
        };
        assert_eq!(packet, Packet::unpack(&packet.pack().unwrap()).unwrap());
    }

    #[test]
    fn test_roundtrip_multiple_records() {
        let packet = Packet {
            header: PacketHeader::default(),
            records: vec![
                Record {
                    byte_enable: FULL_WORD,
                    writes: Some((0x40, vec![7])),
                    reads: vec![],
                },
                Record {
                    byte_enable: 0x08,
                    writes: None,
                    reads: vec![0x80],
                },
            ],
        };
        assert_eq!(packet, Packet::unpack(&packet.pack().unwrap()).unwrap());
    }

    #[test]
    fn test_unpack_short_header() {
        assert!(matches!(
            Packet::unpack(&[0x4e, 0x6f, 0x10]),
            Err(Error::Incomplete)
        ));
    }

    #[test]
    fn test_unpack_bad_magic() {
        assert!(matches!(
            Packet::unpack(&[0xde, 0xad, 0x10, 0x44, 0, 0, 0, 0]),
            Err(Error::BadMagic(0xdead))
        ));
    }

    #[test]
    fn test_unpack_bad_version() {
        assert!(matches!(
            Packet::unpack(&[0x4e, 0x6f, 0x20, 0x44, 0, 0, 0, 0]),
            Err(Error::BadVersion(2))
        ));
    }

    #[test]
    fn test_unpack_truncated_record_payload() {
        // Declares one write but carries no base address or value
        let bytes = [0x4e, 0x6f, 0x10, 0x44, 0, 0, 0, 0, 0x00, 0x0f, 0x01, 0x00];
        assert!(matches!(Packet::unpack(&bytes), Err(Error::Incomplete)));
    }

    #[test]
    fn test_unpack_trailing_garbage() {
        let mut bytes = read_request(vec![0x40]).pack().unwrap();
        bytes.extend_from_slice(&[0xaa, 0xbb]);
        assert!(matches!(
            Packet::unpack(&bytes),
            Err(Error::TrailingBytes(2))
        ));
    }

    #[test]
    fn test_pack_oversized_record() {
        let packet = read_request((0..256).map(|i| 4 * i).collect());
        assert!(matches!(packet.pack(), Err(Error::Oversized(256))));
    }

    #[test]
    fn test_write_values_span_records() {
        let packet = Packet {
            header: PacketHeader::default(),
            records: vec![
                Record {
                    byte_enable: FULL_WORD,
                    writes: Some((0, vec![1, 2])),
                    reads: vec![],
                },
                Record {
                    byte_enable: FULL_WORD,
                    writes: Some((8, vec![3])),
                    reads: vec![],
                },
            ],
        };
        assert_eq!(packet.write_values().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
