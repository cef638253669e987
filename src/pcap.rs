//! Capture file reader for classic pcap and pcapng, optionally gzipped.
//!
//! IEX publishes its historical DEEP and TOPS data as gzip-compressed
//! captures of the multicast feed. [`PcapReader`] walks the capture blocks
//! with `pcap-parser` and, as a [`PayloadSource`], hands out the UDP payload
//! of each packet.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Chain, Cursor, ErrorKind, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use tracing::debug;

use crate::error::CaptureError;
use crate::packet::udp_payload;
use crate::source::PayloadSource;

/// Read buffer size. A capture record or pcapng block that does not fit is
/// rejected as oversized.
pub const MAX_RECORD_LEN: usize = 256 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const PCAPNG_SHB: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const PCAP_MAGICS: [[u8; 4]; 4] = [
    [0xd4, 0xc3, 0xb2, 0xa1], // µs, little-endian
    [0xa1, 0xb2, 0xc3, 0xd4], // µs, big-endian
    [0x4d, 0x3c, 0xb2, 0xa1], // ns, little-endian
    [0xa1, 0xb2, 0x3c, 0x4d], // ns, big-endian
];
const LEGACY_HEADER_LEN: usize = 24;
/// Block type, total length and byte-order magic.
const SHB_PREFIX_LEN: usize = 12;

/// Which container a capture uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Pcap,
    PcapNg,
}

/// One captured link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub link_type: u32,
    pub data: Vec<u8>,
}

/// The file header, read up front, is replayed ahead of the rest of the input
/// so the container reader sees it whole on its first read.
type Prefixed<R> = Chain<Cursor<Vec<u8>>, R>;

enum Container<R: Read> {
    Legacy(LegacyPcapReader<Prefixed<R>>),
    Ng(PcapNGReader<Prefixed<R>>),
}

pub struct PcapReader<R: Read> {
    container: Container<R>,
    /// Classic pcap: the single file-wide link type. pcapng: link type per
    /// interface of the current section.
    interfaces: Vec<u32>,
    packets: u64,
}

fn read_exact<R: Read>(r: &mut R, buf: &mut [u8], context: &'static str) -> Result<(), CaptureError> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => CaptureError::Truncated { context },
        _ => CaptureError::Io(e),
    })
}

fn container_error(e: PcapError<&[u8]>, packet: u64) -> CaptureError {
    match e {
        PcapError::UnexpectedEof | PcapError::Incomplete(_) => CaptureError::Truncated { context: "capture block" },
        PcapError::BufferTooSmall => CaptureError::Oversized { max: MAX_RECORD_LEN },
        PcapError::ReadError => CaptureError::Io(io::Error::other("capture read failed")),
        PcapError::NomError(_, kind) | PcapError::OwnedNomError(_, kind) => {
            CaptureError::Container { packet, detail: format!("{kind:?}") }
        }
        other => CaptureError::Container { packet, detail: other.to_string() },
    }
}

/// Pcap link types keep FCS metadata in the upper half of the field.
fn link_type(raw: i32) -> u32 {
    (raw as u32) & 0xffff
}

impl PcapReader<Box<dyn Read + Send>> {
    /// Open a capture file, transparently decompressing gzip input.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        let mut buffered = BufReader::with_capacity(1 << 20, File::open(path)?);
        let gzipped = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
        debug!(path = %path.display(), gzipped, "opening capture");
        let reader: Box<dyn Read + Send> = if gzipped {
            Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
        } else {
            Box::new(buffered)
        };
        Self::new(reader)
    }
}

impl<R: Read> PcapReader<R> {
    /// Read the file header and detect the container format.
    pub fn new(mut reader: R) -> Result<Self, CaptureError> {
        let mut magic = [0u8; 4];
        read_exact(&mut reader, &mut magic, "file header")?;
        let container = if magic == PCAPNG_SHB {
            let header = section_header(magic, &mut reader)?;
            let reader = PcapNGReader::new(MAX_RECORD_LEN, Cursor::new(header).chain(reader))
                .map_err(|e| container_error(e, 0))?;
            Container::Ng(reader)
        } else if PCAP_MAGICS.contains(&magic) {
            let mut header = vec![0u8; LEGACY_HEADER_LEN];
            header[..4].copy_from_slice(&magic);
            read_exact(&mut reader, &mut header[4..], "file header")?;
            let reader = LegacyPcapReader::new(MAX_RECORD_LEN, Cursor::new(header).chain(reader))
                .map_err(|e| container_error(e, 0))?;
            Container::Legacy(reader)
        } else {
            return Err(CaptureError::UnknownFormat(u32::from_le_bytes(magic)));
        };
        let reader = Self { container, interfaces: Vec::new(), packets: 0 };
        debug!(format = ?reader.format(), "capture header read");
        Ok(reader)
    }

    pub fn format(&self) -> CaptureFormat {
        match self.container {
            Container::Legacy(_) => CaptureFormat::Pcap,
            Container::Ng(_) => CaptureFormat::PcapNg,
        }
    }

    /// Number of packets returned so far.
    pub fn packets_read(&self) -> u64 {
        self.packets
    }

    /// Next captured frame, or `None` at the end of the file.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket>, CaptureError> {
        let Self { container, interfaces, packets } = self;
        let blocks: &mut dyn PcapReaderIterator = match container {
            Container::Legacy(r) => r,
            Container::Ng(r) => r,
        };
        loop {
            match blocks.next() {
                Ok((offset, block)) => {
                    let packet = packet_of(block, interfaces, *packets + 1)?;
                    blocks.consume(offset);
                    if let Some(packet) = packet {
                        *packets += 1;
                        return Ok(Some(packet));
                    }
                }
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => blocks.refill().map_err(|e| container_error(e, *packets))?,
                Err(e) => return Err(container_error(e, *packets)),
            }
        }
    }
}

/// Copy the frame out of a packet block, or record what a metadata block
/// says about the interfaces that follow.
fn packet_of(
    block: PcapBlockOwned<'_>,
    interfaces: &mut Vec<u32>,
    packet: u64,
) -> Result<Option<RawPacket>, CaptureError> {
    let lookup = |interfaces: &[u32], id: u32| {
        interfaces.get(id as usize).copied().ok_or(CaptureError::UnknownInterface { packet, interface: id })
    };
    match block {
        PcapBlockOwned::LegacyHeader(header) => {
            interfaces.clear();
            interfaces.push(link_type(header.network.0));
            Ok(None)
        }
        PcapBlockOwned::Legacy(record) => {
            Ok(Some(RawPacket { link_type: lookup(interfaces.as_slice(), 0)?, data: record.data.to_vec() }))
        }
        PcapBlockOwned::NG(Block::SectionHeader(_)) => {
            interfaces.clear();
            Ok(None)
        }
        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
            interfaces.push(link_type(idb.linktype.0));
            Ok(None)
        }
        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => Ok(Some(RawPacket {
            link_type: lookup(interfaces.as_slice(), epb.if_id)?,
            data: epb.packet_data().to_vec(),
        })),
        PcapBlockOwned::NG(Block::SimplePacket(spb)) => Ok(Some(RawPacket {
            link_type: lookup(interfaces.as_slice(), 0)?,
            data: spb.packet_data().to_vec(),
        })),
        PcapBlockOwned::NG(_) => Ok(None),
    }
}

/// Read the rest of a section header block whose type bytes are `magic`, and
/// return the whole block.
fn section_header<R: Read>(magic: [u8; 4], reader: &mut R) -> Result<Vec<u8>, CaptureError> {
    let mut header = vec![0u8; SHB_PREFIX_LEN];
    header[..4].copy_from_slice(&magic);
    read_exact(reader, &mut header[4..], "section header")?;
    let len = [header[4], header[5], header[6], header[7]];
    let total = match header[8..12] {
        [0x4d, 0x3c, 0x2b, 0x1a] => u32::from_le_bytes(len),
        [0x1a, 0x2b, 0x3c, 0x4d] => u32::from_be_bytes(len),
        _ => return Err(CaptureError::UnknownFormat(u32::from_le_bytes(magic))),
    } as usize;
    if total > MAX_RECORD_LEN {
        return Err(CaptureError::Oversized { max: MAX_RECORD_LEN });
    }
    if total < 28 || total % 4 != 0 {
        return Err(CaptureError::Container { packet: 0, detail: format!("section header length {total}") });
    }
    header.resize(total, 0);
    read_exact(reader, &mut header[SHB_PREFIX_LEN..], "section header")?;
    Ok(header)
}

impl<R: Read + Send> PayloadSource for PcapReader<R> {
    fn next_payload(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let Some(packet) = self.next_packet()? else {
            return Ok(None);
        };
        udp_payload(packet.link_type, &packet.data, self.packets).map(|p| Some(p.to_vec()))
    }
}
