//! Link, network and transport header stripping down to the UDP payload.
//!
//! Only what IEX captures need: Ethernet (with 802.1Q / 802.1ad tags), Linux
//! cooked capture and raw IP link types, IPv4 and IPv6, and UDP. Anything
//! else at this boundary is a [`CaptureError`].
use etherparse::{SlicedPacket, TransportSlice};

use crate::error::CaptureError;

pub const LINKTYPE_ETHERNET: u32 = 1;
pub const LINKTYPE_RAW: u32 = 101;
pub const LINKTYPE_LINUX_SLL: u32 = 113;
pub const LINKTYPE_IPV4: u32 = 228;
pub const LINKTYPE_IPV6: u32 = 229;

/// Return the UDP payload carried by one captured link-layer frame.
///
/// `packet` is the 1-based packet number, used only for diagnostics.
pub fn udp_payload(link_type: u32, frame: &[u8], packet: u64) -> Result<&[u8], CaptureError> {
    let sliced = match link_type {
        LINKTYPE_ETHERNET => SlicedPacket::from_ethernet(frame),
        LINKTYPE_LINUX_SLL => SlicedPacket::from_linux_sll(frame),
        LINKTYPE_RAW | LINKTYPE_IPV4 | LINKTYPE_IPV6 => SlicedPacket::from_ip(frame),
        other => return Err(CaptureError::UnsupportedLinkType(other)),
    }
    .map_err(|source| CaptureError::Malformed { packet, source })?;

    if sliced.is_ip_payload_fragmented() {
        return Err(CaptureError::Fragmented { packet });
    }
    if let Some(TransportSlice::Udp(udp)) = &sliced.transport {
        return Ok(udp.payload());
    }
    match sliced.ip_payload() {
        Some(ip) => Err(CaptureError::NotUdp { packet, protocol: ip.ip_number.0 }),
        None => Err(CaptureError::NotIp {
            packet,
            ethertype: sliced.payload_ether_type().map_or(0, |t| t.0),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const IGMP: u8 = 2;

    pub(crate) fn ipv4_udp(payload: &[u8]) -> Vec<u8> {
        let mut udp = Vec::new();
        udp.extend_from_slice(&10378u16.to_be_bytes());
        udp.extend_from_slice(&10378u16.to_be_bytes());
        udp.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
        udp.extend_from_slice(&0u16.to_be_bytes());
        udp.extend_from_slice(payload);

        let mut ip = vec![0x45, 0];
        ip.extend_from_slice(&((20 + udp.len()) as u16).to_be_bytes());
        ip.extend_from_slice(&[0, 0, 0x40, 0, 64, 17, 0, 0]);
        ip.extend_from_slice(&[10, 0, 0, 1, 233, 215, 21, 4]);
        ip.extend_from_slice(&udp);
        ip
    }

    pub(crate) fn ethernet_frame(ip: &[u8]) -> Vec<u8> {
        let mut f = vec![0x01, 0x00, 0x5e, 0x57, 0x15, 0x04, 0xb8, 0x59, 0x9f, 0x00, 0x00, 0x01];
        f.extend_from_slice(&0x0800u16.to_be_bytes());
        f.extend_from_slice(ip);
        f
    }

    #[test]
    fn ethernet_ipv4_udp() {
        let frame = ethernet_frame(&ipv4_udp(b"segment"));
        assert_eq!(udp_payload(LINKTYPE_ETHERNET, &frame, 1).unwrap(), b"segment");
    }

    #[test]
    fn ethernet_padding_is_ignored() {
        let mut frame = ethernet_frame(&ipv4_udp(b"ab"));
        frame.extend_from_slice(&[0; 16]);
        assert_eq!(udp_payload(LINKTYPE_ETHERNET, &frame, 1).unwrap(), b"ab");
    }

    #[test]
    fn vlan_tags_are_skipped() {
        let ip = ipv4_udp(b"tagged");
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&0x8100u16.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x64]);
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.extend_from_slice(&ip);
        assert_eq!(udp_payload(LINKTYPE_ETHERNET, &frame, 1).unwrap(), b"tagged");
    }

    #[test]
    fn raw_ip_link_type() {
        let ip = ipv4_udp(b"raw");
        assert_eq!(udp_payload(LINKTYPE_RAW, &ip, 1).unwrap(), b"raw");
        assert_eq!(udp_payload(LINKTYPE_IPV4, &ip, 1).unwrap(), b"raw");
    }

    #[test]
    fn non_udp_is_rejected() {
        let mut ip = ipv4_udp(b"x");
        ip[9] = IGMP;
        let frame = ethernet_frame(&ip);
        assert!(matches!(
            udp_payload(LINKTYPE_ETHERNET, &frame, 7),
            Err(CaptureError::NotUdp { packet: 7, protocol: IGMP })
        ));
    }

    #[test]
    fn non_ip_and_fragments_are_rejected() {
        let mut frame = ethernet_frame(&ipv4_udp(b"x"));
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert!(matches!(
            udp_payload(LINKTYPE_ETHERNET, &frame, 2),
            Err(CaptureError::NotIp { ethertype: 0x0806, .. })
        ));

        let mut ip = ipv4_udp(b"x");
        ip[6] = 0x20; // more fragments
        assert!(matches!(udp_payload(LINKTYPE_RAW, &ip, 3), Err(CaptureError::Fragmented { packet: 3 })));
    }

    #[test]
    fn truncated_headers_are_rejected() {
        let ip = ipv4_udp(b"payload");
        assert!(matches!(udp_payload(LINKTYPE_RAW, &ip[..30], 4), Err(CaptureError::Malformed { packet: 4, .. })));
        assert!(matches!(udp_payload(147, &ip, 1), Err(CaptureError::UnsupportedLinkType(147))));
    }
}
