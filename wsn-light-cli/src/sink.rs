//! Output sinks available from the command line

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use wsn_light_core::{Error, OutputSink, Result};

/// Art-Net packet identifier
const ARTNET_ID: &[u8; 8] = b"Art-Net\0";

/// ArtDmx opcode (sent little-endian)
const OP_OUTPUT: u16 = 0x5000;

/// Art-Net protocol revision
const PROTOCOL_VERSION: u16 = 14;

/// Largest DMX payload in one ArtDmx packet
pub const MAX_DMX_LEN: usize = 512;

/// Default Art-Net destination (limited broadcast, standard port)
pub const DEFAULT_ARTNET_TARGET: &str = "255.255.255.255:6454";

/// Logs vectors instead of transmitting them
#[derive(Debug, Default)]
pub struct LogSink {
    last: Vec<u8>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for LogSink {
    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        if data != self.last.as_slice() {
            let lit: Vec<String> = data
                .iter()
                .enumerate()
                .filter(|&(_, &v)| v > 0)
                .map(|(slot, v)| format!("{}={}", slot, v))
                .collect();
            log::debug!("Universe {}: [{}]", universe, lit.join(" "));
            self.last = data.to_vec();
        } else {
            log::trace!("Universe {}: unchanged", universe);
        }
        Ok(())
    }
}

/// Sends each vector as an ArtDmx packet over UDP
pub struct ArtNetSink {
    socket: UdpSocket,
    target: SocketAddr,
    sequence: u8,
}

impl ArtNetSink {
    /// Bind an ephemeral socket that sends to `target`
    pub fn new(target: &str) -> Result<Self> {
        let target = target
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Sink(format!("could not resolve {}", target)))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_broadcast(true)?;

        log::info!("Art-Net output to {}", target);
        Ok(Self {
            socket,
            target,
            sequence: 0,
        })
    }

    fn next_sequence(&mut self) -> u8 {
        // 0 disables sequencing on the receiver, so wrap 255 -> 1
        self.sequence = if self.sequence == u8::MAX { 1 } else { self.sequence + 1 };
        self.sequence
    }
}

impl OutputSink for ArtNetSink {
    fn send(&mut self, universe: u16, data: &[u8]) -> Result<()> {
        let sequence = self.next_sequence();
        let packet = build_artdmx(sequence, universe, data)?;
        self.socket.send_to(&packet, self.target)?;
        Ok(())
    }
}

/// Encode an ArtDmx packet
///
/// The payload is padded to an even length as the protocol requires.
pub fn build_artdmx(sequence: u8, universe: u16, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > MAX_DMX_LEN {
        return Err(Error::Sink(format!(
            "{} channels exceed the {} channel DMX limit",
            data.len(),
            MAX_DMX_LEN
        )));
    }

    let length = (data.len().max(2) + 1) & !1;
    let mut packet = Vec::with_capacity(18 + length);
    packet.extend_from_slice(ARTNET_ID);
    packet.extend_from_slice(&OP_OUTPUT.to_le_bytes());
    packet.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    packet.push(sequence);
    packet.push(0); // physical port
    packet.push((universe & 0xff) as u8);
    packet.push(((universe >> 8) & 0x7f) as u8);
    packet.extend_from_slice(&(length as u16).to_be_bytes());
    packet.extend_from_slice(data);
    packet.resize(18 + length, 0);
    Ok(packet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_artdmx_layout() {
        let packet = build_artdmx(7, 0x0123, &[10, 20, 30]).unwrap();

        assert_eq!(&packet[..8], b"Art-Net\0");
        assert_eq!(&packet[8..10], &[0x00, 0x50]);
        assert_eq!(&packet[10..12], &[0, 14]);
        assert_eq!(packet[12], 7);
        assert_eq!(packet[13], 0);
        assert_eq!(&packet[14..16], &[0x23, 0x01]);
        // Odd payload padded to 4
        assert_eq!(&packet[16..18], &[0, 4]);
        assert_eq!(&packet[18..], &[10, 20, 30, 0]);
    }

    #[test]
    fn test_artdmx_limits() {
        assert_eq!(build_artdmx(1, 0, &[]).unwrap().len(), 20);
        assert_eq!(build_artdmx(1, 0, &[0; 255]).unwrap().len(), 18 + 256);
        assert!(build_artdmx(1, 0, &[0; 513]).is_err());
    }

    #[test]
    fn test_sequence_skips_zero() {
        let mut sink = ArtNetSink::new("127.0.0.1:6454").unwrap();
        sink.sequence = 254;
        assert_eq!(sink.next_sequence(), 255);
        assert_eq!(sink.next_sequence(), 1);
    }

    #[test]
    fn test_artnet_sink_sends_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let target = receiver.local_addr().unwrap().to_string();

        let mut sink = ArtNetSink::new(&target).unwrap();
        sink.send(0, &[255, 0]).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, 20);
        assert_eq!(buf[12], 1);
        assert_eq!(&buf[18..20], &[255, 0]);
    }

    #[test]
    fn test_log_sink_accepts_everything() {
        let mut sink = LogSink::new();
        sink.send(0, &[0, 5]).unwrap();
        sink.send(0, &[0, 5]).unwrap();
        assert_eq!(sink.last, vec![0, 5]);
    }
}
