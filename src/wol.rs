use crate::error::{BridgeError, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// Port magic packets are broadcast to
pub const WOL_PORT: u16 = 9;

/// Limited broadcast on the discard port
pub const DEFAULT_WAKE_TARGET: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, WOL_PORT));

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated) into six bytes
pub fn parse_mac(mac: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = mac.split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(BridgeError::InvalidMac(mac.to_string()));
    }

    let mut bytes = [0u8; 6];
    for (slot, part) in bytes.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16).map_err(|_| BridgeError::InvalidMac(mac.to_string()))?;
    }
    Ok(bytes)
}

/// Six `0xFF` bytes followed by the hardware address sixteen times
pub fn magic_packet(mac: [u8; 6]) -> Vec<u8> {
    let mut packet = vec![0xFF; 6];
    for _ in 0..16 {
        packet.extend_from_slice(&mac);
    }
    packet
}

/// Send a magic packet for `mac` to `target`
pub async fn wake(mac: &str, target: SocketAddr) -> Result<()> {
    let packet = magic_packet(parse_mac(mac)?);

    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
    socket.set_broadcast(true)?;
    socket
        .send_to(&packet, target)
        .await?;

    tracing::info!("Sent wake-on-LAN packet for {} to {}", mac, target);
    Ok(())
}
