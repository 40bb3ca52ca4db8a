//! Host discovery via ARP broadcast sweep, plus ICMP echo reachability checks.

use ipnet::Ipv4Net;
use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::Packet;
use pnet::util::MacAddr;
use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Why a sweep produced no result. Only [`DiscoveryError::PermissionDenied`] is fatal.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid network range {0:?}")]
    InvalidSubnet(String),
    #[error("no usable interface for {0}")]
    NoInterface(String),
    #[error("raw network access denied: {0}")]
    PermissionDenied(String),
    #[error("link-layer capture unavailable: {0}")]
    Unavailable(String),
}

impl DiscoveryError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiscoveryError::PermissionDenied(_))
    }
}

/// Raw sockets need root.
pub fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Parse a CIDR (host bits allowed) or a bare address (treated as /32).
pub fn parse_subnet(spec: &str) -> Result<Ipv4Net, DiscoveryError> {
    let spec = spec.trim();
    if let Ok(net) = spec.parse::<Ipv4Net>() {
        return Ok(net.trunc());
    }
    spec.parse::<Ipv4Addr>()
        .map(Ipv4Net::from)
        .map_err(|_| DiscoveryError::InvalidSubnet(spec.to_string()))
}

/// Timing for the broadcast sweep.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// How long to collect replies after each round of requests.
    pub timeout: Duration,
    /// Extra rounds for addresses that stayed silent.
    pub retries: u32,
    /// Force a specific interface instead of matching by subnet.
    pub interface: Option<String>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        SweepOptions { timeout: Duration::from_secs(2), retries: 1, interface: None }
    }
}

/// Send ARP who-has requests for every host address in `subnet` and collect
/// the replies as address -> hardware address. Replies from outside the
/// subnet are discarded. Any failure yields an error, never a partial map.
pub async fn broadcast_discover(subnet: &str, opts: &SweepOptions) -> Result<BTreeMap<Ipv4Addr, String>, DiscoveryError> {
    let net = parse_subnet(subnet)?;
    let opts = opts.clone();
    info!(%net, "starting ARP scan");
    let found = tokio::task::spawn_blocking(move || arp_sweep(net, &opts))
        .await
        .map_err(|e| DiscoveryError::Unavailable(e.to_string()))??;
    info!(responded = found.len(), "ARP scan completed");
    Ok(found)
}

fn select_interface(net: &Ipv4Net, name: Option<&str>) -> Result<(NetworkInterface, Ipv4Addr, MacAddr), DiscoveryError> {
    let candidates = datalink::interfaces();
    let source_v4 = |iface: &NetworkInterface| {
        iface.ips.iter().find_map(|n| match n.ip() {
            IpAddr::V4(v4) if net.contains(&v4) => Some(v4),
            _ => None,
        })
    };
    let pick = match name {
        Some(wanted) => candidates.into_iter().find(|i| i.name == wanted),
        None => candidates
            .into_iter()
            .find(|i| i.is_up() && !i.is_loopback() && i.mac.is_some() && source_v4(i).is_some()),
    };
    let iface = pick.ok_or_else(|| DiscoveryError::NoInterface(net.to_string()))?;
    let mac = iface.mac.ok_or_else(|| DiscoveryError::NoInterface(format!("{} has no hardware address", iface.name)))?;
    let ip = source_v4(&iface)
        .or_else(|| {
            iface.ips.iter().find_map(|n| match n.ip() {
                IpAddr::V4(v4) => Some(v4),
                _ => None,
            })
        })
        .ok_or_else(|| DiscoveryError::NoInterface(format!("{} has no IPv4 address", iface.name)))?;
    debug!(interface = %iface.name, source = %ip, "selected interface for ARP");
    Ok((iface, ip, mac))
}

fn arp_sweep(net: Ipv4Net, opts: &SweepOptions) -> Result<BTreeMap<Ipv4Addr, String>, DiscoveryError> {
    let (iface, src_ip, src_mac) = select_interface(&net, opts.interface.as_deref())?;
    let config = datalink::Config { read_timeout: Some(Duration::from_millis(100)), ..Default::default() };
    let (mut tx, mut rx) = match datalink::channel(&iface, config) {
        Ok(Channel::Ethernet(tx, rx)) => (tx, rx),
        Ok(_) => return Err(DiscoveryError::Unavailable(format!("unsupported channel type on {}", iface.name))),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            return Err(DiscoveryError::PermissionDenied(e.to_string()))
        }
        Err(e) => return Err(DiscoveryError::Unavailable(e.to_string())),
    };

    let targets: Vec<Ipv4Addr> = net.hosts().collect();
    let mut found = BTreeMap::new();
    for round in 0..=opts.retries {
        let pending: Vec<Ipv4Addr> = targets.iter().filter(|ip| !found.contains_key(*ip)).copied().collect();
        if pending.is_empty() {
            break;
        }
        debug!(round, pending = pending.len(), "sending ARP requests");
        for target in pending {
            send_request(tx.as_mut(), src_mac, src_ip, target)?;
        }
        collect_replies(rx.as_mut(), &net, opts.timeout, &mut found);
    }
    Ok(found)
}

fn arp_request(src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> Option<[u8; 42]> {
    let mut frame = [0u8; 42];
    let mut arp_buf = [0u8; 28];
    {
        let mut arp = MutableArpPacket::new(&mut arp_buf)?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(ArpOperations::Request);
        arp.set_sender_hw_addr(src_mac);
        arp.set_sender_proto_addr(src_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target);
    }
    {
        let mut eth = MutableEthernetPacket::new(&mut frame)?;
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(src_mac);
        eth.set_ethertype(EtherTypes::Arp);
        eth.set_payload(&arp_buf);
    }
    Some(frame)
}

fn send_request(tx: &mut dyn DataLinkSender, src_mac: MacAddr, src_ip: Ipv4Addr, target: Ipv4Addr) -> Result<(), DiscoveryError> {
    let Some(frame) = arp_request(src_mac, src_ip, target) else {
        return Err(DiscoveryError::Unavailable("cannot build ARP frame".into()));
    };
    match tx.send_to(&frame, None) {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) if e.kind() == io::ErrorKind::PermissionDenied => Err(DiscoveryError::PermissionDenied(e.to_string())),
        Some(Err(e)) => {
            debug!(%target, error = %e, "ARP send failed");
            Ok(())
        }
        None => Err(DiscoveryError::Unavailable("datalink sender closed".into())),
    }
}

/// Parse one captured frame as an ARP reply; `None` for anything else.
fn parse_reply(frame: &[u8]) -> Option<(Ipv4Addr, MacAddr)> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }
    Some((arp.get_sender_proto_addr(), arp.get_sender_hw_addr()))
}

fn collect_replies(rx: &mut dyn DataLinkReceiver, net: &Ipv4Net, wait: Duration, found: &mut BTreeMap<Ipv4Addr, String>) {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => {
                let Some((ip, mac)) = parse_reply(frame) else { continue };
                if !net.contains(&ip) {
                    debug!(%ip, "ignoring ARP reply outside target range");
                    continue;
                }
                found.entry(ip).or_insert_with(|| mac.to_string());
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => continue,
            Err(e) => {
                warn!(error = %e, "ARP receive failed");
                return;
            }
        }
    }
}

/// Timing for the unicast liveness check.
#[derive(Debug, Clone, Copy)]
pub struct EchoOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for EchoOptions {
    fn default() -> Self {
        EchoOptions { timeout: Duration::from_secs(1), retries: 2 }
    }
}

/// ICMP echo with a bounded number of retries. Every failure mode is `false`.
pub async fn reachability_probe(ip: Ipv4Addr, opts: EchoOptions) -> bool {
    let payload = [0u8; 56];
    for attempt in 0..=opts.retries {
        match timeout(opts.timeout, surge_ping::ping(IpAddr::V4(ip), &payload)).await {
            Ok(Ok((_, rtt))) => {
                debug!(%ip, attempt, rtt_ms = rtt.as_millis() as u64, "echo reply");
                return true;
            }
            Ok(Err(e)) => debug!(%ip, attempt, error = %e, "echo failed"),
            Err(_) => debug!(%ip, attempt, "echo timed out"),
        }
    }
    false
}
