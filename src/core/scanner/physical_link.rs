// src/core/scanner/physical_link.rs

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use tracing::{debug, error, info};

use crate::core::models::{Gateway, InterfaceInfo, Layer, PhysicalLinkLayer};
use crate::core::scanner::Probe;
use crate::core::target::Target;

const ROUTE_TABLE: &str = "/proc/net/route";

/// Layers 1-2: the interfaces of the machine running the analysis. The target
/// plays no part here.
pub struct PhysicalLinkProbe;

impl Probe for PhysicalLinkProbe {
    type Output = PhysicalLinkLayer;

    fn layer(&self) -> Layer {
        Layer::PhysicalLink
    }

    async fn analyze(&self, _target: &Target) -> PhysicalLinkLayer {
        info!("Starting physical/data link probe (local interfaces).");

        // Interface enumeration and the route table read are blocking calls.
        let result = tokio::task::spawn_blocking(|| {
            let interfaces = describe_interfaces(&datalink::interfaces());
            (interfaces, read_default_gateway())
        })
        .await;

        match result {
            Ok((interfaces, default_gateway)) => {
                info!(interfaces = interfaces.len(), gateway = ?default_gateway, "Physical/data link probe finished.");
                PhysicalLinkLayer { interfaces, default_gateway, error: None }
            }
            Err(e) => {
                error!(error = %e, "Interface enumeration task failed.");
                PhysicalLinkLayer {
                    error: Some(format!("Interface enumeration failed: {}", e)),
                    ..Default::default()
                }
            }
        }
    }
}

/// Keeps every interface with a hardware address, paired with its first IPv4.
fn describe_interfaces(interfaces: &[NetworkInterface]) -> BTreeMap<String, InterfaceInfo> {
    interfaces
        .iter()
        .filter_map(|iface| {
            let mac = iface.mac?;
            let ip = iface
                .ips
                .iter()
                .find_map(|net| match net {
                    IpNetwork::V4(v4) => Some(v4.ip().to_string()),
                    IpNetwork::V6(_) => None,
                })
                .unwrap_or_else(|| "No IPv4".to_string());
            debug!(name = %iface.name, %mac, ip, "Found interface.");
            Some((iface.name.clone(), InterfaceInfo { mac: mac.to_string(), ip }))
        })
        .collect()
}

fn read_default_gateway() -> Option<Gateway> {
    match std::fs::read_to_string(ROUTE_TABLE) {
        Ok(contents) => parse_default_route(&contents),
        Err(e) => {
            debug!(path = ROUTE_TABLE, error = %e, "Route table unavailable, no default gateway.");
            None
        }
    }
}

/// Finds the IPv4 default route in the kernel's route table. Addresses in
/// that file are little-endian hex.
pub fn parse_default_route(contents: &str) -> Option<Gateway> {
    contents.lines().skip(1).find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (interface, destination, gateway) = (fields.first()?, fields.get(1)?, fields.get(2)?);
        if *destination != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(gateway, 16).ok()?;
        let gateway_ip = Ipv4Addr::from(raw.swap_bytes());
        Some(Gateway { gateway_ip: gateway_ip.to_string(), interface: interface.to_string() })
    })
}
