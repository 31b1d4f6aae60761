// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use log::debug;
use neli::{
    attr::Attribute,
    consts::{
        nl::NlmF,
        rtnl::{Arphrd, Ifla, RtAddrFamily, Rtm},
        socket::NlFamily,
    },
    nl::NlPayload,
    router::synchronous::{NlRouter, NlRouterReceiverHandle},
    rtnl::{Ifinfomsg, IfinfomsgBuilder},
};
use std::sync;

// struct rtnl_link_stats64 starts with these u64 fields, in order
const STATS64_FIELDS: usize = 8;

#[derive(Debug, Default, PartialEq)]
pub(super) struct LinkStats {
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

pub(super) struct Link {
    pub name: String,
    pub stats: LinkStats,
}

fn parse_stats64(buf: &[u8]) -> Option<LinkStats> {
    let mut vals = [0u64; STATS64_FIELDS];
    for (idx, val) in vals.iter_mut().enumerate() {
        let bytes = buf.get(idx * 8..idx * 8 + 8)?;
        *val = u64::from_ne_bytes(bytes.try_into().ok()?);
    }

    let [
        rx_packets,
        tx_packets,
        rx_bytes,
        tx_bytes,
        rx_errors,
        tx_errors,
        rx_dropped,
        tx_dropped,
    ] = vals;

    Some(LinkStats {
        rx_packets,
        tx_packets,
        rx_bytes,
        tx_bytes,
        rx_errors,
        tx_errors,
        rx_dropped,
        tx_dropped,
    })
}

fn parse_get_link_response(resp: &Ifinfomsg) -> Option<Link> {
    let mut name = None;
    let mut stats = None;
    for attr in resp.rtattrs().iter() {
        match attr.rta_type() {
            Ifla::Ifname => {
                name = attr.get_payload_as_with_len::<String>().ok();
            }
            Ifla::Stats64 => {
                stats = parse_stats64(attr.payload().as_ref());
            }
            _ => (),
        }
    }

    name.map(|name| Link {
        name,
        stats: stats.unwrap_or_default(),
    })
}

fn nl_socket() -> Result<NlRouter> {
    let (sock, _) = NlRouter::connect(NlFamily::Route, None, neli::utils::Groups::empty())
        .context("failed to connect to rtnetlink")?;
    sock.enable_ext_ack(true)?;
    sock.enable_strict_checking(true)?;

    Ok(sock)
}

fn dump_links(sock: &NlRouter) -> Result<Vec<Link>> {
    let req = IfinfomsgBuilder::default()
        .ifi_family(RtAddrFamily::Unspecified)
        .ifi_type(Arphrd::Netrom)
        .ifi_index(0)
        .build()?;
    let mut recv: NlRouterReceiverHandle<Rtm, Ifinfomsg> = sock
        .send(Rtm::Getlink, NlmF::DUMP, NlPayload::Payload(req))
        .context("failed to send to rtnetlink")?;

    let mut links = Vec::new();
    while let Some(msg) = recv.next_typed::<Rtm, Ifinfomsg>() {
        let msg = msg.context("failed to recv from rtnetlink")?;
        if let Some(link) = msg.get_payload().and_then(parse_get_link_response) {
            links.push(link);
        }
    }

    Ok(links)
}

struct Metrics {
    receive_bytes: metric::Info<1>,
    receive_packets: metric::Info<1>,
    receive_errs: metric::Info<1>,
    receive_drop: metric::Info<1>,
    transmit_bytes: metric::Info<1>,
    transmit_packets: metric::Info<1>,
    transmit_errs: metric::Info<1>,
    transmit_drop: metric::Info<1>,
}

pub(super) struct NetDev {
    // connected on first use and dropped after a failed dump
    sock: sync::Mutex<Option<NlRouter>>,
    metrics: Metrics,
}

fn net_info(name: &'static str, help: &'static str, unit: metric::Unit) -> metric::Info<1> {
    metric::Info {
        subsys: "network",
        name,
        help,
        unit,
        ty: metric::Type::Counter,
        label_keys: ["device"],
    }
}

pub(super) fn new(_paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    Ok(Box::new(NetDev::new()))
}

impl NetDev {
    fn new() -> Self {
        use metric::Unit;

        let metrics = Metrics {
            receive_bytes: net_info(
                "receive",
                "Network device statistic receive_bytes.",
                Unit::Bytes,
            ),
            receive_packets: net_info(
                "receive_packets",
                "Network device statistic receive_packets.",
                Unit::None,
            ),
            receive_errs: net_info(
                "receive_errs",
                "Network device statistic receive_errs.",
                Unit::None,
            ),
            receive_drop: net_info(
                "receive_drop",
                "Network device statistic receive_drop.",
                Unit::None,
            ),
            transmit_bytes: net_info(
                "transmit",
                "Network device statistic transmit_bytes.",
                Unit::Bytes,
            ),
            transmit_packets: net_info(
                "transmit_packets",
                "Network device statistic transmit_packets.",
                Unit::None,
            ),
            transmit_errs: net_info(
                "transmit_errs",
                "Network device statistic transmit_errs.",
                Unit::None,
            ),
            transmit_drop: net_info(
                "transmit_drop",
                "Network device statistic transmit_drop.",
                Unit::None,
            ),
        };

        NetDev {
            sock: sync::Mutex::new(None),
            metrics,
        }
    }

    fn links(&self) -> Result<Vec<Link>> {
        let mut guard = self
            .sock
            .lock()
            .map_err(|_| anyhow!("rtnetlink socket lock poisoned"))?;

        let sock = match guard.take() {
            Some(sock) => sock,
            None => {
                debug!("connecting to rtnetlink");
                nl_socket()?
            }
        };

        let links = dump_links(&sock)?;
        *guard = Some(sock);

        Ok(links)
    }

    fn write(&self, links: &[Link], enc: &mut metric::Encoder) {
        let fields: [(&metric::Info<1>, fn(&LinkStats) -> u64); 8] = [
            (&self.metrics.receive_bytes, |s| s.rx_bytes),
            (&self.metrics.receive_packets, |s| s.rx_packets),
            (&self.metrics.receive_errs, |s| s.rx_errors),
            (&self.metrics.receive_drop, |s| s.rx_dropped),
            (&self.metrics.transmit_bytes, |s| s.tx_bytes),
            (&self.metrics.transmit_packets, |s| s.tx_packets),
            (&self.metrics.transmit_errs, |s| s.tx_errors),
            (&self.metrics.transmit_drop, |s| s.tx_dropped),
        ];
        for (info, field) in fields {
            let mut menc = enc.with_info(info);
            for link in links {
                menc.write(&[link.name.as_str()], field(&link.stats));
            }
        }
    }
}

impl Collector for NetDev {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let links = self.links()?;
        self.write(&links, enc);

        Ok(())
    }
}
