//! Client address resolution, for handlers that record or whitelist caller IPs.

use std::{net::IpAddr, str::FromStr};

use actix_web::HttpRequest;
use log::{debug, trace};
use regex::Regex;

/// Resolves the caller's IP address. Proxy headers are only trusted when the matching
/// configuration flag says the deployment sits behind one; otherwise the connection's peer
/// address wins. Preference order: `X-Forwarded-For`, then `Forwarded`, then the peer address.
pub fn get_remote_ip(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<IpAddr> {
    if use_x_forwarded_for {
        if let Some(ip) = from_x_forwarded_for(req) {
            debug!("Remote address {ip} taken from the X-Forwarded-For header");
            return Some(ip);
        }
    }
    if use_forwarded {
        if let Some(ip) = from_forwarded(req) {
            debug!("Remote address {ip} taken from the Forwarded header");
            return Some(ip);
        }
    }
    let peer = req.connection_info().peer_addr().map(|a| a.to_string());
    trace!("Remote address from the connection: {peer:?}");
    peer.and_then(|s| IpAddr::from_str(&s).ok())
}

fn from_x_forwarded_for(req: &HttpRequest) -> Option<IpAddr> {
    let header = req.headers().get("X-Forwarded-For")?.to_str().ok()?;
    // Each proxy appends to the list; the left-most entry is the original client.
    let first = header.split(',').next()?.trim();
    IpAddr::from_str(first).ok()
}

fn from_forwarded(req: &HttpRequest) -> Option<IpAddr> {
    let re = Regex::new(r"for=(?P<ip>[^;,]+)").expect("The Forwarded header pattern is valid");
    let header = req.headers().get("Forwarded")?.to_str().ok()?;
    let ip = re.captures(header)?.name("ip")?.as_str().trim().trim_matches('"');
    IpAddr::from_str(ip).ok()
}

/// The remote IP as the engine wants it: a plain string, or `None` when the connection has no
/// resolvable peer.
pub fn remote_ip_string(req: &HttpRequest, use_x_forwarded_for: bool, use_forwarded: bool) -> Option<String> {
    get_remote_ip(req, use_x_forwarded_for, use_forwarded).map(|ip| ip.to_string())
}
