//! Lease option translation
//!
//! Converts the flat key/value payload delivered by an external DHCP
//! client event into structured IPv4 configuration. The classless
//! static route handling follows the draft RFC semantics: classless
//! routes, when present, override any `new_routers` gateway provided.
//!
//! Everything here is a pure function of its inputs; the offline
//! `test_translate` path on the manager goes through this module
//! without touching the registry.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Event key holding the originating interface name
pub const OPT_INTERFACE: &str = "interface";
/// Event key holding the textual pid of the reporting client process
pub const OPT_PID: &str = "pid";
/// Event key holding the lease-event reason
pub const OPT_REASON: &str = "reason";

const OPT_CLASSLESS_ROUTES: &str = "new_classless_static_routes";
const OPT_MS_CLASSLESS_ROUTES: &str = "new_ms_classless_static_routes";

/// One event's raw payload: a flat option-name → option-value mapping.
///
/// Produced transiently per event and discarded once handled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseOptions(HashMap<String, String>);

impl LeaseOptions {
    /// Create an empty option map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an option, replacing any previous value for the key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up an option value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Interface name the event claims to be for
    pub fn interface(&self) -> Option<&str> {
        self.get(OPT_INTERFACE)
    }

    /// Process identity the event claims, parsed as a non-negative integer
    pub fn pid(&self) -> Option<u32> {
        self.get(OPT_PID)?.trim().parse().ok()
    }

    /// Lease-event reason string
    pub fn reason(&self) -> Option<&str> {
        self.get(OPT_REASON)
    }

    /// Number of options present
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for LeaseOptions {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LeaseOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A classless static route entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Route {
    /// Destination network address
    pub dest: Ipv4Addr,
    /// Destination prefix length
    pub prefix: u8,
    /// Next-hop address
    pub next_hop: Ipv4Addr,
}

/// Structured IPv4 configuration derived from one lease event
///
/// Routes keep their arrival order. A `0.0.0.0/0` classless route does
/// not appear in `routes`; it lands in `gateway` instead, and when a
/// batch declares several such defaults the last one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpConfig {
    /// Leased address
    pub address: Option<Ipv4Addr>,
    /// Prefix length of the leased address
    pub prefix: Option<u8>,
    /// Default gateway (classless default-route override, or `new_routers`)
    pub gateway: Option<Ipv4Addr>,
    /// Discrete route entries, in arrival order
    pub routes: Vec<Ipv4Route>,
    /// DNS servers
    pub dns_servers: Vec<Ipv4Addr>,
    /// Domain name
    pub domain: Option<String>,
    /// Lease duration in seconds, as reported by the server
    pub lease_time_secs: Option<u32>,
}

/// Parse the classless static route batch out of `options` into `config`.
///
/// Looks up `new_classless_static_routes`, falling back to the
/// Microsoft spelling `new_ms_classless_static_routes`; the first
/// present value wins, the two are never merged.
///
/// The value is consumed as space-separated (destination, next-hop)
/// pairs. An odd token count discards the whole batch; an individually
/// malformed pair is skipped and processing continues. A pair with
/// destination exactly `0.0.0.0/0` is a default-gateway declaration:
/// its next hop becomes the gateway override, last declaration wins.
///
/// Returns whether at least one route-or-gateway fact was derived, so
/// callers can distinguish "ran but found nothing" from "found data".
pub fn process_classless_routes(options: &LeaseOptions, config: &mut IpConfig) -> bool {
    let raw = match options
        .get(OPT_CLASSLESS_ROUTES)
        .or_else(|| options.get(OPT_MS_CLASSLESS_ROUTES))
    {
        Some(raw) if !raw.is_empty() => raw,
        _ => return false,
    };

    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if tokens.is_empty() {
        return false;
    }
    if tokens.len() % 2 != 0 {
        info!("classless static routes provided, but invalid");
        return false;
    }

    let mut have_routes = false;
    for pair in tokens.chunks(2) {
        let (dest_str, hop_str) = (pair[0], pair[1]);

        // Destination may carry a /prefix suffix; bare addresses are host routes
        let (addr_str, prefix) = match dest_str.split_once('/') {
            Some((addr, prefix_str)) => match prefix_str.parse::<u8>() {
                Ok(prefix) if prefix <= 32 => (addr, prefix),
                _ => {
                    warn!("invalid classless static route prefix: '{prefix_str}'");
                    continue;
                }
            },
            None => (dest_str, 32),
        };

        let Ok(dest) = addr_str.parse::<Ipv4Addr>() else {
            warn!("invalid classless static route address: '{addr_str}'");
            continue;
        };
        let Ok(next_hop) = hop_str.parse::<Ipv4Addr>() else {
            warn!("invalid classless static route gateway: '{hop_str}'");
            continue;
        };

        have_routes = true;
        if prefix == 0 && dest.is_unspecified() {
            // Default-gateway declaration; last one in the batch wins
            config.gateway = Some(next_hop);
        } else {
            debug!("classless static route {dest}/{prefix} gw {next_hop}");
            config.routes.push(Ipv4Route {
                dest,
                prefix,
                next_hop,
            });
        }
    }

    have_routes
}

/// Translate one lease event's options into an [`IpConfig`].
///
/// `parse_routes` is the backend's classless-route hook; the default
/// backend behavior is [`process_classless_routes`]. Classless routes
/// override `new_routers`: the routers list is only consulted for a
/// gateway when the batch supplied none.
///
/// Returns `None` when the event carries neither a leased address nor
/// any route data, which callers treat as malformed critical data.
pub fn options_to_config_with<F>(
    options: &LeaseOptions,
    reason: &str,
    parse_routes: F,
) -> Option<IpConfig>
where
    F: FnOnce(&LeaseOptions, &mut IpConfig) -> bool,
{
    let mut config = IpConfig::default();

    if let Some(addr) = options.get("new_ip_address") {
        match addr.parse::<Ipv4Addr>() {
            Ok(addr) => config.address = Some(addr),
            Err(_) => warn!("lease event ({reason}) carried invalid address '{addr}'"),
        }
    }

    if let Some(mask) = options.get("new_subnet_mask") {
        config.prefix = mask
            .parse::<Ipv4Addr>()
            .ok()
            .and_then(netmask_to_prefix)
            .or_else(|| {
                warn!("lease event ({reason}) carried invalid subnet mask '{mask}'");
                None
            });
    }

    let have_routes = parse_routes(options, &mut config);

    // Classless static routes override any routers provided
    if !have_routes
        && config.gateway.is_none()
        && let Some(routers) = options.get("new_routers")
    {
        config.gateway = routers
            .split_whitespace()
            .find_map(|r| r.parse::<Ipv4Addr>().ok());
    }

    if let Some(servers) = options.get("new_domain_name_servers") {
        config.dns_servers = servers
            .split_whitespace()
            .filter_map(|s| s.parse::<Ipv4Addr>().ok())
            .collect();
    }

    if let Some(domain) = options.get("new_domain_name") {
        if !domain.is_empty() {
            config.domain = Some(domain.to_string());
        }
    }

    if let Some(lease_time) = options.get("new_dhcp_lease_time") {
        config.lease_time_secs = lease_time.trim().parse().ok();
    }

    if config.address.is_none() && !have_routes {
        debug!("lease event ({reason}) yielded no usable configuration");
        return None;
    }

    Some(config)
}

/// Translate options using the default classless-route parsing
pub fn options_to_config(options: &LeaseOptions, reason: &str) -> Option<IpConfig> {
    options_to_config_with(options, reason, process_classless_routes)
}

/// Convert a dotted-quad netmask into a prefix length.
///
/// Non-contiguous masks are rejected.
fn netmask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) == 0 {
        Some(prefix as u8)
    } else {
        None
    }
}
