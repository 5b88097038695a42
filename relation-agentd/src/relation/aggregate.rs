use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use shared::protocol::{
    CTX_AUTH, CTX_KEY, CTX_MON_HOSTS, CTX_USE_SYSLOG, FIELD_AUTH, FIELD_KEY,
    FIELD_PRIVATE_ADDRESS, FIELD_PUBLIC_ADDRESS, OPTION_USE_SYSLOG,
};
use shared::types::RelationSnapshot;
use crate::config::LocalOptions;
use crate::context::Context;

/// Merge every peer's published facts into one candidate context.
///
/// The result depends only on the snapshot's content: peers may arrive in any
/// order. An empty relation yields an empty context.
pub fn aggregate(snapshot: &RelationSnapshot, options: &LocalOptions) -> Context {
    if snapshot.is_empty() {
        return Context::default();
    }

    tracing::debug!(
        "Generating context from {} peers on {}",
        snapshot.peers.len(),
        snapshot.relation
    );

    let mut mon_hosts = BTreeSet::new();
    for peer in &snapshot.peers {
        let address = peer
            .field(FIELD_PUBLIC_ADDRESS)
            .or_else(|| peer.field(FIELD_PRIVATE_ADDRESS));
        match address {
            Some(address) => {
                mon_hosts.insert(format_host(address));
            }
            None => tracing::debug!("Peer {} published no address", peer.unit_id),
        }
    }

    let mut context = Context::default();
    if !mon_hosts.is_empty() {
        let hosts: Vec<String> = mon_hosts.into_iter().collect();
        context.insert(CTX_MON_HOSTS, hosts.join(" "));
    }
    if let Some(auth) = agreed_value(snapshot, FIELD_AUTH) {
        context.insert(CTX_AUTH, auth);
    }
    if let Some(key) = agreed_value(snapshot, FIELD_KEY) {
        context.insert(CTX_KEY, key);
    }
    let use_syslog = options
        .get(OPTION_USE_SYSLOG)
        .unwrap_or_else(|| "false".to_string());
    context.insert(CTX_USE_SYSLOG, use_syslog);

    context
}

/// The single value every publishing peer agrees on.
///
/// Cluster-wide secrets must be identical across peers; disagreement leaves
/// the field unset so the context cannot validate.
fn agreed_value(snapshot: &RelationSnapshot, field: &str) -> Option<String> {
    let values: BTreeSet<&str> = snapshot
        .peers
        .iter()
        .filter_map(|peer| peer.field(field))
        .collect();

    match values.len() {
        0 => None,
        1 => values.into_iter().next().map(str::to_string),
        distinct => {
            tracing::warn!(
                "Peers on {} disagree on {} ({} distinct values), leaving it unset",
                snapshot.relation,
                field,
                distinct
            );
            None
        }
    }
}

/// Bracket IPv6 literals for use in URIs; anything else is kept verbatim.
pub fn format_host(address: &str) -> String {
    match address.parse::<Ipv6Addr>() {
        Ok(_) => format!("[{}]", address),
        Err(_) => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::types::Peer;

    fn options() -> LocalOptions {
        LocalOptions::default()
    }

    fn mon(unit: &str, public: &str) -> Peer {
        Peer::new(unit)
            .with_field(FIELD_PUBLIC_ADDRESS, public)
            .with_field(FIELD_AUTH, "x")
            .with_field(FIELD_KEY, "k1")
    }

    #[test]
    fn test_empty_relation_yields_empty_context() {
        let context = aggregate(&RelationSnapshot::empty("ceph"), &options());
        assert!(context.is_empty());
    }

    #[test]
    fn test_two_peers_merge() {
        let snapshot = RelationSnapshot::new(
            "ceph",
            vec![mon("ceph-mon/0", "10.0.0.1"), mon("ceph-mon/1", "10.0.0.2")],
        );
        let context = aggregate(&snapshot, &options());

        assert_eq!(context.get(CTX_MON_HOSTS), Some("10.0.0.1 10.0.0.2"));
        assert_eq!(context.get(CTX_AUTH), Some("x"));
        assert_eq!(context.get(CTX_KEY), Some("k1"));
        assert_eq!(context.get(CTX_USE_SYSLOG), Some("false"));
    }

    #[test]
    fn test_order_independent() {
        let peers = vec![
            mon("ceph-mon/0", "10.0.0.3"),
            mon("ceph-mon/1", "fd00::2"),
            mon("ceph-mon/2", "10.0.0.1"),
            mon("ceph-mon/3", "mon-b.example"),
        ];
        let expected = aggregate(&RelationSnapshot::new("ceph", peers.clone()), &options());

        // Every rotation and the reversal must produce identical output
        for shift in 0..peers.len() {
            let mut rotated = peers.clone();
            rotated.rotate_left(shift);
            let context = aggregate(&RelationSnapshot::new("ceph", rotated.clone()), &options());
            assert_eq!(context, expected);

            rotated.reverse();
            let context = aggregate(&RelationSnapshot::new("ceph", rotated), &options());
            assert_eq!(context, expected);
        }
        assert_eq!(
            expected.get(CTX_MON_HOSTS),
            Some("10.0.0.1 10.0.0.3 [fd00::2] mon-b.example")
        );
    }

    #[test]
    fn test_public_address_preferred() {
        let peer = mon("ceph-mon/0", "192.168.1.10").with_field(FIELD_PRIVATE_ADDRESS, "10.0.0.9");
        let context = aggregate(&RelationSnapshot::new("ceph", vec![peer]), &options());
        assert_eq!(context.get(CTX_MON_HOSTS), Some("192.168.1.10"));
    }

    #[test]
    fn test_private_ipv6_bracketed() {
        let peer = Peer::new("ceph-mon/0").with_field(FIELD_PRIVATE_ADDRESS, "fe80::1");
        let context = aggregate(&RelationSnapshot::new("ceph", vec![peer]), &options());
        assert_eq!(context.get(CTX_MON_HOSTS), Some("[fe80::1]"));
        assert_eq!(context.get(CTX_AUTH), None);
    }

    #[test]
    fn test_format_host() {
        assert_eq!(format_host("2001:db8::10"), "[2001:db8::10]");
        assert_eq!(format_host("10.1.2.3"), "10.1.2.3");
        assert_eq!(format_host("mon.example.com"), "mon.example.com");
        assert_eq!(format_host("[::1]"), "[::1]");
    }

    #[test]
    fn test_conflicting_key_left_unset() {
        let snapshot = RelationSnapshot::new(
            "ceph",
            vec![
                mon("ceph-mon/0", "10.0.0.1"),
                mon("ceph-mon/1", "10.0.0.2").with_field(FIELD_KEY, "k2"),
            ],
        );
        let context = aggregate(&snapshot, &options());
        assert_eq!(context.get(CTX_KEY), None);
        assert_eq!(context.get(CTX_AUTH), Some("x"));
    }

    #[test]
    fn test_peer_without_secret_does_not_conflict() {
        let snapshot = RelationSnapshot::new(
            "ceph",
            vec![
                mon("ceph-mon/0", "10.0.0.1"),
                Peer::new("ceph-mon/1").with_field(FIELD_PUBLIC_ADDRESS, "10.0.0.2"),
            ],
        );
        let context = aggregate(&snapshot, &options());
        assert_eq!(context.get(CTX_KEY), Some("k1"));
        assert_eq!(context.get(CTX_MON_HOSTS), Some("10.0.0.1 10.0.0.2"));
    }

    #[test]
    fn test_use_syslog_from_local_options() {
        let options: LocalOptions = [(OPTION_USE_SYSLOG.to_string(), toml::Value::Boolean(true))]
            .into_iter()
            .collect();
        let snapshot = RelationSnapshot::new("ceph", vec![mon("ceph-mon/0", "10.0.0.1")]);
        let context = aggregate(&snapshot, &options);
        assert_eq!(context.get(CTX_USE_SYSLOG), Some("true"));
    }
}
