use std::collections::BTreeMap;
use serde::Serialize;
use sha2::{Sha256, Digest};
use shared::types::RelationSnapshot;
use crate::context::Context;

#[derive(Serialize)]
struct PeerView<'a> {
    relation: &'a str,
    unit_id: &'a str,
    fields: &'a BTreeMap<String, String>,
}

/// Computes a SHA-256 hash over the peers of several relations.
/// Peers are sorted by relation then unit id, so traversal order never
/// changes the result.
pub fn snapshot_hash(snapshots: &[RelationSnapshot]) -> String {
    let mut views: Vec<PeerView<'_>> = snapshots
        .iter()
        .flat_map(|snapshot| {
            snapshot.peers.iter().map(|peer| PeerView {
                relation: &snapshot.relation,
                unit_id: &peer.unit_id,
                fields: &peer.fields,
            })
        })
        .collect();
    views.sort_by(|a, b| (a.relation, a.unit_id).cmp(&(b.relation, b.unit_id)));

    let json = serde_json::to_string(&views)
        .expect("Failed to serialize peers for hashing");

    hex::encode(Sha256::digest(json.as_bytes()))
}

/// Hash of a merged context, recorded when a service becomes ready.
pub fn context_hash(context: &Context) -> String {
    let json = serde_json::to_string(context)
        .expect("Failed to serialize context for hashing");

    hex::encode(Sha256::digest(json.as_bytes()))
}
