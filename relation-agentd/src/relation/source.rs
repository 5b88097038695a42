use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use shared::types::{Peer, RelationSnapshot};

/// Queryable peer list for named relations.
pub trait RelationSource: Send {
    /// Current peers on `relation`. A relation nobody has joined has zero peers.
    fn snapshot(&self, relation: &str) -> Result<RelationSnapshot>;
}

/// Sink for facts this unit publishes to downstream consumers.
pub trait RelationPublisher: Send {
    fn publish(&self, relation: &str, unit: &str, fields: &BTreeMap<String, String>) -> Result<()>;
}

/// Reads peer data laid out as `<root>/<relation>/<unit>.json`, one flat JSON
/// object per unit.
pub struct DirRelationSource {
    root: PathBuf,
}

impl DirRelationSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RelationSource for DirRelationSource {
    fn snapshot(&self, relation: &str) -> Result<RelationSnapshot> {
        let dir = self.root.join(relation);
        if !dir.is_dir() {
            return Ok(RelationSnapshot::empty(relation));
        }

        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to read relation directory: {}", dir.display()))?;

        let mut peers = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list relation directory: {}", dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(unit_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let fields = read_fields(&path)?;
            peers.push(Peer {
                unit_id: unit_id.to_string(),
                fields,
            });
        }
        peers.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));

        Ok(RelationSnapshot::new(relation, peers))
    }
}

/// Read one unit's published fields. Non-string values are ignored.
fn read_fields(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read peer data: {}", path.display()))?;
    let value: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse peer data: {}", path.display()))?;

    let fields = value
        .into_iter()
        .filter_map(|(name, value)| match value {
            serde_json::Value::String(s) => Some((name, s)),
            _ => None,
        })
        .collect();

    Ok(fields)
}

/// Writes published facts to `<root>/<relation>/<unit>.json`.
pub struct DirRelationPublisher {
    root: PathBuf,
}

impl DirRelationPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RelationPublisher for DirRelationPublisher {
    fn publish(&self, relation: &str, unit: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let dir = self.root.join(relation);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        // Unit ids look like "app/0", which is not a valid file name
        let path = dir.join(format!("{}.json", unit.replace('/', "-")));
        let json = serde_json::to_string_pretty(fields)
            .context("Failed to serialize published fields")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!("Published {} field(s) on {} as {}", fields.len(), relation, unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_relation_has_no_peers() {
        let dir = tempdir().unwrap();
        let source = DirRelationSource::new(dir.path());

        let snapshot = source.snapshot("ceph").unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.relation, "ceph");
    }

    #[test]
    fn test_reads_unit_files() {
        let dir = tempdir().unwrap();
        let relation_dir = dir.path().join("ceph");
        std::fs::create_dir_all(&relation_dir).unwrap();
        std::fs::write(
            relation_dir.join("ceph-mon-1.json"),
            r#"{"private-address": "10.0.0.2", "auth": "cephx", "weight": 3}"#,
        )
        .unwrap();
        std::fs::write(
            relation_dir.join("ceph-mon-0.json"),
            r#"{"ceph-public-address": "10.0.0.1"}"#,
        )
        .unwrap();
        std::fs::write(relation_dir.join("README"), "ignored").unwrap();

        let snapshot = DirRelationSource::new(dir.path()).snapshot("ceph").unwrap();
        assert_eq!(snapshot.peers.len(), 2);
        assert_eq!(snapshot.peers[0].unit_id, "ceph-mon-0");
        assert_eq!(snapshot.peers[1].field("auth"), Some("cephx"));
        assert_eq!(snapshot.peers[1].field("weight"), None);
    }

    #[test]
    fn test_malformed_peer_data_is_an_error() {
        let dir = tempdir().unwrap();
        let relation_dir = dir.path().join("ceph");
        std::fs::create_dir_all(&relation_dir).unwrap();
        std::fs::write(relation_dir.join("ceph-mon-0.json"), "not json").unwrap();

        assert!(DirRelationSource::new(dir.path()).snapshot("ceph").is_err());
    }

    #[test]
    fn test_publish_round_trips_through_source() {
        let dir = tempdir().unwrap();
        let publisher = DirRelationPublisher::new(dir.path());
        let fields = BTreeMap::from([("ports".to_string(), "80 443".to_string())]);

        publisher.publish("website", "ceph-dash/0", &fields).unwrap();

        let snapshot = DirRelationSource::new(dir.path()).snapshot("website").unwrap();
        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.peers[0].unit_id, "ceph-dash-0");
        assert_eq!(snapshot.peers[0].field("ports"), Some("80 443"));
    }
}
