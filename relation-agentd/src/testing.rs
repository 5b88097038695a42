//! Recording fakes for the host primitives.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use anyhow::{bail, Result};
use shared::types::{PrincipalType, RelationSnapshot};
use crate::config::ServiceDefinition;
use crate::context::Context;
use crate::credential::CredentialAuthority;
use crate::primitives::{
    Capabilities, CommandRunner, PackageInstaller, ProcessSupervisor, TemplateRenderer,
};
use crate::relation::source::{RelationPublisher, RelationSource};

/// Shared call log. Calls starting with a failing prefix return an error.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Vec<String>>>,
    rendered: Arc<Mutex<Vec<Context>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn rendered(&self) -> Vec<Context> {
        self.rendered.lock().unwrap().clone()
    }

    pub fn fail(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call.clone());
        if self.failing.lock().unwrap().iter().any(|p| call.starts_with(p)) {
            bail!("injected failure: {}", call);
        }
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            installer: Box::new(FakeInstaller(self.clone())),
            renderer: Box::new(FakeRenderer(self.clone())),
            supervisor: Box::new(FakeSupervisor(self.clone())),
            runner: Box::new(FakeRunner(self.clone())),
        }
    }
}

struct FakeInstaller(Recorder);

impl PackageInstaller for FakeInstaller {
    fn ensure_installed(&self, packages: &[String]) -> Result<()> {
        self.0.record(format!("install {}", packages.join(" ")))
    }
}

struct FakeRenderer(Recorder);

impl TemplateRenderer for FakeRenderer {
    fn render(&self, source: &str, target: &Path, context: &Context) -> Result<()> {
        self.0.record(format!("render {} {}", source, target.display()))?;
        self.0.rendered.lock().unwrap().push(context.clone());
        Ok(())
    }
}

struct FakeSupervisor(Recorder);

impl ProcessSupervisor for FakeSupervisor {
    fn start(&self, service: &str) -> Result<()> {
        self.0.record(format!("start {}", service))
    }

    fn stop(&self, service: &str) -> Result<()> {
        self.0.record(format!("stop {}", service))
    }
}

struct FakeRunner(Recorder);

impl CommandRunner for FakeRunner {
    fn run(&self, argv: &[String]) -> Result<()> {
        self.0.record(format!("exec {}", argv.join(" ")))
    }
}

/// In-memory relations that tests can rewrite between passes.
#[derive(Clone, Default)]
pub struct MemoryRelations {
    snapshots: Arc<Mutex<BTreeMap<String, RelationSnapshot>>>,
    published: Arc<Mutex<Vec<(String, String, BTreeMap<String, String>)>>>,
    publish_failures: Arc<Mutex<usize>>,
}

impl MemoryRelations {
    pub fn set(&self, snapshot: RelationSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.relation.clone(), snapshot);
    }

    pub fn published(&self) -> Vec<(String, String, BTreeMap<String, String>)> {
        self.published.lock().unwrap().clone()
    }

    /// Make the next `count` publishes fail
    pub fn fail_publishes(&self, count: usize) {
        *self.publish_failures.lock().unwrap() = count;
    }
}

impl RelationSource for MemoryRelations {
    fn snapshot(&self, relation: &str) -> Result<RelationSnapshot> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(relation)
            .cloned()
            .unwrap_or_else(|| RelationSnapshot::empty(relation)))
    }
}

impl RelationPublisher for MemoryRelations {
    fn publish(&self, relation: &str, unit: &str, fields: &BTreeMap<String, String>) -> Result<()> {
        let mut failures = self.publish_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            bail!("disk full");
        }
        drop(failures);

        self.published
            .lock()
            .unwrap()
            .push((relation.to_string(), unit.to_string(), fields.clone()));
        Ok(())
    }
}

/// Knows only `client.admin`.
pub struct AdminOnlyAuthority;

impl CredentialAuthority for AdminOnlyAuthority {
    fn query(&self, principal: PrincipalType, id: &str) -> Result<String> {
        match (principal, id) {
            (PrincipalType::Client, "admin") => Ok("[client.admin]\n\tkey = AQBk\n".to_string()),
            _ => bail!("Error ENOENT: failed to find {}.{}", principal, id),
        }
    }
}

pub fn ceph_dash(config_dir: impl Into<PathBuf>) -> ServiceDefinition {
    let config_dir = config_dir.into();
    let contents = format!(
        r#"
        name = "ceph-dash"
        ports = [80]
        provided_outputs = ["website"]
        packages = ["ceph-common"]
        config_dir = "{dir}"
        templates = [{{ source = "ceph.conf", target = "{dir}/ceph.conf" }}]
        data_ready = [
            {{ kind = "render", source = "upstart.conf", target = "/etc/init/ceph-dash.conf" }},
            {{ kind = "log", message = "ceph-dash configured" }},
        ]
        "#,
        dir = config_dir.display()
    );
    toml::from_str(&contents).unwrap()
}
