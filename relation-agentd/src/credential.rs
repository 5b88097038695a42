use std::process::Command;
use anyhow::{bail, Context, Result};
use shared::types::PrincipalType;

/// External authority that holds named credentials.
pub trait CredentialAuthority: Send {
    /// Query once for `<principal>.<id>`. Any failure is returned as an error.
    fn query(&self, principal: PrincipalType, id: &str) -> Result<String>;
}

/// Queries the cluster with `ceph auth get <type>.<id>`.
pub struct CephAuthCli {
    binary: String,
}

impl CephAuthCli {
    pub fn new() -> Self {
        Self::with_binary("ceph")
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

impl Default for CephAuthCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialAuthority for CephAuthCli {
    fn query(&self, principal: PrincipalType, id: &str) -> Result<String> {
        let entity = format!("{}.{}", principal, id);
        let output = Command::new(&self.binary)
            .args(["auth", "get", &entity])
            .output()
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            bail!(
                "{} auth get {} exited with {}: {}",
                self.binary,
                entity,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        String::from_utf8(output.stdout).context("Credential output is not UTF-8")
    }
}

/// Fetch an existing credential. A credential that cannot be fetched is
/// simply absent: it may not have been provisioned yet.
pub fn lookup(authority: &dyn CredentialAuthority, principal: PrincipalType, id: &str) -> Option<String> {
    match authority.query(principal, id) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!("No credential for {}.{}: {:#}", principal, id, e);
            None
        }
    }
}
