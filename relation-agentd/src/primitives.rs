//! Host primitives the gate drives: package installation, template
//! rendering, process supervision and command execution.
//!
//! The gate only decides when and with what data these run. Each is a trait
//! so evaluation can be exercised without touching the host.

use std::path::{Path, PathBuf};
use std::process::Command;
use anyhow::{bail, Context, Result};
use crate::context::Context as RenderContext;

pub trait PackageInstaller: Send {
    /// Install any of `packages` that are missing. Idempotent.
    fn ensure_installed(&self, packages: &[String]) -> Result<()>;
}

pub trait TemplateRenderer: Send {
    fn render(&self, source: &str, target: &Path, context: &RenderContext) -> Result<()>;
}

pub trait ProcessSupervisor: Send {
    fn start(&self, service: &str) -> Result<()>;
    fn stop(&self, service: &str) -> Result<()>;
}

pub trait CommandRunner: Send {
    fn run(&self, argv: &[String]) -> Result<()>;
}

/// The set of primitives one evaluation pass may invoke.
pub struct Capabilities {
    pub installer: Box<dyn PackageInstaller>,
    pub renderer: Box<dyn TemplateRenderer>,
    pub supervisor: Box<dyn ProcessSupervisor>,
    pub runner: Box<dyn CommandRunner>,
}

impl Capabilities {
    /// Primitives backed by apt, systemd and files under `template_dir`
    pub fn host(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            installer: Box::new(AptInstaller),
            renderer: Box::new(FileRenderer::new(template_dir)),
            supervisor: Box::new(SystemdSupervisor),
            runner: Box::new(ShellRunner),
        }
    }
}

fn run_checked(command: &mut Command) -> Result<()> {
    let program = command.get_program().to_string_lossy().to_string();
    let output = command
        .output()
        .with_context(|| format!("Failed to run {}", program))?;

    if !output.status.success() {
        bail!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

pub struct AptInstaller;

impl AptInstaller {
    fn is_installed(package: &str) -> bool {
        Command::new("dpkg-query")
            .args(["-W", "-f=${Status}", package])
            .output()
            .map(|out| out.status.success() && String::from_utf8_lossy(&out.stdout).contains("ok installed"))
            .unwrap_or(false)
    }
}

impl PackageInstaller for AptInstaller {
    fn ensure_installed(&self, packages: &[String]) -> Result<()> {
        let missing: Vec<&str> = packages
            .iter()
            .map(String::as_str)
            .filter(|package| !Self::is_installed(package))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }

        tracing::info!("Installing packages: {}", missing.join(" "));
        run_checked(
            Command::new("apt-get")
                .args(["install", "-y", "--no-install-recommends"])
                .args(&missing)
                .env("DEBIAN_FRONTEND", "noninteractive"),
        )
        .with_context(|| format!("Failed to install {}", missing.join(" ")))
    }
}

/// Renders `{{ key }}` placeholders from templates stored under one directory.
pub struct FileRenderer {
    template_dir: PathBuf,
}

impl FileRenderer {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }
}

impl TemplateRenderer for FileRenderer {
    fn render(&self, source: &str, target: &Path, context: &RenderContext) -> Result<()> {
        let source_path = self.template_dir.join(source);
        let template = std::fs::read_to_string(&source_path)
            .with_context(|| format!("Failed to read template: {}", source_path.display()))?;

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(target, substitute(&template, context))
            .with_context(|| format!("Failed to write {}", target.display()))?;

        tracing::info!("Rendered {} to {}", source, target.display());
        Ok(())
    }
}

/// Replace each `{{ key }}` with its context value. Unknown keys render empty;
/// an unterminated placeholder is copied through unchanged.
pub fn substitute(template: &str, context: &RenderContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                out.push_str(context.get(key).unwrap_or(""));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub struct SystemdSupervisor;

impl ProcessSupervisor for SystemdSupervisor {
    fn start(&self, service: &str) -> Result<()> {
        run_checked(Command::new("systemctl").args(["start", service]))
    }

    fn stop(&self, service: &str) -> Result<()> {
        run_checked(Command::new("systemctl").args(["stop", service]))
    }
}

pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, argv: &[String]) -> Result<()> {
        let Some((program, args)) = argv.split_first() else {
            bail!("Empty command");
        };
        run_checked(Command::new(program).args(args))
    }
}
