//! Combined audio sink provisioning.
//!
//! Combined sinks are process-global OS resources: a declared sink is
//! created at most once per process, pre-existing sinks with the declared
//! name are reused, and teardown unloads exactly the modules this process
//! loaded. The registry lives in a `OnceLock` so every provisioner instance
//! shares it; setup is idempotent.

use std::collections::HashMap;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CombinedSinkDecl;

/// sink name -> pactl module id (None when the sink pre-existed).
type SinkRegistry = Mutex<HashMap<String, Option<u32>>>;

fn registry() -> &'static SinkRegistry {
    static REGISTRY: OnceLock<SinkRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Creates and releases combined sinks matching config declarations.
#[async_trait]
pub trait SinkProvisioner: Send + Sync {
    /// Ensure the declared sink exists; returns the sink name to route to.
    async fn ensure_sink(&self, decl: &CombinedSinkDecl) -> Result<String>;
    /// Unload every sink this process created.
    async fn teardown(&self);
}

/// PulseAudio implementation shelling out to `pactl`.
pub struct PulseSinkProvisioner;

impl PulseSinkProvisioner {
    pub fn new() -> Self {
        Self
    }

    async fn pactl(args: &[&str]) -> Result<String> {
        let output = Command::new("pactl")
            .args(args)
            .output()
            .await
            .with_context(|| format!("pactl {:?} failed to run", args))?;
        if !output.status.success() {
            return Err(anyhow!(
                "pactl {:?} exited with {}: {}",
                args,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for PulseSinkProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SinkProvisioner for PulseSinkProvisioner {
    async fn ensure_sink(&self, decl: &CombinedSinkDecl) -> Result<String> {
        let mut registry = registry().lock().await;
        if registry.contains_key(&decl.name) {
            debug!("combined sink {} already provisioned", decl.name);
            return Ok(decl.name.clone());
        }

        let existing = Self::pactl(&["list", "short", "sinks"]).await?;
        if sink_names(&existing).iter().any(|name| name == &decl.name) {
            info!("combined sink {} already exists, reusing", decl.name);
            registry.insert(decl.name.clone(), None);
            return Ok(decl.name.clone());
        }

        let sink_name_arg = format!("sink_name={}", decl.name);
        let slaves_arg = format!("slaves={}", decl.slaves.join(","));
        let mut args = vec![
            "load-module",
            "module-combine-sink",
            sink_name_arg.as_str(),
            slaves_arg.as_str(),
        ];
        let props_arg;
        if let Some(description) = &decl.description {
            props_arg = format!(
                "sink_properties=device.description=\"{}\"",
                description.replace(' ', "\\ ")
            );
            args.push(props_arg.as_str());
        }

        let stdout = Self::pactl(&args).await?;
        let module_id = parse_module_id(&stdout)
            .ok_or_else(|| anyhow!("pactl returned no module id: '{}'", stdout.trim()))?;

        info!(
            "combined sink {} created (module {}, slaves: {})",
            decl.name,
            module_id,
            decl.slaves.join(", ")
        );
        registry.insert(decl.name.clone(), Some(module_id));
        Ok(decl.name.clone())
    }

    async fn teardown(&self) {
        let mut registry = registry().lock().await;
        for (name, module_id) in registry.drain() {
            let Some(module_id) = module_id else {
                debug!("combined sink {} was pre-existing, leaving in place", name);
                continue;
            };
            let id = module_id.to_string();
            match Self::pactl(&["unload-module", &id]).await {
                Ok(_) => info!("combined sink {} unloaded (module {})", name, module_id),
                Err(e) => warn!("failed to unload combined sink {}: {}", name, e),
            }
        }
    }
}

/// Audio device string players use to reach a combined sink.
pub fn sink_device(sink_name: &str) -> String {
    format!("pulse/{}", sink_name)
}

/// Sink names from `pactl list short sinks` output (index\tname\t...).
fn sink_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split('\t').nth(1))
        .map(String::from)
        .collect()
}

/// `pactl load-module` prints the module id on success.
fn parse_module_id(output: &str) -> Option<u32> {
    output.trim().parse::<u32>().ok()
}
