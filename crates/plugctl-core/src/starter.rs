//! Startup Service Starter: gives newly registered components running
//! instances on the auto-configured nodes.

use crate::config::StartupConfig;
use crate::error::Result;
use crate::manager::ComponentManager;
use crate::record::ComponentRecord;
use std::collections::BTreeSet;

/// Always started alongside new components.
pub const MARKUP_SERVICE: &str = "Markup";

impl ComponentManager {
    /// Raise the instance count of each new component's service (and the
    /// markup service) to the configured value and place it on every
    /// auto-configured node. Counts are never lowered.
    pub fn start_services(&self, registered: &[ComponentRecord], startup: &StartupConfig) -> Result<()> {
        let _guard = self.guard()?;
        let count = startup.num_services_per_component;
        if !startup.auto_start_services || count <= 0 {
            tracing::info!("automatic service start is disabled");
            return Ok(());
        }

        let mut models = self.nodes.service_models()?;
        if models.is_empty() {
            tracing::warn!("no service models are configured; not starting services");
            return Ok(());
        }

        let names: BTreeSet<&str> = registered
            .iter()
            .filter_map(|r| r.service_name.as_deref())
            .chain([MARKUP_SERVICE])
            .collect();

        let mut started = Vec::new();
        for name in names {
            match models.get_mut(name) {
                Some(model) => {
                    model.service_count = model.service_count.max(count);
                    started.push(model.clone());
                }
                None => tracing::debug!(service = %name, "no service model; skipping"),
            }
        }
        if started.is_empty() {
            return Ok(());
        }

        let mut nodes = self.nodes.node_models()?;
        for node in nodes.iter_mut().filter(|n| n.auto_configured) {
            for service in &started {
                match node.service_mut(&service.name) {
                    Some(existing) => existing.service_count = existing.service_count.max(count),
                    None => {
                        let mut copy = service.clone();
                        copy.service_count = count;
                        node.services.push(copy);
                    }
                }
            }
        }

        self.nodes.set_service_models(models)?;
        self.nodes.save_and_reload_node_config(nodes)?;
        tracing::info!(services = started.len(), count, "started services on auto-configured nodes");
        Ok(())
    }
}
