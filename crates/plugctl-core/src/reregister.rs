//! Re-registration Orchestrator: replaces a registered component with the
//! current contents of its package while keeping the operator's service
//! scale-out.

use crate::error::Result;
use crate::manager::ComponentManager;
use crate::record::ComponentRecord;

/// Instance counts of one service before re-registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PlacementSnapshot {
    service_count: i32,
    hosts: Vec<(String, i32)>,
}

impl ComponentManager {
    /// Unregister (keeping the package) and register again. A package with
    /// no record is simply registered.
    pub fn reregister_component(&self, package_file_name: &str) -> Result<ComponentRecord> {
        let _guard = self.guard()?;
        self.require_managed_support()?;

        let Some(existing) = self.records.by_package(package_file_name) else {
            return self.register_locked(package_file_name);
        };

        let snapshot = match &existing.service_name {
            Some(service) => Some(self.placement_snapshot(service)?),
            None => None,
        };
        tracing::info!(package = %package_file_name, ?snapshot, "re-registering component");

        self.unregister_retain_locked(package_file_name)?;
        let record = self.register_locked(package_file_name)?;

        if let (Some(service), Some(snapshot)) = (&record.service_name, &snapshot) {
            self.restore_placement(service, snapshot)?;
        }
        Ok(record)
    }

    fn placement_snapshot(&self, service: &str) -> Result<PlacementSnapshot> {
        let service_count = self
            .nodes
            .service_models()?
            .get(service)
            .map(|s| s.service_count)
            .unwrap_or(0);
        let hosts = self
            .nodes
            .node_models()?
            .into_iter()
            .filter_map(|node| {
                let count = node.services.iter().find(|s| s.name == service)?.service_count;
                (count > 0).then_some((node.host, count))
            })
            .collect();
        Ok(PlacementSnapshot {
            service_count,
            hosts,
        })
    }

    fn restore_placement(&self, service: &str, snapshot: &PlacementSnapshot) -> Result<()> {
        let mut models = self.nodes.service_models()?;
        let Some(current) = models.get_mut(service) else {
            return Ok(());
        };
        if snapshot.service_count >= 1 {
            current.service_count = current.service_count.max(snapshot.service_count);
        }
        let template = current.clone();
        self.nodes.set_service_models(models)?;

        if snapshot.hosts.is_empty() {
            return Ok(());
        }
        let mut nodes = self.nodes.node_models()?;
        for (host, count) in &snapshot.hosts {
            match nodes.iter_mut().find(|n| &n.host == host) {
                Some(node) => {
                    let mut copy = template.clone();
                    copy.service_count = *count;
                    node.put_service(copy);
                }
                None => tracing::warn!(host = %host, service = %service, "host no longer configured; not restoring placement"),
            }
        }
        self.nodes.save_and_reload_node_config(nodes)
    }
}
