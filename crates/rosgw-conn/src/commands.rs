//! One-shot command path
//!
//! Each operation maps a structured request to device commands, runs them
//! under the session command lock and maps the reply back. Multi-step
//! operations hold the lock for the whole sequence.

use rosgw_core::{
    Address, Command, DeviceId, GatewayError, GatewayResult, Interface, Queue, TelemetrySample,
};
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;

const INTERFACE_PROPS: &[&str] = &[
    ".id",
    "name",
    "type",
    "running",
    "disabled",
    "rx-bytes",
    "tx-bytes",
    "rx-packets",
    "tx-packets",
];

const ADDRESS_PROPS: &[&str] = &[".id", "address", "interface", "network", "disabled"];

const QUEUE_PROPS: &[&str] = &[".id", "name", "target", "max-limit", "burst-limit", "disabled"];

/// Command that samples or streams traffic counters for one interface
pub fn monitor_traffic_command(interface: &str) -> Command {
    Command::new("/interface/monitor-traffic").attr("interface", interface)
}

fn require(value: &str, name: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidRequest(format!("{} is required", name)));
    }
    Ok(())
}

impl ConnectionManager {
    // =========================================================================
    // Interfaces
    // =========================================================================

    pub async fn list_interfaces(&self, device_id: DeviceId) -> GatewayResult<Vec<Interface>> {
        let reply = self
            .run_command(
                device_id,
                &Command::new("/interface/print").proplist(INTERFACE_PROPS),
            )
            .await?;
        Ok(reply.records().map(Interface::from_attrs).collect())
    }

    /// Interfaces that are running and not disabled
    pub async fn list_monitorable_interfaces(
        &self,
        device_id: DeviceId,
    ) -> GatewayResult<Vec<Interface>> {
        let interfaces = self.list_interfaces(device_id).await?;
        Ok(interfaces
            .into_iter()
            .filter(Interface::is_monitorable)
            .collect())
    }

    pub async fn enable_interface(&self, device_id: DeviceId, name: &str) -> GatewayResult<()> {
        self.set_interface_disabled(device_id, name, false).await
    }

    pub async fn disable_interface(&self, device_id: DeviceId, name: &str) -> GatewayResult<()> {
        self.set_interface_disabled(device_id, name, true).await
    }

    async fn set_interface_disabled(
        &self,
        device_id: DeviceId,
        name: &str,
        disabled: bool,
    ) -> GatewayResult<()> {
        require(name, "name")?;
        let session = self.get_or_connect(device_id).await?;
        let commands = session.lock().await;

        let reply = commands
            .run(&Command::new("/interface/print").query("name", name))
            .await?;
        let id = reply
            .records()
            .next()
            .and_then(|r| r.get(".id").cloned())
            .ok_or_else(|| GatewayError::Device(format!("interface {} not found", name)))?;

        commands
            .run(
                &Command::new("/interface/set")
                    .attr(".id", &id)
                    .attr("disabled", if disabled { "true" } else { "false" }),
            )
            .await?;

        info!(device_id, interface = %name, disabled, "Interface updated");
        Ok(())
    }

    // =========================================================================
    // Addresses
    // =========================================================================

    pub async fn list_addresses(&self, device_id: DeviceId) -> GatewayResult<Vec<Address>> {
        let reply = self
            .run_command(
                device_id,
                &Command::new("/ip/address/print").proplist(ADDRESS_PROPS),
            )
            .await?;
        Ok(reply.records().map(Address::from_attrs).collect())
    }

    pub async fn add_address(
        &self,
        device_id: DeviceId,
        interface: &str,
        address: &str,
    ) -> GatewayResult<()> {
        require(interface, "interface")?;
        require(address, "address")?;
        self.run_command(
            device_id,
            &Command::new("/ip/address/add")
                .attr("address", address)
                .attr("interface", interface),
        )
        .await?;
        info!(device_id, %interface, %address, "Address added");
        Ok(())
    }

    pub async fn remove_address(&self, device_id: DeviceId, id: &str) -> GatewayResult<()> {
        require(id, "id")?;
        self.run_command(device_id, &Command::new("/ip/address/remove").attr(".id", id))
            .await?;
        info!(device_id, %id, "Address removed");
        Ok(())
    }

    // =========================================================================
    // Simple queues
    // =========================================================================

    pub async fn list_queues(&self, device_id: DeviceId) -> GatewayResult<Vec<Queue>> {
        let reply = self
            .run_command(
                device_id,
                &Command::new("/queue/simple/print").proplist(QUEUE_PROPS),
            )
            .await?;
        Ok(reply.records().map(Queue::from_attrs).collect())
    }

    pub async fn add_queue(
        &self,
        device_id: DeviceId,
        name: &str,
        target: &str,
        max_limit: &str,
    ) -> GatewayResult<()> {
        require(name, "name")?;
        require(target, "target")?;
        require(max_limit, "max-limit")?;
        self.run_command(
            device_id,
            &Command::new("/queue/simple/add")
                .attr("name", name)
                .attr("target", target)
                .attr("max-limit", max_limit),
        )
        .await?;
        info!(device_id, %name, %target, %max_limit, "Queue added");
        Ok(())
    }

    pub async fn remove_queue(&self, device_id: DeviceId, id: &str) -> GatewayResult<()> {
        require(id, "id")?;
        self.run_command(device_id, &Command::new("/queue/simple/remove").attr(".id", id))
            .await?;
        info!(device_id, %id, "Queue removed");
        Ok(())
    }

    // =========================================================================
    // Traffic
    // =========================================================================

    /// Take a single traffic sample through the command path
    pub async fn traffic_once(
        &self,
        device_id: DeviceId,
        interface: &str,
    ) -> GatewayResult<TelemetrySample> {
        require(interface, "interface")?;
        let session = self.get_or_connect(device_id).await?;
        let commands = session.lock().await;

        let reply = commands
            .run(&monitor_traffic_command(interface).attr("once", ""))
            .await?;

        if let Some(record) = reply.records().next() {
            return Ok(TelemetrySample::from_attrs(device_id, interface, record));
        }

        warn!(device_id, %interface, "No traffic data returned");
        match commands
            .run(&Command::new("/interface/print").proplist(&["name"]))
            .await
        {
            Ok(names) => {
                let available: Vec<_> = names
                    .records()
                    .filter_map(|r| r.get("name").cloned())
                    .collect();
                debug!(device_id, ?available, "Available interfaces");
            }
            Err(e) => debug!(device_id, error = %e, "Could not list interfaces"),
        }

        Err(GatewayError::Device(format!(
            "interface {} not found or no data",
            interface
        )))
    }
}
