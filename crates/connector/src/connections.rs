//! Connection side table and connection procedure
//!
//! Every device of the map gets a control channel to the instrument and a control channel
//! to the bulk-transfer service that serves it. Links are kept in a side table keyed by
//! device name; the device specs themselves are never mutated.

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{
    ChannelKind, ContractError, DeviceSpec, Devices, TimestampsConfig, Transport, DLT_PORT,
    SCPI_PORT,
};
use tokio::process::Child;
use tracing::{info, instrument};

use crate::datalink::DataLinkClient;
use crate::probe::{is_local, probe, PROBE_TIMEOUT};
use crate::scpi::ScpiClient;
use crate::service::ServiceLauncher;
use crate::zmq_transport::ZmqTransport;

/// Live channels of one device
pub struct DeviceLink<T> {
    pub scpi: ScpiClient<T>,
    pub dlt: DataLinkClient<T>,
}

impl<T: Transport> DeviceLink<T> {
    pub fn new(scpi: ScpiClient<T>, dlt: DataLinkClient<T>) -> Self {
        Self { scpi, dlt }
    }
}

/// Device name -> live channels
pub struct Connections<T> {
    links: BTreeMap<String, DeviceLink<T>>,
    services: Vec<Child>,
}

impl<T> Default for Connections<T> {
    fn default() -> Self {
        Self {
            links: BTreeMap::new(),
            services: Vec::new(),
        }
    }
}

impl<T: Transport> Connections<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device: impl Into<String>, link: DeviceLink<T>) {
        self.links.insert(device.into(), link);
    }

    pub fn get_mut(&mut self, device: &str) -> Result<&mut DeviceLink<T>, ContractError> {
        self.links
            .get_mut(device)
            .ok_or_else(|| ContractError::acquisition(format!("device '{device}' is not connected")))
    }

    pub fn contains(&self, device: &str) -> bool {
        self.links.contains_key(device)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut DeviceLink<T>)> {
        self.links.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.links.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Locally started bulk-transfer services
    pub fn services(&self) -> &[Child] {
        &self.services
    }
}

/// Host of the bulk-transfer service serving a device
pub fn dlt_host(spec: &DeviceSpec) -> String {
    spec.timestamps
        .as_ref()
        .map(|t| t.dlt_host.clone())
        .unwrap_or_else(|| TimestampsConfig::default().dlt_host)
}

/// Connection procedure: probe, provision, attach
#[derive(Debug, Clone)]
pub struct Connector {
    service: Option<ServiceLauncher>,
    probe_timeout: Duration,
    scpi_port: u16,
    dlt_port: u16,
}

impl Default for Connector {
    fn default() -> Self {
        Self {
            service: None,
            probe_timeout: PROBE_TIMEOUT,
            scpi_port: SCPI_PORT,
            dlt_port: DLT_PORT,
        }
    }
}

impl Connector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow starting the bulk-transfer service locally
    pub fn with_service(mut self, launcher: ServiceLauncher) -> Self {
        self.service = Some(launcher);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_ports(mut self, scpi_port: u16, dlt_port: u16) -> Self {
        self.scpi_port = scpi_port;
        self.dlt_port = dlt_port;
        self
    }

    /// Connect every device of the map
    ///
    /// # Errors
    /// Connection error naming the first device and channel that cannot be reached
    #[instrument(name = "connect_all", skip(self, devices), fields(devices = devices.len()))]
    pub async fn connect_all(
        &self,
        devices: &Devices,
    ) -> Result<Connections<ZmqTransport>, ContractError> {
        let mut connections = Connections::new();
        for (name, spec) in devices {
            let (dlt, service) = self.connect_dlt(name, spec).await?;
            connections.services.extend(service);
            let scpi = self.connect_scpi(name, spec).await?;
            connections.insert(name.clone(), DeviceLink::new(scpi, dlt));
            info!(device = %name, ip = %spec.ip, "device connected");
        }
        Ok(connections)
    }

    async fn connect_dlt(
        &self,
        name: &str,
        spec: &DeviceSpec,
    ) -> Result<(DataLinkClient<ZmqTransport>, Option<Child>), ContractError> {
        let host = dlt_host(spec);
        let fail = |message: String| ContractError::Connection {
            device: name.to_string(),
            channel: ChannelKind::DataLink,
            address: host.clone(),
            port: self.dlt_port,
            message,
        };

        let mut service = None;
        if !probe(&host, self.dlt_port, self.probe_timeout).await {
            if !is_local(&host) {
                return Err(fail("remote bulk-transfer service unreachable".to_string()));
            }
            let launcher = self.service.as_ref().ok_or_else(|| {
                fail("service unreachable and no service directory configured".to_string())
            })?;
            service = Some(launcher.launch(name, &host, self.dlt_port).await?);
        }

        let transport = ZmqTransport::connect(ChannelKind::DataLink, &host, self.dlt_port)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok((DataLinkClient::new(transport, spec.ip.clone()), service))
    }

    async fn connect_scpi(
        &self,
        name: &str,
        spec: &DeviceSpec,
    ) -> Result<ScpiClient<ZmqTransport>, ContractError> {
        let fail = |message: String| ContractError::Connection {
            device: name.to_string(),
            channel: ChannelKind::Scpi,
            address: spec.ip.clone(),
            port: self.scpi_port,
            message,
        };
        if !probe(&spec.ip, self.scpi_port, self.probe_timeout).await {
            return Err(fail("device unreachable".to_string()));
        }
        let transport = ZmqTransport::connect(ChannelKind::Scpi, &spec.ip, self.scpi_port)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(ScpiClient::new(transport, spec.ip.clone()))
    }
}
