use serde_derive::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::address::AddressRange;
use crate::config::Config;
use crate::document::{ConfigDocument, Reservation};
use crate::error::{Error, Result};
use crate::leases::{self, LeaseLog, LeaseSource, LeaseView};
use crate::reservations::{self, ReservationEngine};
use crate::store::{CsvLeaseFile, KeaConfigFile, ServiceMonitor, ServiceStatus, ServiceControl};
use crate::transaction::{ConfigReader, ConfigTransaction, ConfigWriter};

/// Read-only summary of the address plan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Statistics {
    pub gateway: String,
    pub reservations: usize,
    pub reserved_capacity: u64,
    pub reserved_range: AddressRange,
    pub leases: usize,
    pub pool_range: Option<AddressRange>,
    pub pool_capacity: u64,
}

impl Statistics {
    pub fn derive(
        doc: &ConfigDocument,
        lease_count: usize,
        reserved: AddressRange,
        gateway_fallback: &str,
    ) -> Statistics {
        let subnet = doc.first_subnet();
        let gateway = subnet
            .option("routers")
            .and_then(|routers| routers.split(',').map(str::trim).find(|r| !r.is_empty()))
            .unwrap_or(gateway_fallback)
            .to_string();
        let pool_range = subnet.pool_range();
        Statistics {
            gateway,
            reservations: reservations::list_reservations(doc).len(),
            reserved_capacity: reserved.capacity(),
            reserved_range: reserved,
            leases: lease_count,
            pool_range,
            pool_capacity: pool_range.map_or(0, |p| p.capacity()),
        }
    }
}

/// Operations offered to the presentation layer.
pub trait AbstractManager: Send + Sync {
    fn service_status(&self) -> ServiceStatus;
    fn leases(&self) -> Result<Vec<LeaseView>>;
    fn reservations(&self) -> Result<Vec<Reservation>>;
    fn add_reservation(
        &self,
        hw_address: &str,
        ip_address: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Reservation>;
    fn update_reservation(&self, identifier: &str, ip_address: &str) -> Result<Reservation>;
    /// `Ok(false)` when nothing matched `identifier`.
    fn remove_reservation(&self, identifier: &str) -> Result<bool>;
    fn config(&self) -> Result<Value>;
    fn replace_config(&self, config: Value) -> Result<Value>;
    fn validate_config(&self) -> bool;
    fn statistics(&self) -> Result<Statistics>;
}

pub struct Manager {
    engine: ReservationEngine,
    transaction: ConfigTransaction,
    lease_source: Arc<dyn LeaseSource>,
    monitor: Arc<dyn ServiceMonitor>,
    gateway_fallback: String,
    logger: slog::Logger,
}

impl Manager {
    /// Manager backed by the files and commands named in `config`.
    pub fn create(config: &Config, logger: slog::Logger) -> Manager {
        let file = Arc::new(KeaConfigFile::create(config, logger.clone()));
        Manager::new(
            config,
            file.clone(),
            file,
            Arc::new(CsvLeaseFile::create(config)),
            Arc::new(ServiceControl::create(config)),
            logger,
        )
    }

    pub fn new(
        config: &Config,
        reader: Arc<dyn ConfigReader>,
        writer: Arc<dyn ConfigWriter>,
        lease_source: Arc<dyn LeaseSource>,
        monitor: Arc<dyn ServiceMonitor>,
        logger: slog::Logger,
    ) -> Manager {
        let mgr_logger = logger.new(o!("module" => "manager"));
        Manager {
            engine: ReservationEngine::new(config.reserved_range),
            transaction: ConfigTransaction::new(reader, writer, logger),
            lease_source,
            monitor,
            gateway_fallback: config.gateway_fallback.to_string(),
            logger: mgr_logger,
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

impl AbstractManager for Manager {
    fn service_status(&self) -> ServiceStatus {
        self.monitor.status()
    }

    fn leases(&self) -> Result<Vec<LeaseView>> {
        let raw = match self.lease_source.read_raw()? {
            Some(raw) => raw,
            None => return Ok(Vec::new()),
        };
        let log = LeaseLog::parse(&raw);
        if log.skipped > 0 {
            debug!(self.logger, "Skipped malformed lease rows"; "count" => log.skipped);
        }
        Ok(leases::reconcile(log.records, Manager::now()))
    }

    fn reservations(&self) -> Result<Vec<Reservation>> {
        Ok(reservations::list_reservations(&self.transaction.current()?))
    }

    fn add_reservation(
        &self,
        hw_address: &str,
        ip_address: Option<&str>,
        hostname: Option<&str>,
    ) -> Result<Reservation> {
        let (reservation, _) = self
            .transaction
            .apply_mutation(|doc| self.engine.add(doc, hw_address, ip_address, hostname))?;
        info!(self.logger, "Added reservation";
              "hw-address" => &reservation.hw_address, "ip-address" => &reservation.ip_address);
        Ok(reservation)
    }

    fn update_reservation(&self, identifier: &str, ip_address: &str) -> Result<Reservation> {
        let (reservation, _) = self.transaction.apply_mutation(|doc| {
            self.engine.update_address(doc, identifier, ip_address)
        })?;
        info!(self.logger, "Updated reservation";
              "hw-address" => &reservation.hw_address, "ip-address" => &reservation.ip_address);
        Ok(reservation)
    }

    fn remove_reservation(&self, identifier: &str) -> Result<bool> {
        let res = self.transaction.apply_mutation(|doc| {
            if reservations::remove_reservation(doc, identifier) {
                Ok(())
            } else {
                Err(Error::NotFound(identifier.to_string()))
            }
        });
        match res {
            Ok(_) => {
                info!(self.logger, "Removed reservation"; "identifier" => identifier);
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn config(&self) -> Result<Value> {
        self.transaction.current()?.to_value()
    }

    fn replace_config(&self, config: Value) -> Result<Value> {
        let doc = ConfigDocument::from_value(config)?;
        let stored = self.transaction.replace(&doc)?;
        info!(self.logger, "Replaced configuration");
        stored.to_value()
    }

    fn validate_config(&self) -> bool {
        self.transaction.validate_stored()
    }

    fn statistics(&self) -> Result<Statistics> {
        let doc = self.transaction.current()?;
        let leases = self.leases()?;
        Ok(Statistics::derive(
            &doc,
            leases.len(),
            self.engine.reserved_range(),
            &self.gateway_fallback,
        ))
    }
}
