use tracing::{error, info};

/// A managed subsystem with an ordered lifecycle.
pub trait Service: Send {
    fn name(&self) -> &str;
    fn start(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self);
}

/// Ordered start/stop of services. Registration is append-only; start
/// failures roll back already-started services in reverse, and shutdown
/// always runs in reverse start order.
pub struct ServiceManager {
    services: Vec<Box<dyn Service>>,
    started: usize,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self { services: Vec::new(), started: 0 }
    }

    pub fn add(&mut self, service: Box<dyn Service>) {
        self.services.push(service);
    }

    pub fn start_all(&mut self) -> anyhow::Result<()> {
        for i in 0..self.services.len() {
            info!(name = self.services[i].name(), "starting service");
            if let Err(e) = self.services[i].start() {
                let failed = self.services[i].name().to_string();
                for j in (0..i).rev() {
                    info!(name = self.services[j].name(), "stopping service during rollback");
                    self.services[j].stop();
                }
                self.started = 0;
                return Err(anyhow::anyhow!("start {}: {}", failed, e));
            }
            self.started = i + 1;
        }
        Ok(())
    }

    pub fn stop_all(&mut self) {
        for i in (0..self.started).rev() {
            info!(name = self.services[i].name(), "stopping service");
            self.services[i].stop();
        }
        self.started = 0;
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        if self.started > 0 {
            error!("service manager dropped with running services");
            self.stop_all();
        }
    }
}
