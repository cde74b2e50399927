//! Port allocator with bind verification

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;

use super::types::{AllocationStatus, PortAllocation, PortStats};
use crate::{Error, Result};

/// Inclusive range of ports managed by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    /// Create a range, rejecting inverted bounds and port 0
    ///
    /// # Errors
    ///
    /// Returns error if `start > end` or `start == 0`
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::Config(format!("invalid port range {start}-{end}")));
        }
        Ok(Self { start, end })
    }

    /// First port of the range
    #[must_use]
    pub const fn start(&self) -> u16 {
        self.start
    }

    /// Last port of the range, inclusive
    #[must_use]
    pub const fn end(&self) -> u16 {
        self.end
    }

    /// Whether the port lies within the range
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    /// Number of ports in the range
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Always false for a validated range
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Ports in ascending order
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// Checks whether an address can currently be bound
pub trait BindProbe: Send + Sync {
    fn is_bindable(&self, addr: SocketAddr) -> bool;
}

/// Probe that binds and immediately drops a TCP listener
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBindProbe;

impl BindProbe for TcpBindProbe {
    fn is_bindable(&self, addr: SocketAddr) -> bool {
        std::net::TcpListener::bind(addr).is_ok()
    }
}

#[derive(Debug, Default)]
struct AllocatorState {
    /// Latest record per port
    records: HashMap<u16, PortAllocation>,
    /// Last port each plugin held, preferred on its next request
    last_port: HashMap<String, u16>,
}

impl AllocatorState {
    fn is_claimed(&self, port: u16) -> bool {
        self.records.get(&port).is_some_and(|r| r.status.is_live())
    }

    fn live_ports(&self, plugin_id: &str) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .records
            .values()
            .filter(|r| r.plugin_id == plugin_id && r.status.is_live())
            .map(|r| r.port)
            .collect();
        ports.sort_unstable();
        ports
    }

    fn claim(&mut self, plugin_id: &str, addr: SocketAddr, status: AllocationStatus) {
        let now = Utc::now();
        self.records.insert(
            addr.port(),
            PortAllocation {
                port: addr.port(),
                plugin_id: plugin_id.to_string(),
                address: addr,
                allocated_at: now,
                updated_at: now,
                status,
            },
        );
        self.last_port.insert(plugin_id.to_string(), addr.port());
    }

    fn set_status(&mut self, port: u16, status: AllocationStatus) -> bool {
        match self.records.get_mut(&port) {
            Some(record) if record.status.is_live() => {
                record.status = status;
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

/// Grants, reserves and releases ports within a bounded range
///
/// Every mutating operation, including the bind probe, runs under a single
/// exclusive lock so two callers can never be granted the same port.
pub struct PortAllocator {
    range: PortRange,
    host: IpAddr,
    retention: Duration,
    probe: Box<dyn BindProbe>,
    state: Mutex<AllocatorState>,
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("range", &self.range)
            .field("host", &self.host)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl PortAllocator {
    /// Create an allocator probing with real TCP binds on loopback
    #[must_use]
    pub fn new(range: PortRange) -> Self {
        Self::with_probe(range, Box::new(TcpBindProbe))
    }

    /// Create an allocator with a custom bind probe
    #[must_use]
    pub fn with_probe(range: PortRange, probe: Box<dyn BindProbe>) -> Self {
        Self {
            range,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            retention: Duration::from_secs(3600),
            probe,
            state: Mutex::new(AllocatorState::default()),
        }
    }

    /// Set the host that allocated ports are bound on
    #[must_use]
    pub const fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Set how long released records are kept before cleanup
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Managed range
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Host ports are bound on
    #[must_use]
    pub const fn host(&self) -> IpAddr {
        self.host
    }

    fn addr(&self, port: u16) -> SocketAddr {
        SocketAddr::new(self.host, port)
    }

    fn exhausted(&self, plugin_id: &str) -> Error {
        Error::PortExhausted {
            plugin_id: plugin_id.to_string(),
            start: self.range.start,
            end: self.range.end,
        }
    }

    /// First unclaimed, bindable port in ascending order, skipping `exclude`
    fn scan(&self, state: &AllocatorState, exclude: &[u16]) -> Option<u16> {
        self.range.iter().find(|&port| {
            if state.is_claimed(port) || exclude.contains(&port) {
                return false;
            }
            let bindable = self.probe.is_bindable(self.addr(port));
            if !bindable {
                tracing::debug!(port, "port not bindable, skipping");
            }
            bindable
        })
    }

    /// Find and allocate a port for a plugin
    ///
    /// Returns the plugin's current port if it already holds one, then its
    /// previous port if still free, then the first free port in the range.
    ///
    /// # Errors
    ///
    /// Returns `PortExhausted` if no port in the range can be allocated
    pub fn find_available_port(&self, plugin_id: &str) -> Result<u16> {
        let mut state = self.state.lock();

        if let Some(&port) = state.live_ports(plugin_id).first() {
            return Ok(port);
        }

        let preferred = state.last_port.get(plugin_id).copied().filter(|&port| {
            self.range.contains(port)
                && !state.is_claimed(port)
                && self.probe.is_bindable(self.addr(port))
        });

        let port = preferred
            .or_else(|| self.scan(&state, &[]))
            .ok_or_else(|| self.exhausted(plugin_id))?;

        state.claim(plugin_id, self.addr(port), AllocationStatus::Allocated);
        tracing::debug!(plugin_id, port, "port allocated");
        Ok(port)
    }

    /// Reserve a specific port for a plugin
    ///
    /// # Errors
    ///
    /// Returns error if the port is outside the range, held by another
    /// plugin, or cannot be bound
    pub fn reserve_port(&self, plugin_id: &str, port: u16) -> Result<()> {
        if !self.range.contains(port) {
            return Err(Error::PortOutOfRange {
                port,
                start: self.range.start,
                end: self.range.end,
            });
        }

        let mut state = self.state.lock();

        if let Some(record) = state.records.get(&port).filter(|r| r.status.is_live()) {
            if record.plugin_id == plugin_id {
                return Ok(());
            }
            return Err(Error::PortUnavailable {
                port,
                reason: format!("held by '{}'", record.plugin_id),
            });
        }

        if !self.probe.is_bindable(self.addr(port)) {
            return Err(Error::PortUnavailable {
                port,
                reason: "address in use".to_string(),
            });
        }

        state.claim(plugin_id, self.addr(port), AllocationStatus::Reserved);
        tracing::debug!(plugin_id, port, "port reserved");
        Ok(())
    }

    /// Move a plugin to a different free port, releasing the old one
    ///
    /// The old allocation is left untouched if no other port is free.
    ///
    /// # Errors
    ///
    /// Returns `PortExhausted` if no other port can be allocated
    pub fn reallocate(&self, plugin_id: &str) -> Result<u16> {
        let mut state = self.state.lock();
        let old = state.live_ports(plugin_id);

        let port = self
            .scan(&state, &old)
            .ok_or_else(|| self.exhausted(plugin_id))?;

        state.claim(plugin_id, self.addr(port), AllocationStatus::Allocated);
        for old_port in &old {
            state.set_status(*old_port, AllocationStatus::Released);
        }

        tracing::info!(plugin_id, ?old, port, "port reallocated");
        Ok(port)
    }

    /// Release a port; releasing a free port is a no-op
    ///
    /// Returns whether a live allocation was released
    pub fn release_port(&self, port: u16) -> bool {
        let released = self.state.lock().set_status(port, AllocationStatus::Released);
        if released {
            tracing::debug!(port, "port released");
        }
        released
    }

    /// Release a port whose server failed to start
    ///
    /// The port becomes available immediately; the record keeps the
    /// `Error` status until cleanup.
    pub fn release_failed(&self, port: u16) -> bool {
        self.state.lock().set_status(port, AllocationStatus::Error)
    }

    /// Release every port held by a plugin
    ///
    /// Returns the number of ports released
    pub fn release_plugin_ports(&self, plugin_id: &str) -> usize {
        let mut state = self.state.lock();
        let ports = state.live_ports(plugin_id);
        for port in &ports {
            state.set_status(*port, AllocationStatus::Released);
        }
        if !ports.is_empty() {
            tracing::debug!(plugin_id, ?ports, "plugin ports released");
        }
        ports.len()
    }

    /// Drop non-live records older than the retention window
    ///
    /// Returns the number of records removed
    pub fn cleanup_expired_records(&self) -> usize {
        let retention = TimeDelta::from_std(self.retention).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let mut state = self.state.lock();

        let expired: Vec<(u16, String)> = state
            .records
            .values()
            .filter(|r| !r.status.is_live())
            .filter(|r| r.updated_at.checked_add_signed(retention).is_none_or(|t| t <= now))
            .map(|r| (r.port, r.plugin_id.clone()))
            .collect();

        for (port, plugin_id) in &expired {
            state.records.remove(port);
            if state.last_port.get(plugin_id) == Some(port) {
                state.last_port.remove(plugin_id);
            }
        }

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "purged expired port records");
        }
        expired.len()
    }

    /// Current live port for a plugin
    #[must_use]
    pub fn plugin_port(&self, plugin_id: &str) -> Option<u16> {
        self.state.lock().live_ports(plugin_id).first().copied()
    }

    /// Record for a port, live or not
    #[must_use]
    pub fn allocation(&self, port: u16) -> Option<PortAllocation> {
        self.state.lock().records.get(&port).cloned()
    }

    /// All retained records sorted by port
    #[must_use]
    pub fn allocations(&self) -> Vec<PortAllocation> {
        let mut records: Vec<PortAllocation> =
            self.state.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.port);
        records
    }

    /// Usage statistics for the range
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn get_stats(&self) -> PortStats {
        let state = self.state.lock();
        let count = |status: AllocationStatus| {
            state.records.values().filter(|r| r.status == status).count()
        };
        let allocated = count(AllocationStatus::Allocated);
        let reserved = count(AllocationStatus::Reserved);
        let total = self.range.len();
        let held = allocated + reserved;

        PortStats {
            total,
            allocated,
            reserved,
            available: total.saturating_sub(held),
            utilization: held as f64 / total as f64 * 100.0,
        }
    }
}
