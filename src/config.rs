//! Engine configuration: a validated, builder-constructed [`EngineConfig`]
//! covering every option in §6.3, plus server-side storage region wiring.

use crate::error::ModbusError;
use crate::types::QosPolicy;

/// Default resync ring buffer size, mirrored here so `config` doesn't need
/// to depend on the `rtu`-gated [`crate::framing::resync`] module.
const DEFAULT_RESYNC_BUFFER_SIZE: usize = 256;

/// Validated engine configuration (§6.3). Construct via [`EngineConfig::builder`];
/// there is no public constructor that skips validation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    pub txn_pool_size: usize,
    pub default_timeout_ms: u32,
    pub retry_backoff_ms: u32,
    pub max_retries: u8,
    pub qos_policy: QosPolicy,
    pub dup_filter_window_ms: u64,
    pub resync_buffer_size: usize,
    pub rtu_baud: u32,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`], mirroring the engine's layered-defaults
/// convention: every field has a sane default and `.build()` is the single
/// validation choke point.
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    txn_pool_size: usize,
    default_timeout_ms: u32,
    retry_backoff_ms: u32,
    max_retries: u8,
    qos_policy: QosPolicy,
    dup_filter_window_ms: u64,
    resync_buffer_size: usize,
    rtu_baud: u32,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            txn_pool_size: 4,
            default_timeout_ms: 1_000,
            retry_backoff_ms: 50,
            max_retries: 3,
            qos_policy: QosPolicy::FcBased,
            dup_filter_window_ms: 200,
            resync_buffer_size: DEFAULT_RESYNC_BUFFER_SIZE,
            rtu_baud: 19_200,
        }
    }
}

impl EngineConfigBuilder {
    pub fn txn_pool_size(mut self, size: usize) -> Self {
        self.txn_pool_size = size;
        self
    }

    pub fn default_timeout_ms(mut self, ms: u32) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u32) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn qos_policy(mut self, policy: QosPolicy) -> Self {
        self.qos_policy = policy;
        self
    }

    pub fn dup_filter_window_ms(mut self, ms: u64) -> Self {
        self.dup_filter_window_ms = ms;
        self
    }

    pub fn resync_buffer_size(mut self, size: usize) -> Self {
        self.resync_buffer_size = size;
        self
    }

    pub fn rtu_baud(mut self, baud: u32) -> Self {
        self.rtu_baud = baud;
        self
    }

    /// Validates and freezes the configuration.
    pub fn build(self) -> Result<EngineConfig, ModbusError> {
        if self.txn_pool_size == 0 {
            return Err(ModbusError::InvalidArgument);
        }
        if self.default_timeout_ms == 0 {
            return Err(ModbusError::InvalidArgument);
        }
        if self.rtu_baud == 0 {
            return Err(ModbusError::InvalidArgument);
        }
        Ok(EngineConfig {
            txn_pool_size: self.txn_pool_size,
            default_timeout_ms: self.default_timeout_ms,
            retry_backoff_ms: self.retry_backoff_ms,
            max_retries: self.max_retries,
            qos_policy: self.qos_policy,
            dup_filter_window_ms: self.dup_filter_window_ms,
            resync_buffer_size: self.resync_buffer_size,
            rtu_baud: self.rtu_baud,
        })
    }
}

/// A single contiguous address range backing one [`crate::types::DataClass`]
/// on the server side (§4.3.2 "storage region").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
    pub class: crate::types::DataClass,
    pub start_address: u16,
    pub len: u16,
    pub read_only: bool,
}

impl RegionConfig {
    pub fn new(class: crate::types::DataClass, start_address: u16, len: u16, read_only: bool) -> Self {
        Self {
            class,
            start_address,
            len,
            read_only,
        }
    }

    pub fn contains(&self, address: u16, quantity: u16) -> bool {
        let end = self.start_address as u32 + self.len as u32;
        let req_end = address as u32 + quantity as u32;
        address as u32 >= self.start_address as u32 && req_end <= end
    }
}

/// Fixed-capacity layout of up to `N` storage regions, one per unit role
/// (§4.3.2). Regions are matched by data class and address containment.
pub struct StorageLayout<const N: usize> {
    regions: heapless::Vec<RegionConfig, N>,
}

impl<const N: usize> StorageLayout<N> {
    pub fn new() -> Self {
        Self {
            regions: heapless::Vec::new(),
        }
    }

    /// Adds a region. Fails with [`ModbusError::NoResources`] if the layout
    /// is already at capacity.
    pub fn add_region(&mut self, region: RegionConfig) -> Result<(), ModbusError> {
        self.regions
            .push(region)
            .map_err(|_| ModbusError::NoResources)
    }

    /// Finds the region covering `[address, address+quantity)` for `class`,
    /// if any single region fully contains the request.
    pub fn find(&self, class: crate::types::DataClass, address: u16, quantity: u16) -> Option<&RegionConfig> {
        self.regions
            .iter()
            .find(|r| r.class == class && r.contains(address, quantity))
    }
}

impl<const N: usize> Default for StorageLayout<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataClass;

    #[test]
    fn builder_defaults_are_valid() {
        let cfg = EngineConfig::builder().build().unwrap();
        assert_eq!(cfg.txn_pool_size, 4);
        assert_eq!(cfg.max_retries, 3);
    }

    #[test]
    fn builder_rejects_zero_pool_size() {
        assert!(EngineConfig::builder().txn_pool_size(0).build().is_err());
    }

    #[test]
    fn region_containment() {
        let region = RegionConfig::new(DataClass::HoldingRegisters, 100, 10, false);
        assert!(region.contains(100, 10));
        assert!(region.contains(105, 5));
        assert!(!region.contains(105, 6));
        assert!(!region.contains(99, 1));
    }

    #[test]
    fn layout_finds_matching_region() {
        let mut layout: StorageLayout<4> = StorageLayout::new();
        layout
            .add_region(RegionConfig::new(DataClass::Coils, 0, 16, false))
            .unwrap();
        layout
            .add_region(RegionConfig::new(DataClass::HoldingRegisters, 0, 100, false))
            .unwrap();
        assert!(layout.find(DataClass::Coils, 0, 8).is_some());
        assert!(layout.find(DataClass::InputRegisters, 0, 8).is_none());
    }
}
