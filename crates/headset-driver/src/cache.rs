//! 能力数据缓存
//!
//! 缓存设备的描述性数据（功能列表、设备常量、最新固件信息），键为
//! `(DeviceId, SystemComponent, CapabilityKind)`。
//!
//! - 同一个键同时只有一个获取在进行（single-flight），并发调用方等待同一个结果
//! - 获取在独立线程上执行，调用方只在条件变量上等待，等待时间有上限
//! - 失败不缓存；有旧值时返回旧值，否则把错误返回给所有等待者
//! - `invalidate` 把设备的条目标记为过期；失效之前开始的获取不会写回结果
//! - `purge` 在 detach 时删除设备的所有条目，正在等待的调用方得到 [`FetchError::Purged`]
//!
//! 另有一个按产品（vendor / product / variant）索引的 [`DeviceCatalogue`]：
//! 同型号设备再次接入时直接用目录数据填充缓存，设备立即可用。

use crate::error::DriverError;
use crate::metrics::RegistryMetrics;
use headset_protocol::{
    ConstRoot, DeviceFeature, DeviceId, DeviceIdentity, FirmwareInfo, ProtocolError,
    SystemComponent,
};
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// 能力数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    Features,
    Constants,
    LatestFirmware,
}

/// 能力数据
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityValue {
    Features(Vec<DeviceFeature>),
    Constants(Arc<ConstRoot>),
    Firmware(FirmwareInfo),
}

impl CapabilityValue {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            CapabilityValue::Features(_) => CapabilityKind::Features,
            CapabilityValue::Constants(_) => CapabilityKind::Constants,
            CapabilityValue::Firmware(_) => CapabilityKind::LatestFirmware,
        }
    }

    pub fn into_features(self) -> Option<Vec<DeviceFeature>> {
        match self {
            CapabilityValue::Features(f) => Some(f),
            _ => None,
        }
    }

    pub fn into_constants(self) -> Option<Arc<ConstRoot>> {
        match self {
            CapabilityValue::Constants(c) => Some(c),
            _ => None,
        }
    }

    pub fn into_firmware(self) -> Option<FirmwareInfo> {
        match self {
            CapabilityValue::Firmware(f) => Some(f),
            _ => None,
        }
    }
}

/// 获取失败
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Network access blocked by configuration")]
    NetworkBlocked,
    #[error("No information: {0}")]
    NotFound(String),
    #[error("Invalid authorization")]
    Unauthorized,
    #[error("Fetch timeout")]
    Timeout,
    /// 设备在获取期间被移除
    #[error("Device removed during fetch")]
    Purged,
    #[error("Provider failure: {0}")]
    Provider(String),
}

impl FetchError {
    pub fn into_driver(self, device: DeviceId) -> DriverError {
        match self {
            FetchError::Network(msg) => DriverError::Network(msg),
            FetchError::NetworkBlocked => {
                DriverError::Network("network access blocked".to_string())
            },
            FetchError::NotFound(msg) | FetchError::Provider(msg) => DriverError::NoInformation(msg),
            FetchError::Unauthorized => DriverError::InvalidAuthorization,
            FetchError::Timeout => DriverError::Timeout,
            FetchError::Purged => DriverError::DeviceUnknown(device),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::NetworkBlocked | FetchError::Timeout)
    }
}

/// 能力数据来源（云端 / 本地数据包）
pub trait CapabilityProvider: Send + Sync {
    fn fetch(
        &self,
        identity: &DeviceIdentity,
        component: SystemComponent,
        kind: CapabilityKind,
    ) -> Result<CapabilityValue, FetchError>;

    /// 该类数据是否需要联网获取
    fn requires_network(&self, kind: CapabilityKind) -> bool {
        let _ = kind;
        true
    }
}

/// 缓存键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub device: DeviceId,
    pub component: SystemComponent,
    pub kind: CapabilityKind,
}

impl CacheKey {
    pub fn primary(device: DeviceId, kind: CapabilityKind) -> Self {
        Self {
            device,
            component: SystemComponent::PrimaryHeadset,
            kind,
        }
    }
}

type ProductKey = (u16, u16, Option<String>);
type CatalogueKey = (ProductKey, SystemComponent, CapabilityKind);

#[derive(Debug, Clone)]
struct CatalogueEntry {
    value: CapabilityValue,
    /// 预置数据没有获取时间，视为任意旧
    fetched_at: Option<Instant>,
}

/// 预置目录文件中的一个产品
#[derive(Debug, Deserialize)]
struct PreloadProduct {
    vendor_id: u16,
    product_id: u16,
    #[serde(default)]
    variant: Option<String>,
    #[serde(default)]
    features: Vec<u16>,
    #[serde(default)]
    constants: Option<serde_json::Value>,
}

/// 按产品索引的设备目录
#[derive(Debug, Default)]
pub struct DeviceCatalogue {
    entries: Mutex<HashMap<CatalogueKey, CatalogueEntry>>,
}

impl DeviceCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条目录数据；`fetched_at` 为 `None` 表示预置数据
    pub fn insert(
        &self,
        identity: &DeviceIdentity,
        component: SystemComponent,
        value: CapabilityValue,
        fetched_at: Option<Instant>,
    ) {
        let key = (identity.product_key(), component, value.kind());
        self.entries
            .lock()
            .insert(key, CatalogueEntry { value, fetched_at });
    }

    /// 该产品是否已知（目录中有主设备的功能列表）
    pub fn is_known(&self, identity: &DeviceIdentity) -> bool {
        let key = (
            identity.product_key(),
            SystemComponent::PrimaryHeadset,
            CapabilityKind::Features,
        );
        self.entries.lock().contains_key(&key)
    }

    /// 目录数据是否已经旧到需要刷新
    pub fn needs_refresh(&self, identity: &DeviceIdentity, minimum_age: Duration) -> bool {
        let product = identity.product_key();
        self.entries
            .lock()
            .iter()
            .filter(|((p, _, _), _)| *p == product)
            .any(|(_, entry)| match entry.fetched_at {
                None => true,
                Some(at) => at.elapsed() >= minimum_age,
            })
    }

    fn entries_for(&self, identity: &DeviceIdentity) -> Vec<(SystemComponent, CapabilityValue)> {
        let product = identity.product_key();
        self.entries
            .lock()
            .iter()
            .filter(|((p, _, _), _)| *p == product)
            .map(|((_, component, _), entry)| (*component, entry.value.clone()))
            .collect()
    }

    /// 目录中的所有产品（用于启动时刷新）
    pub fn products(&self) -> Vec<DeviceIdentity> {
        let mut products: Vec<ProductKey> = self
            .entries
            .lock()
            .keys()
            .map(|(product, _, _)| product.clone())
            .collect();
        products.sort();
        products.dedup();
        products
            .into_iter()
            .map(|(vendor_id, product_id, variant)| DeviceIdentity {
                variant,
                ..DeviceIdentity::new(vendor_id, product_id, "")
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// 导入预置目录（JSON 数组），返回导入的产品数
    ///
    /// ```json
    /// [{ "vendor_id": 2830, "product_id": 9400, "features": [1000, 1004],
    ///    "constants": { "max_volume": 12 } }]
    /// ```
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<usize, DriverError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ProtocolError::Io)?;
        self.load_str(&content)
    }

    pub fn load_str(&self, content: &str) -> Result<usize, DriverError> {
        let products: Vec<PreloadProduct> = serde_json::from_str(content)
            .map_err(|e| DriverError::Config(format!("invalid catalogue: {}", e)))?;
        let count = products.len();
        for product in products {
            let identity = DeviceIdentity {
                variant: product.variant,
                ..DeviceIdentity::new(product.vendor_id, product.product_id, "")
            };
            self.insert(
                &identity,
                SystemComponent::PrimaryHeadset,
                CapabilityValue::Features(DeviceFeature::from_codes(product.features)),
                None,
            );
            if let Some(constants) = product.constants {
                let root = ConstRoot::from_json(&constants)?;
                self.insert(
                    &identity,
                    SystemComponent::PrimaryHeadset,
                    CapabilityValue::Constants(Arc::new(root)),
                    None,
                );
            }
        }
        Ok(count)
    }
}

/// 后台刷新完成后的回调（在获取线程上调用）
pub type FetchCallback = Box<dyn FnOnce(Result<CapabilityValue, FetchError>) + Send>;

#[derive(Debug, Default)]
struct Slot {
    value: Option<CapabilityValue>,
    stale: bool,
    /// 每次 invalidate 加一
    generation: u64,
    in_flight: Option<u64>,
    /// 最近一次完成的获取（flight id + 结果）
    outcome: Option<(u64, Result<CapabilityValue, FetchError>)>,
}

/// 能力数据缓存
pub struct CapabilityCache {
    provider: Arc<dyn CapabilityProvider>,
    catalogue: DeviceCatalogue,
    block_network: bool,
    slots: Mutex<HashMap<CacheKey, Slot>>,
    changed: Condvar,
    flights: AtomicU64,
    metrics: Arc<RegistryMetrics>,
}

impl CapabilityCache {
    pub fn new(
        provider: Arc<dyn CapabilityProvider>,
        block_network: bool,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            provider,
            catalogue: DeviceCatalogue::new(),
            block_network,
            slots: Mutex::new(HashMap::new()),
            changed: Condvar::new(),
            flights: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn catalogue(&self) -> &DeviceCatalogue {
        &self.catalogue
    }

    /// 当前缓存值（可能已过期），不触发获取
    pub fn peek(&self, key: CacheKey) -> Option<CapabilityValue> {
        self.slots.lock().get(&key).and_then(|s| s.value.clone())
    }

    /// 用目录数据填充设备的缓存，返回填充的条目数
    pub fn seed_from_catalogue(&self, device: DeviceId, identity: &DeviceIdentity) -> usize {
        let entries = self.catalogue.entries_for(identity);
        let mut slots = self.slots.lock();
        for (component, value) in &entries {
            let key = CacheKey {
                device,
                component: *component,
                kind: value.kind(),
            };
            let slot = slots.entry(key).or_default();
            slot.value = Some(value.clone());
            slot.stale = false;
        }
        entries.len()
    }

    /// 读取缓存；没有新鲜值时触发（或加入）获取，最多等待 `timeout`
    pub fn get(
        self: &Arc<Self>,
        key: CacheKey,
        identity: &DeviceIdentity,
        timeout: Duration,
    ) -> Result<CapabilityValue, FetchError> {
        // 超出可表示范围时不设截止时间
        let deadline = Instant::now().checked_add(timeout);
        let mut slots = self.slots.lock();

        let flight = {
            let slot = slots.entry(key).or_default();
            if let (Some(value), false) = (&slot.value, slot.stale) {
                return Ok(value.clone());
            }
            slot.in_flight
        };
        let flight = match flight {
            Some(flight) => {
                RegistryMetrics::incr(&self.metrics.fetches_collapsed);
                debug!("Joining in-flight fetch {} for {:?}", flight, key);
                flight
            },
            None => self.start_flight(&mut slots, key, identity, None),
        };

        loop {
            let Some(slot) = slots.get(&key) else {
                return Err(FetchError::Purged);
            };
            match &slot.outcome {
                Some((done, result)) if *done == flight => {
                    return Self::resolve(key, slot, result.clone());
                },
                _ if slot.in_flight != Some(flight) => return Err(FetchError::Purged),
                _ => {},
            }
            let timed_out = match deadline {
                Some(deadline) => self.changed.wait_until(&mut slots, deadline).timed_out(),
                None => {
                    self.changed.wait(&mut slots);
                    false
                },
            };
            if timed_out {
                let Some(slot) = slots.get(&key) else {
                    return Err(FetchError::Purged);
                };
                if let Some((done, result)) = &slot.outcome
                    && *done == flight
                {
                    return Self::resolve(key, slot, result.clone());
                }
                return Self::resolve(key, slot, Err(FetchError::Timeout));
            }
        }
    }

    /// 获取失败时退回旧值
    fn resolve(
        key: CacheKey,
        slot: &Slot,
        result: Result<CapabilityValue, FetchError>,
    ) -> Result<CapabilityValue, FetchError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => match &slot.value {
                Some(stale) => {
                    warn!("Fetch for {:?} failed ({}), serving stale value", key, e);
                    Ok(stale.clone())
                },
                None => Err(e),
            },
        }
    }

    /// 后台刷新；已有获取在进行时返回 `false`（`on_done` 不会被调用）
    pub fn refresh(
        self: &Arc<Self>,
        key: CacheKey,
        identity: &DeviceIdentity,
        on_done: Option<FetchCallback>,
    ) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(&key).is_some_and(|s| s.in_flight.is_some()) {
            return false;
        }
        self.start_flight(&mut slots, key, identity, on_done);
        true
    }

    fn start_flight(
        self: &Arc<Self>,
        slots: &mut HashMap<CacheKey, Slot>,
        key: CacheKey,
        identity: &DeviceIdentity,
        on_done: Option<FetchCallback>,
    ) -> u64 {
        let flight = self.flights.fetch_add(1, Ordering::Relaxed) + 1;
        let slot = slots.entry(key).or_default();
        slot.in_flight = Some(flight);
        let generation = slot.generation;
        RegistryMetrics::incr(&self.metrics.fetches_started);
        debug!("Starting fetch {} for {:?}", flight, key);

        let cache = Arc::clone(self);
        let identity = identity.clone();
        let spawned = std::thread::Builder::new()
            .name("headset-fetch".to_string())
            .spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| cache.fetch_now(&identity, key)))
                    .unwrap_or_else(|_| Err(FetchError::Provider("provider panicked".to_string())));
                cache.complete(key, &identity, flight, generation, result.clone());
                if let Some(on_done) = on_done {
                    on_done(result);
                }
            });
        if let Err(e) = spawned {
            error!("Failed to spawn fetch thread: {}", e);
            slot.in_flight = None;
            slot.outcome = Some((flight, Err(FetchError::Provider(e.to_string()))));
            RegistryMetrics::incr(&self.metrics.fetches_failed);
        }
        flight
    }

    fn fetch_now(
        &self,
        identity: &DeviceIdentity,
        key: CacheKey,
    ) -> Result<CapabilityValue, FetchError> {
        if self.block_network && self.provider.requires_network(key.kind) {
            return Err(FetchError::NetworkBlocked);
        }
        let value = self.provider.fetch(identity, key.component, key.kind)?;
        if value.kind() != key.kind {
            return Err(FetchError::Provider(format!(
                "expected {:?}, provider returned {:?}",
                key.kind,
                value.kind()
            )));
        }
        Ok(value)
    }

    fn complete(
        &self,
        key: CacheKey,
        identity: &DeviceIdentity,
        flight: u64,
        generation: u64,
        result: Result<CapabilityValue, FetchError>,
    ) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key)
            && slot.in_flight == Some(flight)
        {
            slot.in_flight = None;
            match &result {
                Ok(value) if slot.generation == generation => {
                    slot.value = Some(value.clone());
                    slot.stale = false;
                    self.catalogue
                        .insert(identity, key.component, value.clone(), Some(Instant::now()));
                },
                Ok(_) => debug!("Discarding fetch {} for {:?}: invalidated meanwhile", flight, key),
                Err(e) => {
                    RegistryMetrics::incr(&self.metrics.fetches_failed);
                    warn!("Fetch {} for {:?} failed: {}", flight, key, e);
                },
            }
            slot.outcome = Some((flight, result));
        }
        drop(slots);
        self.changed.notify_all();
    }

    /// 直接刷新目录中的一个产品（不经过设备缓存），返回成功刷新的条目数
    pub fn refresh_product(&self, identity: &DeviceIdentity) -> usize {
        let mut refreshed = 0;
        for kind in [CapabilityKind::Features, CapabilityKind::Constants] {
            match self.fetch_now(identity, CacheKey::primary(0, kind)) {
                Ok(value) => {
                    self.catalogue.insert(
                        identity,
                        SystemComponent::PrimaryHeadset,
                        value,
                        Some(Instant::now()),
                    );
                    refreshed += 1;
                },
                Err(e) => debug!(
                    "Catalogue refresh of {:04x}:{:04x} {:?} failed: {}",
                    identity.vendor_id, identity.product_id, kind, e
                ),
            }
        }
        refreshed
    }

    /// 标记设备的所有条目过期
    pub fn invalidate(&self, device: DeviceId) {
        let mut slots = self.slots.lock();
        let keys: SmallVec<[CacheKey; 8]> =
            slots.keys().filter(|k| k.device == device).copied().collect();
        for key in &keys {
            if let Some(slot) = slots.get_mut(key) {
                slot.stale = true;
                slot.generation += 1;
            }
        }
        debug!("Invalidated {} cache entries of device {}", keys.len(), device);
    }

    /// 删除设备的所有条目
    pub fn purge(&self, device: DeviceId) {
        self.slots.lock().retain(|k, _| k.device != device);
        self.changed.notify_all();
    }
}
