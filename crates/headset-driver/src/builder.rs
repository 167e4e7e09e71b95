//! Builder 模式实现
//!
//! 提供链式构造 [`Registry`] 实例的便捷方式。

use crate::cache::{CapabilityCache, CapabilityKind, CapabilityProvider, CapabilityValue, FetchError};
use crate::dispatcher::{Dispatcher, EventListener, SlotKey};
use crate::error::DriverError;
use crate::lock::LockManager;
use crate::metrics::RegistryMetrics;
use crate::operations::{FirmwareEngine, NullEngine, OperationRunner};
use crate::registry::{Core, Registry};
use crate::scheduler::Scheduler;
use crate::store::DeviceStore;
use headset_protocol::{
    ConstRoot, DeviceFeature, DeviceIdentity, EventKind, SdkConfig, SystemComponent,
};
use headset_transport::Transport;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

/// 未配置数据来源时使用：没有任何能力数据
#[derive(Debug, Default, Clone, Copy)]
struct NullProvider;

impl CapabilityProvider for NullProvider {
    fn fetch(
        &self,
        _identity: &DeviceIdentity,
        _component: SystemComponent,
        kind: CapabilityKind,
    ) -> Result<CapabilityValue, FetchError> {
        Err(FetchError::NotFound(format!("no provider for {:?}", kind)))
    }

    fn requires_network(&self, _kind: CapabilityKind) -> bool {
        false
    }
}

/// Registry Builder
///
/// # Example
///
/// ```no_run
/// use headset_driver::RegistryBuilder;
/// use headset_transport::MockTransport;
/// use std::sync::Arc;
///
/// let registry = RegistryBuilder::new()
///     .transport(Arc::new(MockTransport::new()))
///     .build()
///     .unwrap();
/// ```
pub struct RegistryBuilder {
    config: SdkConfig,
    transport: Option<Arc<dyn Transport>>,
    provider: Option<Arc<dyn CapabilityProvider>>,
    engine: Option<Arc<dyn FirmwareEngine>>,
    seeds: Vec<(DeviceIdentity, CapabilityValue)>,
    listeners: Vec<(EventKind, Arc<dyn EventListener>)>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            config: SdkConfig::default(),
            transport: None,
            provider: None,
            engine: None,
            seeds: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// 设置配置（可选，默认 [`SdkConfig::default`]）
    pub fn config(mut self, config: SdkConfig) -> Self {
        self.config = config;
        self
    }

    /// 设置传输层（必需）
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 设置能力数据来源（可选，默认没有任何数据）
    pub fn capability_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// 设置固件引擎（可选，默认所有固件 / 上传操作以 NotAllowed 失败）
    pub fn firmware_engine(mut self, engine: Arc<dyn FirmwareEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// 预置一个已知产品的功能列表；该型号接入后立即 Ready
    pub fn known_product(mut self, identity: DeviceIdentity, features: Vec<DeviceFeature>) -> Self {
        self.seeds.push((identity, CapabilityValue::Features(features)));
        self
    }

    /// 预置一个产品的设备常量
    pub fn known_constants(mut self, identity: DeviceIdentity, constants: ConstRoot) -> Self {
        self.seeds
            .push((identity, CapabilityValue::Constants(Arc::new(constants))));
        self
    }

    /// 预先注册全局单槽位回调，在传输层开始上报之前生效（首次扫描的设备也能收到）
    pub fn global_listener(mut self, kind: EventKind, listener: Arc<dyn EventListener>) -> Self {
        self.listeners.push((kind, listener));
        self
    }

    /// 构建并启动注册表
    ///
    /// # Errors
    /// - `DriverError::Protocol`: 配置非法
    /// - `DriverError::Config`: 未设置传输层或传输层启动失败
    /// - `DriverError::Thread`: 后台线程创建失败
    pub fn build(self) -> Result<Registry, DriverError> {
        self.config.validate()?;
        let transport = self
            .transport
            .ok_or_else(|| DriverError::Config("transport not set".to_string()))?;
        let provider = self.provider.unwrap_or_else(|| Arc::new(NullProvider));
        let engine = self.engine.unwrap_or_else(|| Arc::new(NullEngine));
        let config = self.config;

        let metrics = Arc::new(RegistryMetrics::new());
        let store = Arc::new(DeviceStore::new());
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.queue_capacity,
            config.dispatcher.workers,
            metrics.clone(),
        )?);
        let cache = Arc::new(CapabilityCache::new(
            provider,
            config.cloud.block_all_network_access,
            metrics.clone(),
        ));

        for (identity, value) in self.seeds {
            cache
                .catalogue()
                .insert(&identity, SystemComponent::PrimaryHeadset, value, None);
        }
        if let Some(path) = &config.catalogue.preload_zip_file {
            match cache.catalogue().load_file(path) {
                Ok(count) => info!("Preloaded {} product(s) from {}", count, path),
                Err(e) => warn!("Failed to preload catalogue from {}: {}", path, e),
            }
        }

        for (kind, listener) in self.listeners {
            dispatcher.set_slot(SlotKey::Global(kind), listener);
        }

        let scheduler = Scheduler::new()?;
        let runner =
            OperationRunner::new(dispatcher.clone(), engine, cache.clone(), metrics.clone());
        let locks = LockManager::new(store.clone(), metrics.clone());

        let catalogue = config.catalogue.clone();
        let core = Arc::new(Core {
            config,
            store,
            locks,
            dispatcher,
            cache,
            runner,
            scheduler,
            transport,
            metrics,
            running: AtomicBool::new(true),
        });
        let registry = Registry::start(core)?;

        if catalogue.refresh_enabled() && catalogue.refresh_at_startup {
            registry.schedule_catalogue_refresh(catalogue.delay_before_refresh());
        }
        Ok(registry)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
