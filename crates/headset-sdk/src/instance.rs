//! 进程级 SDK 实例
//!
//! 同一时刻只有一个注册表。`initialize` 与 `initialize_v2` 是同一个实例的两个入口，
//! 已初始化时再次初始化会失败；`uninitialize` 返回后不会再有任何回调。
//!
//! 入口函数只在短暂的读锁内取出实例的 `Arc`，调用本身不持有全局锁，
//! 因此回调内部可以安全地再调用 SDK。

use headset_driver::{
    CallerId, CapabilityProvider, DriverError, EventListener, FirmwareEngine, MetricsSnapshot,
    Registry, RegistryBuilder,
};
use headset_protocol::{
    DeviceEvent, DeviceId, DeviceInfo, EventKind, EventPayload, HidInput, ReturnCode, SdkConfig,
};
use headset_transport::Transport;
use parking_lot::{Mutex, RwLock, const_mutex, const_rwlock};
use std::sync::Arc;
use tracing::{info, warn};

/// SDK 版本号
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) struct Instance {
    pub registry: Registry,
    /// 锁操作使用的调用方标识（初始化时的 instance）
    pub caller: CallerId,
}

static INSTANCE: RwLock<Option<Arc<Instance>>> = const_rwlock(None);
static APP_ID: Mutex<Option<String>> = const_mutex(None);

/// SDK 依赖的外部协作方
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub capability_provider: Option<Arc<dyn CapabilityProvider>>,
    pub firmware_engine: Option<Arc<dyn FirmwareEngine>>,
}

impl Collaborators {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            capability_provider: None,
            firmware_engine: None,
        }
    }

    pub fn with_capability_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.capability_provider = Some(provider);
        self
    }

    pub fn with_firmware_engine(mut self, engine: Arc<dyn FirmwareEngine>) -> Self {
        self.firmware_engine = Some(engine);
        self
    }
}

type FirstScanFn = dyn Fn() + Send + Sync;
type AttachedFn = dyn Fn(&DeviceInfo) + Send + Sync;
type RemovedFn = dyn Fn(DeviceId) + Send + Sync;
type RawInputFn = dyn Fn(DeviceId, &[u8]) + Send + Sync;
type TranslatedInputFn = dyn Fn(DeviceId, HidInput, bool) + Send + Sync;

/// 初始化时注册的回调（都可省略）
#[derive(Default, Clone)]
pub struct InitCallbacks {
    first_scan_done: Option<Arc<FirstScanFn>>,
    device_attached: Option<Arc<AttachedFn>>,
    device_removed: Option<Arc<RemovedFn>>,
    raw_hid_input: Option<Arc<RawInputFn>>,
    translated_input: Option<Arc<TranslatedInputFn>>,
}

impl InitCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 首次设备扫描完成
    pub fn on_first_scan_done(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.first_scan_done = Some(Arc::new(f));
        self
    }

    pub fn on_device_attached(mut self, f: impl Fn(&DeviceInfo) + Send + Sync + 'static) -> Self {
        self.device_attached = Some(Arc::new(f));
        self
    }

    pub fn on_device_removed(mut self, f: impl Fn(DeviceId) + Send + Sync + 'static) -> Self {
        self.device_removed = Some(Arc::new(f));
        self
    }

    /// 原始 HID 输入
    pub fn on_raw_hid_input(mut self, f: impl Fn(DeviceId, &[u8]) + Send + Sync + 'static) -> Self {
        self.raw_hid_input = Some(Arc::new(f));
        self
    }

    /// 翻译后的按键输入
    pub fn on_translated_input(
        mut self,
        f: impl Fn(DeviceId, HidInput, bool) + Send + Sync + 'static,
    ) -> Self {
        self.translated_input = Some(Arc::new(f));
        self
    }

    fn into_listeners(self) -> Vec<(EventKind, Arc<dyn EventListener>)> {
        let mut listeners: Vec<(EventKind, Arc<dyn EventListener>)> = Vec::new();
        if let Some(f) = self.first_scan_done {
            listeners.push((
                EventKind::FirstScanDone,
                Arc::new(move |_: &DeviceEvent| f()),
            ));
        }
        if let Some(f) = self.device_attached {
            listeners.push((
                EventKind::DeviceAttached,
                Arc::new(move |e: &DeviceEvent| {
                    if let EventPayload::DeviceAttached(info) = &e.payload {
                        f(info);
                    }
                }),
            ));
        }
        if let Some(f) = self.device_removed {
            listeners.push((
                EventKind::DeviceRemoved,
                Arc::new(move |e: &DeviceEvent| {
                    if let Some(id) = e.device_id {
                        f(id);
                    }
                }),
            ));
        }
        if let Some(f) = self.raw_hid_input {
            listeners.push((
                EventKind::RawHidInput,
                Arc::new(move |e: &DeviceEvent| {
                    if let (Some(id), EventPayload::RawHidInput(raw)) = (e.device_id, &e.payload) {
                        f(id, raw);
                    }
                }),
            ));
        }
        if let Some(f) = self.translated_input {
            listeners.push((
                EventKind::TranslatedInput,
                Arc::new(move |e: &DeviceEvent| {
                    if let (Some(id), EventPayload::TranslatedInput { input, value }) =
                        (e.device_id, &e.payload)
                    {
                        f(id, *input, *value);
                    }
                }),
            ));
        }
        listeners
    }
}

/// 以默认配置初始化
///
/// 已初始化时返回 `false`。`instance` 用作本应用在设备锁上的调用方标识。
#[deprecated(note = "use `initialize_v2`, which accepts an `SdkConfig`")]
pub fn initialize(collaborators: Collaborators, callbacks: InitCallbacks, instance: u32) -> bool {
    initialize_v2(collaborators, callbacks, instance, SdkConfig::default())
}

/// 初始化 SDK
///
/// 已初始化、配置非法或传输层启动失败时返回 `false`（原因记录在日志中）。
pub fn initialize_v2(
    collaborators: Collaborators,
    callbacks: InitCallbacks,
    instance: u32,
    config: SdkConfig,
) -> bool {
    let mut slot = INSTANCE.write();
    if slot.is_some() {
        warn!("SDK already initialized");
        return false;
    }

    let mut builder = RegistryBuilder::new()
        .config(config)
        .transport(collaborators.transport);
    if let Some(provider) = collaborators.capability_provider {
        builder = builder.capability_provider(provider);
    }
    if let Some(engine) = collaborators.firmware_engine {
        builder = builder.firmware_engine(engine);
    }
    for (kind, listener) in callbacks.into_listeners() {
        builder = builder.global_listener(kind, listener);
    }

    match builder.build() {
        Ok(registry) => {
            info!(
                "SDK {} initialized (instance {}, app id {:?})",
                SDK_VERSION,
                instance,
                APP_ID.lock().as_deref()
            );
            *slot = Some(Arc::new(Instance {
                registry,
                caller: CallerId::new(u64::from(instance)),
            }));
            true
        },
        Err(e) => {
            warn!("SDK initialization failed: {}", e);
            false
        },
    }
}

/// 关闭 SDK：排空事件分发、强制 detach 所有设备
///
/// 未初始化时返回 `false`。返回之后不会再有任何回调被调用。
pub fn uninitialize() -> bool {
    let Some(instance) = INSTANCE.write().take() else {
        return false;
    };
    instance.registry.shutdown();
    info!("SDK uninitialized");
    true
}

pub fn is_initialized() -> bool {
    INSTANCE.read().is_some()
}

pub(crate) fn instance() -> Result<Arc<Instance>, ReturnCode> {
    INSTANCE.read().clone().ok_or(ReturnCode::SystemError)
}

/// 在当前实例上执行一个驱动层调用，错误翻译为返回码
pub(crate) fn with_registry<T>(
    f: impl FnOnce(&Registry) -> Result<T, DriverError>,
) -> Result<T, ReturnCode> {
    let instance = instance()?;
    f(&instance.registry).map_err(|e| e.return_code())
}

/// 执行只关心成败的调用
pub(crate) fn status_of(f: impl FnOnce(&Registry) -> Result<(), DriverError>) -> ReturnCode {
    match with_registry(f) {
        Ok(()) => ReturnCode::ReturnOk,
        Err(code) => code,
    }
}

/// 设置应用标识（应在初始化之前调用）
pub fn set_app_id(app_id: &str) -> ReturnCode {
    let app_id = app_id.trim();
    if app_id.is_empty() {
        return ReturnCode::ParameterFail;
    }
    *APP_ID.lock() = Some(app_id.to_string());
    ReturnCode::ReturnOk
}

pub fn app_id() -> Option<String> {
    APP_ID.lock().clone()
}

/// SDK 版本号；`capacity` 是调用方缓冲区大小（含结尾的 NUL）
pub fn sdk_version(capacity: usize) -> Result<String, ReturnCode> {
    if capacity <= SDK_VERSION.len() {
        return Err(ReturnCode::ParameterFail);
    }
    Ok(SDK_VERSION.to_string())
}

/// 返回码的说明文字
pub fn return_code_string(code: ReturnCode) -> &'static str {
    code.description()
}

/// 运行指标；未初始化时为 `None`
pub fn metrics() -> Option<MetricsSnapshot> {
    instance().ok().map(|i| i.registry.metrics())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_version_capacity() {
        let len = SDK_VERSION.len();
        assert_eq!(sdk_version(len), Err(ReturnCode::ParameterFail));
        assert_eq!(sdk_version(0), Err(ReturnCode::ParameterFail));
        assert_eq!(sdk_version(len + 1).unwrap(), SDK_VERSION);
    }

    #[test]
    fn test_app_id_rejects_blank() {
        assert_eq!(set_app_id("   "), ReturnCode::ParameterFail);
        assert_eq!(set_app_id("com.example.softphone"), ReturnCode::ReturnOk);
        assert_eq!(app_id().as_deref(), Some("com.example.softphone"));
    }

    #[test]
    fn test_return_code_string() {
        assert_eq!(return_code_string(ReturnCode::ReturnOk), "Call was successful");
    }

    #[test]
    fn test_callbacks_translate_payloads() {
        use std::sync::atomic::{AtomicU16, Ordering};

        let seen = Arc::new(AtomicU16::new(0));
        let recorder = seen.clone();
        let listeners = InitCallbacks::new()
            .on_device_removed(move |id| recorder.store(id, Ordering::SeqCst))
            .into_listeners();
        assert_eq!(listeners.len(), 1);

        let (kind, listener) = &listeners[0];
        assert_eq!(*kind, EventKind::DeviceRemoved);
        listener.on_event(&DeviceEvent {
            device_id: Some(7),
            sequence: 0,
            payload: EventPayload::DeviceRemoved,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }
}
