//! 设备注册表
//!
//! [`Registry`] 把存储、锁、会话、缓存、分发器和操作执行器组合在一起，
//! 同时作为传输层的 [`DeviceEventSink`] 接收 attach / detach / 输入 / 状态上报。
//!
//! # 加锁顺序
//!
//! 存储写锁 → 记录锁 → 分发器队列锁。分发线程从不获取记录锁；
//! 设备事件都在记录锁内、确认记录未 detach 后才发布，因此 detach 返回后
//! 不会再有该设备的事件。

use crate::cache::{CacheKey, CapabilityCache, CapabilityKind, CapabilityValue, FetchError};
use crate::dispatcher::{Dispatcher, EventListener, SlotKey, SubscriptionHandle};
use crate::error::DriverError;
use crate::lock::{CallerId, LockManager};
use crate::metrics::{MetricsSnapshot, RegistryMetrics};
use crate::operations::{Job, OperationKind, OperationRunner};
use crate::scheduler::Scheduler;
use crate::session::SessionState;
use crate::store::{DeviceRecord, DeviceStore};
use bytes::Bytes;
use headset_protocol::{
    BatteryStatus, BusyLightValue, ConstRoot, DeviceCommand, DeviceFeature, DeviceId,
    DeviceIdentity, DeviceInfo, DeviceQuery, DeviceReading, DeviceStatus, EqualizerBand,
    EqualizerReading, ErrorStatus, EventKind, EventMask, EventPayload, FirmwareInfo,
    FirmwareVersion, SdkConfig, SystemComponent,
};
use headset_transport::{
    DeviceEventSink, Transport, TransportDeviceError, TransportDeviceErrorKind, TransportError,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// 固件更新检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirmwareCheck {
    UpToDate,
    Available(FirmwareInfo),
}

pub(crate) struct Core {
    pub config: SdkConfig,
    pub store: Arc<DeviceStore>,
    pub locks: LockManager,
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Arc<CapabilityCache>,
    pub runner: OperationRunner,
    pub scheduler: Scheduler,
    pub transport: Arc<dyn Transport>,
    pub metrics: Arc<RegistryMetrics>,
    pub running: AtomicBool,
}

/// 传输层看到的上报入口（弱引用，注册表关闭后自动失效）
struct SinkHandle(Weak<Core>);

impl SinkHandle {
    fn core(&self) -> Option<Arc<Core>> {
        self.0
            .upgrade()
            .filter(|core| core.running.load(Ordering::Acquire))
    }
}

impl DeviceEventSink for SinkHandle {
    fn attached(&self, identity: DeviceIdentity) -> Option<DeviceId> {
        self.core()?.on_attached(identity)
    }

    fn detached(&self, device_id: DeviceId) {
        if let Some(core) = self.core() {
            core.detach_device(device_id);
        }
    }

    fn input(&self, device_id: DeviceId, raw: Bytes) {
        if let Some(core) = self.core() {
            core.on_input(device_id, raw);
        }
    }

    fn status(&self, device_id: DeviceId, status: DeviceStatus) {
        if let Some(core) = self.core() {
            core.on_status(device_id, status);
        }
    }

    fn first_scan_done(&self) {
        if let Some(core) = self.core() {
            info!("First device scan done ({} device(s))", core.store.len());
            core.dispatcher.publish(None, EventPayload::FirstScanDone);
        }
    }
}

impl Core {
    fn background_mode(&self) -> bool {
        self.config.catalogue.fetch_data_for_unknown_devices_in_background
    }

    fn on_attached(self: &Arc<Self>, identity: DeviceIdentity) -> Option<DeviceId> {
        let record = match self.store.register(identity) {
            Ok(record) => record,
            Err(e) => {
                warn!("Attach rejected: {}", e);
                return None;
            },
        };
        let id = record.id();
        RegistryMetrics::incr(&self.metrics.devices_attached);

        let seeded = self.cache.seed_from_catalogue(id, record.identity());
        let known = seeded > 0 && self.cache.catalogue().is_known(record.identity());
        if known {
            record.with(|inner| inner.session.mark_ready());
        }
        info!(
            "Device {} attached: {} ({:04x}:{:04x}, {:?}, known: {})",
            id,
            record.identity().device_name,
            record.identity().vendor_id,
            record.identity().product_id,
            record.identity().connection,
            known
        );

        let info = record.info();
        record.with(|inner| {
            if !inner.session.is_detached() {
                self.dispatcher
                    .publish(Some(id), EventPayload::DeviceAttached(info));
            }
        });

        let catalogue = &self.config.catalogue;
        if known {
            if catalogue.refresh_enabled()
                && catalogue.refresh_at_connect
                && self
                    .cache
                    .catalogue()
                    .needs_refresh(record.identity(), catalogue.minimum_age_before_update())
            {
                self.schedule_refresh(id, catalogue.delay_before_refresh());
            }
        } else if self.background_mode() {
            self.refresh_device(id);
        }
        Some(id)
    }

    fn schedule_refresh(self: &Arc<Self>, id: DeviceId, delay: Duration) {
        let weak = Arc::downgrade(self);
        debug!("Device {}: catalogue refresh in {:?}", id, delay);
        self.scheduler.schedule(delay, Some(id), move || {
            if let Some(core) = weak.upgrade() {
                core.refresh_device(id);
            }
        });
    }

    /// 后台刷新设备的描述数据，完成后发布 DeviceDataUpdated
    fn refresh_device(self: &Arc<Self>, id: DeviceId) {
        let Ok(record) = self.store.lookup(id) else {
            return;
        };
        let identity = record.identity().clone();
        self.cache.refresh(
            CacheKey::primary(id, CapabilityKind::Constants),
            &identity,
            None,
        );
        let weak = Arc::downgrade(self);
        let started = self.cache.refresh(
            CacheKey::primary(id, CapabilityKind::Features),
            &identity,
            Some(Box::new(move |result| {
                if let Some(core) = weak.upgrade() {
                    core.on_refreshed(id, result);
                }
            })),
        );
        if !started {
            debug!("Device {}: refresh already in flight", id);
        }
    }

    fn on_refreshed(&self, id: DeviceId, result: Result<CapabilityValue, FetchError>) {
        let Ok(record) = self.store.lookup(id) else {
            return;
        };
        record.with(|inner| {
            if inner.session.is_detached() {
                return;
            }
            match &result {
                Ok(_) => inner.err_status = ErrorStatus::NoError,
                Err(e) if e.is_network() => inner.err_status = ErrorStatus::NetworkError,
                Err(_) => inner.err_status = ErrorStatus::DeviceInfoError,
            }
            inner.session.mark_ready();
            self.dispatcher
                .publish(Some(id), EventPayload::DeviceDataUpdated);
        });
        match result {
            Ok(_) => info!("Device {}: data updated", id),
            Err(e) => warn!("Device {}: data refresh failed: {}", id, e),
        }
    }

    /// detach（传输层上报或关闭时强制）；设备不存在时无效果
    fn detach_device(&self, id: DeviceId) {
        let (record, outcome) = match self.store.remove(id) {
            Ok(removed) => removed,
            Err(_) => {
                debug!("Detach of unknown device {} ignored", id);
                return;
            },
        };
        self.cache.purge(id);
        self.scheduler.cancel_device(id);
        self.dispatcher.purge_device(id);
        if let Some(operation) = &outcome.operation {
            self.runner.abort_for_detach(id, operation);
        }
        if let Some(holder) = outcome.lock_holder {
            info!("Device {}: lock of caller {} force-released", id, holder.raw());
        }
        self.dispatcher.publish(Some(id), EventPayload::DeviceRemoved);
        self.dispatcher.retire_device(id);
        RegistryMetrics::incr(&self.metrics.devices_detached);
        info!("Device {} detached: {}", id, record.identity().device_name);
    }

    fn on_input(&self, id: DeviceId, raw: Bytes) {
        let Ok(record) = self.store.lookup(id) else {
            return;
        };
        trace!("Device {} input: {}", id, hex::encode(&raw));
        record.with(|inner| {
            if !inner.session.is_detached() && inner.subscriptions.contains(EventKind::RawHidInput) {
                self.dispatcher
                    .publish(Some(id), EventPayload::RawHidInput(raw.to_vec()));
            }
        });
    }

    fn on_status(&self, id: DeviceId, status: DeviceStatus) {
        let Ok(record) = self.store.lookup(id) else {
            return;
        };
        let kind = status.kind();
        record.with(|inner| {
            if inner.session.is_detached() {
                return;
            }
            if let DeviceStatus::Battery(battery) = &status {
                inner.battery = Some(battery.clone());
            }
            if inner.subscriptions.contains(kind) {
                self.dispatcher.publish(Some(id), status.into());
            }
        });
    }

    fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Registry shutting down ({} device(s) attached)", self.store.len());
        let timeout = self.config.dispatcher.shutdown_timeout();
        self.transport.stop();
        self.scheduler.shutdown(timeout);
        // 强制 detach 产生的 Cancelled / DeviceRemoved 在分发器关闭前投递
        for record in self.store.enumerate() {
            self.detach_device(record.id());
        }
        self.dispatcher.shutdown(timeout);
    }
}

/// 设备注册表（由 [`RegistryBuilder`](crate::RegistryBuilder) 创建）
pub struct Registry {
    core: Arc<Core>,
}

impl Registry {
    /// 启动传输层上报
    pub(crate) fn start(core: Arc<Core>) -> Result<Self, DriverError> {
        let sink: Arc<dyn DeviceEventSink> = Arc::new(SinkHandle(Arc::downgrade(&core)));
        core.transport.start(sink).map_err(|e| {
            core.running.store(false, Ordering::Release);
            DriverError::Config(format!("transport failed to start: {}", e))
        })?;
        info!("Registry started");
        Ok(Self { core })
    }

    pub(crate) fn schedule_catalogue_refresh(&self, delay: Duration) {
        let core = &self.core;
        let minimum_age = core.config.catalogue.minimum_age_before_update();
        let cache = core.cache.clone();
        core.scheduler.schedule(delay, None, move || {
            for identity in cache.catalogue().products() {
                if cache.catalogue().needs_refresh(&identity, minimum_age) {
                    let refreshed = cache.refresh_product(&identity);
                    debug!(
                        "Catalogue refresh of {:04x}:{:04x}: {} entries",
                        identity.vendor_id, identity.product_id, refreshed
                    );
                }
            }
        });
    }

    fn record(&self, id: DeviceId) -> Result<Arc<DeviceRecord>, DriverError> {
        if !self.core.running.load(Ordering::Acquire) {
            return Err(DriverError::ShutDown);
        }
        self.core.store.lookup(id)
    }

    pub fn config(&self) -> &SdkConfig {
        &self.core.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    // ==================== 设备 ====================

    /// 当前在线设备（按 ID 排序的一致快照）
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.core.store.enumerate().iter().map(|r| r.info()).collect()
    }

    pub fn device_info(&self, id: DeviceId) -> Result<DeviceInfo, DriverError> {
        Ok(self.record(id)?.info())
    }

    pub fn session_state(&self, id: DeviceId) -> Result<SessionState, DriverError> {
        Ok(self.record(id)?.session_state())
    }

    // ==================== 锁 ====================

    pub fn acquire_lock(&self, id: DeviceId, caller: CallerId) -> Result<(), DriverError> {
        self.record(id)?;
        self.core.locks.acquire(id, caller)
    }

    pub fn release_lock(&self, id: DeviceId, caller: CallerId) -> Result<(), DriverError> {
        self.record(id)?;
        self.core.locks.release(id, caller)
    }

    pub fn is_locked(&self, id: DeviceId) -> bool {
        self.core.locks.is_locked(id)
    }

    /// 发送命令；通话控制命令在设备被锁定时只允许锁持有者发送
    pub fn send_command(
        &self,
        id: DeviceId,
        caller: CallerId,
        command: &DeviceCommand,
    ) -> Result<(), DriverError> {
        self.record(id)?;
        self.core.locks.check_command(id, caller, command)?;
        self.write(id, command)
    }

    fn write(&self, id: DeviceId, command: &DeviceCommand) -> Result<(), DriverError> {
        debug!("Device {}: {}", id, command.name());
        self.core
            .transport
            .write_command(id, command)
            .map_err(DriverError::write)
    }

    fn read(&self, id: DeviceId, query: DeviceQuery) -> Result<DeviceReading, DriverError> {
        self.core
            .transport
            .read(id, query)
            .map_err(DriverError::read)
    }

    fn read_flag(&self, id: DeviceId, query: DeviceQuery) -> Result<bool, DriverError> {
        self.read(id, query)?
            .as_flag()
            .ok_or_else(|| unexpected_reading(query))
    }

    // ==================== 监听 ====================

    /// 订阅事件；`device` 为 `Some` 时设备必须在线
    pub fn subscribe(
        &self,
        kinds: EventMask,
        device: Option<DeviceId>,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionHandle, DriverError> {
        if kinds.is_empty() {
            return Err(DriverError::Parameter("empty event mask".to_string()));
        }
        if let Some(id) = device {
            self.record(id)?;
        }
        Ok(self.core.dispatcher.subscribe(kinds, device, listener))
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.core.dispatcher.unsubscribe(handle)
    }

    /// 全局单槽位回调（重复注册替换旧回调）
    pub fn set_global_listener(
        &self,
        kind: EventKind,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionHandle {
        self.core.dispatcher.set_slot(SlotKey::Global(kind), listener)
    }

    pub fn clear_global_listener(&self, kind: EventKind) -> bool {
        self.core.dispatcher.clear_slot(SlotKey::Global(kind))
    }

    /// 按 (设备, 事件类型) 注册的单槽位回调
    pub fn set_device_listener(
        &self,
        id: DeviceId,
        kind: EventKind,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionHandle, DriverError> {
        self.record(id)?;
        Ok(self.core.dispatcher.set_slot(SlotKey::Device(id, kind), listener))
    }

    pub fn clear_device_listener(&self, id: DeviceId, kind: EventKind) -> bool {
        self.core.dispatcher.clear_slot(SlotKey::Device(id, kind))
    }

    pub fn dropped_events(&self, handle: SubscriptionHandle) -> Option<u64> {
        self.core.dispatcher.dropped_events(handle)
    }

    /// 设置设备上报哪些状态 / 输入事件
    pub fn set_subscribed_events(&self, id: DeviceId, mask: EventMask) -> Result<(), DriverError> {
        let record = self.record(id)?;
        record.with(|inner| inner.subscriptions = mask);
        debug!("Device {}: subscribed events {:#x}", id, mask.bits());
        Ok(())
    }

    pub fn subscribed_events(&self, id: DeviceId) -> Result<EventMask, DriverError> {
        Ok(self.record(id)?.subscriptions())
    }

    // ==================== 能力数据 ====================

    /// 确认设备已就绪；同步模式下必要时立即获取功能列表
    fn ensure_ready(&self, record: &Arc<DeviceRecord>) -> Result<(), DriverError> {
        if record.with(|inner| inner.session.is_ready()) {
            return Ok(());
        }
        self.capability(record, SystemComponent::PrimaryHeadset, CapabilityKind::Features)
            .map(|_| ())
    }

    fn capability(
        &self,
        record: &Arc<DeviceRecord>,
        component: SystemComponent,
        kind: CapabilityKind,
    ) -> Result<CapabilityValue, DriverError> {
        let id = record.id();
        let key = CacheKey {
            device: id,
            component,
            kind,
        };
        let (ready, err_status) = record.with(|inner| (inner.session.is_ready(), inner.err_status));
        if self.core.background_mode() && kind != CapabilityKind::LatestFirmware {
            if !ready {
                // 后台获取尚未完成：不阻塞调用方
                return self.core.cache.peek(key).ok_or(DriverError::DataPending(id));
            }
            if let Some(err) = background_failure(err_status) {
                // 后台获取已失败：报告记录的结果，不再同步重试
                return self.core.cache.peek(key).ok_or(err);
            }
        }

        let value = self
            .core
            .cache
            .get(key, record.identity(), self.core.config.fetch_timeout())
            .map_err(|e| e.into_driver(id))?;
        if kind == CapabilityKind::Features && component == SystemComponent::PrimaryHeadset {
            record.with(|inner| {
                if inner.session.mark_ready() {
                    debug!("Device {} ready", id);
                }
            });
        }
        Ok(value)
    }

    pub fn supported_features(&self, id: DeviceId) -> Result<Vec<DeviceFeature>, DriverError> {
        let record = self.record(id)?;
        self.features_of(&record)
    }

    fn features_of(&self, record: &Arc<DeviceRecord>) -> Result<Vec<DeviceFeature>, DriverError> {
        self.capability(record, SystemComponent::PrimaryHeadset, CapabilityKind::Features)?
            .into_features()
            .ok_or_else(|| DriverError::NoInformation("feature list".to_string()))
    }

    pub fn is_feature_supported(
        &self,
        id: DeviceId,
        feature: DeviceFeature,
    ) -> Result<bool, DriverError> {
        Ok(self.supported_features(id)?.contains(&feature))
    }

    fn require_feature(
        &self,
        record: &Arc<DeviceRecord>,
        feature: DeviceFeature,
    ) -> Result<(), DriverError> {
        if self.features_of(record)?.contains(&feature) {
            Ok(())
        } else {
            Err(DriverError::NotSupported(format!("{:?}", feature)))
        }
    }

    /// 设备常量（子设备通过 `component` 查询）
    pub fn constants(
        &self,
        id: DeviceId,
        component: SystemComponent,
    ) -> Result<Arc<ConstRoot>, DriverError> {
        let record = self.record(id)?;
        self.capability(&record, component, CapabilityKind::Constants)?
            .into_constants()
            .ok_or_else(|| DriverError::NoInformation("device constants".to_string()))
    }

    /// 标记设备描述数据过期（如设备报告设置已改变）
    ///
    /// 后台模式下同时重新开始后台获取。
    pub fn invalidate_capabilities(&self, id: DeviceId) -> Result<(), DriverError> {
        self.record(id)?;
        self.core.cache.invalidate(id);
        if self.core.background_mode() {
            self.core.refresh_device(id);
        }
        Ok(())
    }

    // ==================== 忙碌灯 ====================

    pub fn busylight_supported(&self, id: DeviceId) -> Result<bool, DriverError> {
        self.is_feature_supported(id, DeviceFeature::BusyLight)
    }

    pub fn busylight(&self, id: DeviceId) -> Result<bool, DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::BusyLight)?;
        self.read_flag(id, DeviceQuery::Busylight)
    }

    pub fn set_busylight(&self, id: DeviceId, on: bool) -> Result<(), DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::BusyLight)?;
        self.write(id, &DeviceCommand::SetBusylight(on))
    }

    pub fn manual_busylight(&self, id: DeviceId) -> Result<bool, DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::ManualBusyLight)?;
        self.read_flag(id, DeviceQuery::ManualBusylight)
    }

    /// 返回设置后的状态
    pub fn set_manual_busylight(
        &self,
        id: DeviceId,
        value: BusyLightValue,
    ) -> Result<bool, DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::ManualBusyLight)?;
        let target = match value {
            BusyLightValue::Toggle => {
                value.resolve(self.read_flag(id, DeviceQuery::ManualBusylight)?)
            },
            _ => value.resolve(false),
        };
        self.write(id, &DeviceCommand::SetManualBusylight(target))?;
        Ok(target)
    }

    // ==================== 电池 ====================

    /// 最近一次上报的电池状态；没有上报过时向设备读取
    pub fn battery(&self, id: DeviceId) -> Result<BatteryStatus, DriverError> {
        let record = self.record(id)?;
        if let Some(battery) = record.with(|inner| inner.battery.clone()) {
            return Ok(battery);
        }
        let battery = self
            .read(id, DeviceQuery::Battery)?
            .into_battery()
            .ok_or_else(|| unexpected_reading(DeviceQuery::Battery))?;
        record.with(|inner| {
            if !inner.session.is_detached() {
                inner.battery = Some(battery.clone());
            }
        });
        Ok(battery)
    }

    // ==================== 均衡器 ====================

    pub fn equalizer_supported(&self, id: DeviceId) -> Result<bool, DriverError> {
        self.is_feature_supported(id, DeviceFeature::MusicEqualizer)
    }

    pub fn equalizer_enabled(&self, id: DeviceId) -> Result<bool, DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::MusicEqualizer)?;
        self.read_flag(id, DeviceQuery::EqualizerEnabled)
    }

    pub fn enable_equalizer(&self, id: DeviceId, enable: bool) -> Result<(), DriverError> {
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::MusicEqualizer)?;
        self.write(id, &DeviceCommand::EnableEqualizer(enable))
    }

    /// 读取均衡器频段，最多返回 `capacity` 个（超出时置 `truncated`）
    pub fn equalizer_parameters(
        &self,
        id: DeviceId,
        capacity: usize,
    ) -> Result<EqualizerReading, DriverError> {
        if capacity == 0 {
            return Err(DriverError::Parameter("capacity must be > 0".to_string()));
        }
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::MusicEqualizer)?;
        let bands = self.equalizer_bands(id)?;
        Ok(EqualizerReading::bounded(bands, capacity))
    }

    fn equalizer_bands(&self, id: DeviceId) -> Result<Vec<EqualizerBand>, DriverError> {
        self.read(id, DeviceQuery::EqualizerBands)?
            .into_bands()
            .ok_or_else(|| unexpected_reading(DeviceQuery::EqualizerBands))
    }

    /// 设置各频段增益；数量与设备频段数一致，且每个增益都在该频段允许范围内
    pub fn set_equalizer_parameters(&self, id: DeviceId, gains: &[f32]) -> Result<(), DriverError> {
        if gains.is_empty() {
            return Err(DriverError::Parameter("no gains given".to_string()));
        }
        let record = self.record(id)?;
        self.require_feature(&record, DeviceFeature::MusicEqualizer)?;
        let bands = self.equalizer_bands(id)?;
        if bands.len() != gains.len() {
            return Err(DriverError::Parameter(format!(
                "expected {} gains, got {}",
                bands.len(),
                gains.len()
            )));
        }
        if let Some((band, gain)) = bands
            .iter()
            .zip(gains)
            .find(|(band, gain)| !band.accepts(**gain))
        {
            return Err(DriverError::Parameter(format!(
                "gain {} dB out of range ±{} dB at {} Hz",
                gain, band.max_gain, band.center_frequency
            )));
        }
        self.write(id, &DeviceCommand::SetEqualizerGains(gains.to_vec()))
    }

    // ==================== 固件 ====================

    pub fn latest_firmware(&self, id: DeviceId) -> Result<FirmwareInfo, DriverError> {
        let record = self.record(id)?;
        self.capability(&record, SystemComponent::PrimaryHeadset, CapabilityKind::LatestFirmware)?
            .into_firmware()
            .ok_or_else(|| DriverError::NoInformation("firmware information".to_string()))
    }

    /// 比较设备固件版本与云端最新版本
    pub fn check_firmware_update(&self, id: DeviceId) -> Result<FirmwareCheck, DriverError> {
        let record = self.record(id)?;
        let current = match record.identity().firmware_version.clone() {
            Some(version) => version,
            None => self
                .read(id, DeviceQuery::FirmwareVersion)?
                .into_version()
                .ok_or_else(|| unexpected_reading(DeviceQuery::FirmwareVersion))?,
        };
        let current = FirmwareVersion::parse(&current)
            .map_err(|e| DriverError::NoInformation(e.to_string()))?;
        let latest_info = self.latest_firmware(id)?;
        let latest = FirmwareVersion::parse(&latest_info.version)
            .map_err(|e| DriverError::NoInformation(e.to_string()))?;

        debug!("Device {}: firmware {} (latest {})", id, current, latest);
        if latest > current {
            Ok(FirmwareCheck::Available(latest_info))
        } else {
            Ok(FirmwareCheck::UpToDate)
        }
    }

    /// 后台下载固件，进度通过 FirmwareProgress 事件上报
    pub fn download_firmware(&self, id: DeviceId, version: &str) -> Result<(), DriverError> {
        if version.trim().is_empty() {
            return Err(DriverError::Parameter("empty firmware version".to_string()));
        }
        let record = self.record(id)?;
        self.ensure_ready(&record)?;
        self.core.runner.start(
            &record,
            OperationKind::FirmwareDownload,
            Job::DownloadFirmware {
                version: version.to_string(),
            },
        )
    }

    pub fn update_firmware(&self, id: DeviceId, file: &Path) -> Result<(), DriverError> {
        let record = self.record(id)?;
        require_file(file)?;
        self.ensure_ready(&record)?;
        self.core.runner.start(
            &record,
            OperationKind::FirmwareUpdate,
            Job::UpdateFirmware {
                file: file.to_path_buf(),
            },
        )
    }

    pub fn cancel_firmware_download(&self, id: DeviceId) -> Result<(), DriverError> {
        let record = self.record(id)?;
        self.core
            .runner
            .cancel(&record, Some(OperationKind::FirmwareDownload))
    }

    /// 取消设备上正在执行的任意可取消操作
    pub fn cancel_operation(&self, id: DeviceId) -> Result<(), DriverError> {
        let record = self.record(id)?;
        self.core.runner.cancel(&record, None)
    }

    pub fn firmware_lock_enabled(&self, id: DeviceId) -> Result<bool, DriverError> {
        self.record(id)?;
        self.read_flag(id, DeviceQuery::FirmwareLock)
    }

    pub fn enable_firmware_lock(&self, id: DeviceId, enable: bool) -> Result<(), DriverError> {
        self.record(id)?;
        self.write(id, &DeviceCommand::EnableFirmwareLock(enable))
    }

    // ==================== 上传 / 重启 ====================

    pub fn upload_ringtone(&self, id: DeviceId, file: &Path) -> Result<(), DriverError> {
        self.upload(id, file, OperationKind::RingtoneUpload, DeviceFeature::RingtoneUpload)
    }

    pub fn upload_image(&self, id: DeviceId, file: &Path) -> Result<(), DriverError> {
        self.upload(id, file, OperationKind::ImageUpload, DeviceFeature::ImageUpload)
    }

    fn upload(
        &self,
        id: DeviceId,
        file: &Path,
        kind: OperationKind,
        feature: DeviceFeature,
    ) -> Result<(), DriverError> {
        let record = self.record(id)?;
        require_file(file)?;
        self.require_feature(&record, feature)?;
        self.core.runner.start(
            &record,
            kind,
            Job::Upload {
                file: file.to_path_buf(),
            },
        )
    }

    /// 同步重启（期间设备处于 Busy）
    pub fn reboot(&self, id: DeviceId) -> Result<(), DriverError> {
        let record = self.record(id)?;
        self.ensure_ready(&record)?;
        self.core
            .runner
            .run_blocking(&record, OperationKind::Reboot, || {
                self.write(id, &DeviceCommand::Reboot)
            })
    }

    // ==================== 生命周期 ====================

    /// 停止传输层上报、强制 detach 所有设备并排空分发器。幂等
    ///
    /// 被中断的操作先收到 `Cancelled`，每个设备随后收到 `DeviceRemoved`；
    /// 返回后不会再有任何回调被调用。
    pub fn shutdown(&self) {
        self.core.shutdown();
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.core.shutdown();
    }
}

fn require_file(file: &Path) -> Result<(), DriverError> {
    if file.is_file() {
        Ok(())
    } else {
        Err(DriverError::FileNotAccessible(file.to_path_buf()))
    }
}

/// 后台刷新失败时记录的状态对应的错误
fn background_failure(status: ErrorStatus) -> Option<DriverError> {
    match status {
        ErrorStatus::NoError => None,
        ErrorStatus::NetworkError => Some(DriverError::Network(
            "background data fetch failed".to_string(),
        )),
        other => Some(DriverError::NoInformation(format!(
            "background data fetch failed: {:?}",
            other
        ))),
    }
}

fn unexpected_reading(query: DeviceQuery) -> DriverError {
    DriverError::ReadFail(TransportError::Device(TransportDeviceError::new(
        TransportDeviceErrorKind::InvalidResponse,
        format!("unexpected reading for {:?}", query),
    )))
}
