//! 长时间独占操作（固件下载 / 固件更新 / 铃声与图片上传 / 重启）
//!
//! 每个操作在自己的线程上运行，设备会话处于 Busy 期间：
//!
//! - 进度事件与终止事件都在设备记录锁内发布；设备 detach 之后不会再有任何事件
//! - 终止状态只会被设置一次（`Running -> Completed | Cancelled | Failed`），
//!   取消与自然完成竞争时先到者生效，已送达的 `Completed` 不会被 `Cancelled` 覆盖
//! - 取消立即发布 `Cancelled`；工作线程退出后会话才回到 Ready / Locked

use crate::cache::CapabilityCache;
use crate::dispatcher::Dispatcher;
use crate::error::DriverError;
use crate::metrics::RegistryMetrics;
use crate::store::DeviceRecord;
use headset_protocol::{
    DeviceId, DeviceIdentity, EventPayload, FirmwareEventStatus, FirmwareEventType,
    UploadEventStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    FirmwareDownload,
    FirmwareUpdate,
    RingtoneUpload,
    ImageUpload,
    Reboot,
}

impl OperationKind {
    pub fn is_upload(self) -> bool {
        matches!(self, OperationKind::RingtoneUpload | OperationKind::ImageUpload)
    }

    /// 是否支持取消（重启是同步的，不能取消）
    pub fn is_cancellable(self) -> bool {
        self != OperationKind::Reboot
    }

    fn firmware_event_type(self) -> Option<FirmwareEventType> {
        match self {
            OperationKind::FirmwareDownload => Some(FirmwareEventType::Download),
            OperationKind::FirmwareUpdate => Some(FirmwareEventType::Update),
            _ => None,
        }
    }
}

/// 操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum OperationStatus {
    #[default]
    Running = 0,
    Completed = 1,
    Cancelled = 2,
    Failed = 3,
}

impl OperationStatus {
    /// 无效值按 Failed 处理
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Completed,
            2 => Self::Cancelled,
            _ => Self::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

/// 固件引擎返回的失败原因
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Operation cancelled")]
    Cancelled,
    #[error("File not available: {0}")]
    FileNotAvailable(String),
    #[error("File not accessible: {}", .0.display())]
    FileNotAccessible(PathBuf),
    #[error("File already present")]
    FileAlreadyPresent,
    #[error("Network error: {0}")]
    Network(String),
    #[error("SSL error: {0}")]
    Ssl(String),
    #[error("Invalid authentication")]
    Authentication,
    #[error("Device rejected transfer: {0}")]
    Device(String),
    #[error("Not allowed: {0}")]
    NotAllowed(String),
    #[error("Firmware requires a newer SDK")]
    SdkTooOld,
}

impl EngineError {
    fn firmware_status(&self, event_type: FirmwareEventType) -> FirmwareEventStatus {
        match self {
            EngineError::Cancelled => FirmwareEventStatus::Cancelled,
            EngineError::FileNotAvailable(_) => FirmwareEventStatus::FileNotAvailable,
            EngineError::FileNotAccessible(_) => FirmwareEventStatus::FileNotAccessible,
            EngineError::FileAlreadyPresent => FirmwareEventStatus::FileAlreadyPresent,
            EngineError::Network(_) => FirmwareEventStatus::NetworkError,
            EngineError::Ssl(_) => FirmwareEventStatus::SslError,
            EngineError::Authentication => FirmwareEventStatus::InvalidAuthentication,
            EngineError::NotAllowed(_) => FirmwareEventStatus::NotAllowed,
            EngineError::SdkTooOld => FirmwareEventStatus::SdkTooOldForUpdate,
            EngineError::Device(_) => match event_type {
                FirmwareEventType::Download => FirmwareEventStatus::DownloadError,
                FirmwareEventType::Update => FirmwareEventStatus::UpdateError,
            },
        }
    }

    fn upload_status(&self) -> UploadEventStatus {
        match self {
            EngineError::Cancelled => UploadEventStatus::Cancelled,
            _ => UploadEventStatus::Error,
        }
    }
}

/// 执行固件下载 / 刷写 / 文件上传的协作方
///
/// 实现应定期调用 [`OperationContext::report_progress`] 并检查
/// [`OperationContext::is_cancelled`]。
pub trait FirmwareEngine: Send + Sync {
    fn download_firmware(
        &self,
        identity: &DeviceIdentity,
        version: &str,
        ctx: &OperationContext,
    ) -> Result<(), EngineError>;

    fn update_firmware(
        &self,
        identity: &DeviceIdentity,
        file: &Path,
        ctx: &OperationContext,
    ) -> Result<(), EngineError>;

    fn upload_file(
        &self,
        identity: &DeviceIdentity,
        kind: OperationKind,
        file: &Path,
        ctx: &OperationContext,
    ) -> Result<(), EngineError>;
}

/// 未配置固件引擎时使用：所有操作都以 NotAllowed 失败
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEngine;

impl FirmwareEngine for NullEngine {
    fn download_firmware(
        &self,
        _identity: &DeviceIdentity,
        _version: &str,
        _ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        Err(EngineError::NotAllowed("no firmware engine configured".to_string()))
    }

    fn update_firmware(
        &self,
        _identity: &DeviceIdentity,
        _file: &Path,
        _ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        Err(EngineError::NotAllowed("no firmware engine configured".to_string()))
    }

    fn upload_file(
        &self,
        _identity: &DeviceIdentity,
        _kind: OperationKind,
        _file: &Path,
        _ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        Err(EngineError::NotAllowed("no firmware engine configured".to_string()))
    }
}

/// 正在执行的操作（由会话的 Busy 阶段持有）
#[derive(Debug)]
pub(crate) struct RunningOperation {
    kind: OperationKind,
    status: AtomicU8,
    cancel: AtomicBool,
}

impl RunningOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            status: AtomicU8::new(OperationStatus::Running as u8),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn status(&self) -> OperationStatus {
        OperationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// `Running -> to`，只成功一次
    fn finish(&self, to: OperationStatus) -> bool {
        self.status
            .compare_exchange(
                OperationStatus::Running as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// 传给固件引擎的上下文
pub struct OperationContext {
    device: DeviceId,
    kind: OperationKind,
    record: Arc<DeviceRecord>,
    operation: Arc<RunningOperation>,
    dispatcher: Arc<Dispatcher>,
}

impl OperationContext {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// 调用方请求了取消，或设备已经移除
    pub fn is_cancelled(&self) -> bool {
        self.operation.is_cancel_requested() || self.operation.status().is_terminal()
    }

    /// 上报进度（百分比，超过 100 按 100 处理）；操作结束后调用无效果
    pub fn report_progress(&self, percentage: u16) {
        let percentage = percentage.min(100);
        emit(
            &self.dispatcher,
            &self.record,
            &self.operation,
            None,
            Progress::Running(percentage),
        );
    }
}

/// 要执行的工作
#[derive(Debug, Clone)]
pub(crate) enum Job {
    DownloadFirmware { version: String },
    UpdateFirmware { file: PathBuf },
    Upload { file: PathBuf },
}

enum Progress<'a> {
    Initiating,
    Running(u16),
    Completed,
    Cancelled,
    Failed(&'a EngineError),
}

fn payload_for(kind: OperationKind, progress: &Progress<'_>) -> Option<EventPayload> {
    if let Some(event_type) = kind.firmware_event_type() {
        let (status, percentage) = match progress {
            Progress::Initiating => (FirmwareEventStatus::Initiating, 0),
            Progress::Running(p) => (FirmwareEventStatus::InProgress, *p),
            Progress::Completed => (FirmwareEventStatus::Completed, 100),
            Progress::Cancelled => (FirmwareEventStatus::Cancelled, 0),
            Progress::Failed(e) => (e.firmware_status(event_type), 0),
        };
        return Some(EventPayload::FirmwareProgress {
            event_type,
            status,
            percentage,
        });
    }
    if kind.is_upload() {
        let (status, percentage) = match progress {
            Progress::Initiating => (UploadEventStatus::InProgress, 0),
            Progress::Running(p) => (UploadEventStatus::InProgress, *p),
            Progress::Completed => (UploadEventStatus::Completed, 100),
            Progress::Cancelled => (UploadEventStatus::Cancelled, 0),
            Progress::Failed(e) => (e.upload_status(), 0),
        };
        return Some(EventPayload::UploadProgress { status, percentage });
    }
    None
}

/// 在记录锁内发布进度；`transition` 为终止状态时先做状态转换，失败则不发布
fn emit(
    dispatcher: &Dispatcher,
    record: &DeviceRecord,
    operation: &RunningOperation,
    transition: Option<OperationStatus>,
    progress: Progress<'_>,
) -> bool {
    record.with(|inner| {
        if inner.session.is_detached() {
            return false;
        }
        let allowed = match transition {
            Some(to) => operation.finish(to),
            None => operation.status() == OperationStatus::Running,
        };
        if allowed && let Some(payload) = payload_for(operation.kind(), &progress) {
            dispatcher.publish(Some(record.id()), payload);
        }
        allowed
    })
}

/// 操作执行器
pub(crate) struct OperationRunner {
    dispatcher: Arc<Dispatcher>,
    engine: Arc<dyn FirmwareEngine>,
    cache: Arc<CapabilityCache>,
    metrics: Arc<RegistryMetrics>,
}

impl OperationRunner {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        engine: Arc<dyn FirmwareEngine>,
        cache: Arc<CapabilityCache>,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            cache,
            metrics,
        }
    }

    /// 进入 Busy 并在后台线程执行 `job`
    pub fn start(
        &self,
        record: &Arc<DeviceRecord>,
        kind: OperationKind,
        job: Job,
    ) -> Result<(), DriverError> {
        let device = record.id();
        let operation = Arc::new(RunningOperation::new(kind));
        record.with(|inner| inner.session.begin_busy(device, operation.clone()))?;
        RegistryMetrics::incr(&self.metrics.operations_started);
        info!("Device {}: {:?} started", device, kind);
        emit(&self.dispatcher, record, &operation, None, Progress::Initiating);

        let ctx = OperationContext {
            device,
            kind,
            record: record.clone(),
            operation: operation.clone(),
            dispatcher: self.dispatcher.clone(),
        };
        let engine = self.engine.clone();
        let cache = self.cache.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("headset-op-{}", device))
            .spawn(move || {
                let identity = ctx.record.identity().clone();
                let result = match &job {
                    Job::DownloadFirmware { version } => {
                        engine.download_firmware(&identity, version, &ctx)
                    },
                    Job::UpdateFirmware { file } => engine.update_firmware(&identity, file, &ctx),
                    Job::Upload { file } => engine.upload_file(&identity, kind, file, &ctx),
                };
                complete(&ctx, &cache, result);
            });

        if let Err(e) = spawned {
            let reason = EngineError::Device(e.to_string());
            emit(
                &self.dispatcher,
                record,
                &operation,
                Some(OperationStatus::Failed),
                Progress::Failed(&reason),
            );
            record.with(|inner| inner.session.end_busy(&operation));
            return Err(DriverError::Thread(e.to_string()));
        }
        Ok(())
    }

    /// 在调用线程上同步执行一个独占操作（如重启）
    pub fn run_blocking<T>(
        &self,
        record: &Arc<DeviceRecord>,
        kind: OperationKind,
        f: impl FnOnce() -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let device = record.id();
        let operation = Arc::new(RunningOperation::new(kind));
        record.with(|inner| inner.session.begin_busy(device, operation.clone()))?;
        RegistryMetrics::incr(&self.metrics.operations_started);
        let result = f();
        operation.finish(if result.is_ok() {
            OperationStatus::Completed
        } else {
            OperationStatus::Failed
        });
        record.with(|inner| inner.session.end_busy(&operation));
        info!("Device {}: {:?} finished ({})", device, kind, result.is_ok());
        result
    }

    /// 取消设备上正在执行的操作
    ///
    /// `only` 非空时只取消该类型的操作。操作已经完成时是无效果的成功。
    pub fn cancel(
        &self,
        record: &Arc<DeviceRecord>,
        only: Option<OperationKind>,
    ) -> Result<(), DriverError> {
        let device = record.id();
        let operation = record
            .with(|inner| inner.session.running_operation().cloned())
            .ok_or(DriverError::NoOperation(device))?;
        if only.is_some_and(|k| k != operation.kind()) {
            return Err(DriverError::NoOperation(device));
        }
        if !operation.kind().is_cancellable() {
            return Err(DriverError::BadState {
                device,
                reason: format!("{:?} cannot be cancelled", operation.kind()),
            });
        }

        operation.request_cancel();
        if emit(
            &self.dispatcher,
            record,
            &operation,
            Some(OperationStatus::Cancelled),
            Progress::Cancelled,
        ) {
            RegistryMetrics::incr(&self.metrics.operations_cancelled);
            info!("Device {}: {:?} cancelled", device, operation.kind());
        }
        Ok(())
    }

    /// detach 时中断操作：发布 `Cancelled`（设备已从存储中摘除，此后工作线程不会再发布事件）
    pub fn abort_for_detach(&self, device: DeviceId, operation: &RunningOperation) {
        operation.request_cancel();
        if operation.finish(OperationStatus::Cancelled) {
            RegistryMetrics::incr(&self.metrics.operations_cancelled);
            if let Some(payload) = payload_for(operation.kind(), &Progress::Cancelled) {
                self.dispatcher.publish(Some(device), payload);
            }
            warn!("Device {} detached during {:?}", device, operation.kind());
        }
    }
}

fn complete(ctx: &OperationContext, cache: &CapabilityCache, result: Result<(), EngineError>) {
    let device = ctx.device;
    let (transition, progress) = match &result {
        Ok(()) => (OperationStatus::Completed, Progress::Completed),
        Err(EngineError::Cancelled) => (OperationStatus::Cancelled, Progress::Cancelled),
        Err(e) => (OperationStatus::Failed, Progress::Failed(e)),
    };
    let delivered = emit(
        &ctx.dispatcher,
        &ctx.record,
        &ctx.operation,
        Some(transition),
        progress,
    );
    match &result {
        Ok(()) => info!("Device {}: {:?} completed", device, ctx.kind),
        Err(e) => warn!("Device {}: {:?} ended with {}", device, ctx.kind, e),
    }
    if delivered && result.is_ok() && ctx.kind == OperationKind::FirmwareUpdate {
        cache.invalidate(device);
    }
    ctx.record
        .with(|inner| inner.session.end_busy(&ctx.operation));
}
