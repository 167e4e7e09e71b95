//! 集成测试共用的协作方实现
#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender, unbounded};
use headset_driver::{
    CapabilityKind, CapabilityProvider, CapabilityValue, EngineError, EventListener, FetchError,
    FirmwareEngine, OperationContext, OperationKind, Registry, RegistryBuilder,
};
use headset_protocol::{
    DeviceEvent, DeviceFeature, DeviceIdentity, EventKind, FirmwareInfo, SdkConfig,
    SystemComponent,
};
use headset_transport::MockTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const VENDOR: u16 = 0x0B0E;
pub const EVOLVE: u16 = 0x24B8;
pub const SPEAK: u16 = 0x0420;

pub fn headset(path: &str) -> DeviceIdentity {
    DeviceIdentity::new(VENDOR, EVOLVE, "Evolve2 65")
        .with_path(path)
        .with_serial(path)
}

pub fn speakerphone(path: &str) -> DeviceIdentity {
    DeviceIdentity::new(VENDOR, SPEAK, "Speak 750")
        .with_path(path)
        .with_serial(path)
}

pub fn all_features() -> Vec<DeviceFeature> {
    vec![
        DeviceFeature::BusyLight,
        DeviceFeature::MusicEqualizer,
        DeviceFeature::RingtoneUpload,
        DeviceFeature::ImageUpload,
        DeviceFeature::ManualBusyLight,
    ]
}

/// 内存中的能力数据来源
pub struct TableProvider {
    features: Mutex<HashMap<u16, Vec<DeviceFeature>>>,
    firmware: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    pub delay: Duration,
    failure: Mutex<Option<FetchError>>,
}

impl TableProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            features: Mutex::new(HashMap::new()),
            firmware: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay,
            failure: Mutex::new(None),
        })
    }

    pub fn with_product(self: Arc<Self>, product_id: u16, features: Vec<DeviceFeature>) -> Arc<Self> {
        self.features.lock().insert(product_id, features);
        self
    }

    pub fn set_latest_firmware(&self, version: &str) {
        *self.firmware.lock() = Some(version.to_string());
    }

    pub fn fail_with(&self, error: Option<FetchError>) {
        *self.failure.lock() = error;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CapabilityProvider for TableProvider {
    fn fetch(
        &self,
        identity: &DeviceIdentity,
        _component: SystemComponent,
        kind: CapabilityKind,
    ) -> Result<CapabilityValue, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        if let Some(e) = self.failure.lock().clone() {
            return Err(e);
        }
        match kind {
            CapabilityKind::Features => self
                .features
                .lock()
                .get(&identity.product_id)
                .cloned()
                .map(CapabilityValue::Features)
                .ok_or_else(|| FetchError::NotFound("unknown product".into())),
            CapabilityKind::Constants => Err(FetchError::NotFound("no constants".into())),
            CapabilityKind::LatestFirmware => self
                .firmware
                .lock()
                .clone()
                .map(|version| {
                    CapabilityValue::Firmware(FirmwareInfo {
                        version,
                        ..Default::default()
                    })
                })
                .ok_or_else(|| FetchError::NotFound("no firmware".into())),
        }
    }

    fn requires_network(&self, kind: CapabilityKind) -> bool {
        kind == CapabilityKind::LatestFirmware
    }
}

/// 按步骤上报进度的固件引擎；`hold` 打开时在每步之间等待，直到被取消或放行
pub struct SteppedEngine {
    pub steps: u16,
    pub step_delay: Duration,
    pub calls: Mutex<Vec<OperationKind>>,
    gate: Mutex<bool>,
}

impl SteppedEngine {
    pub fn new(steps: u16, step_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            steps,
            step_delay,
            calls: Mutex::new(Vec::new()),
            gate: Mutex::new(false),
        })
    }

    /// 让引擎停在第一步，直到 `release` 或取消
    pub fn hold(&self) {
        *self.gate.lock() = true;
    }

    pub fn release(&self) {
        *self.gate.lock() = false;
    }

    fn run(&self, kind: OperationKind, ctx: &OperationContext) -> Result<(), EngineError> {
        self.calls.lock().push(kind);
        for step in 1..=self.steps {
            while *self.gate.lock() {
                if ctx.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                thread::sleep(Duration::from_millis(5));
            }
            if ctx.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            thread::sleep(self.step_delay);
            ctx.report_progress(step * 100 / self.steps);
        }
        Ok(())
    }
}

impl FirmwareEngine for SteppedEngine {
    fn download_firmware(
        &self,
        _identity: &DeviceIdentity,
        version: &str,
        ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        if version == "missing" {
            return Err(EngineError::FileNotAvailable(version.to_string()));
        }
        self.run(OperationKind::FirmwareDownload, ctx)
    }

    fn update_firmware(
        &self,
        _identity: &DeviceIdentity,
        _file: &Path,
        ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        self.run(OperationKind::FirmwareUpdate, ctx)
    }

    fn upload_file(
        &self,
        _identity: &DeviceIdentity,
        kind: OperationKind,
        _file: &Path,
        ctx: &OperationContext,
    ) -> Result<(), EngineError> {
        self.run(kind, ctx)
    }
}

/// 把收到的事件转发到 channel
pub struct EventLog {
    tx: Sender<DeviceEvent>,
    pub rx: Receiver<DeviceEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn listener(&self) -> Arc<dyn EventListener> {
        let tx = self.tx.clone();
        Arc::new(move |event: &DeviceEvent| {
            let _ = tx.send(event.clone());
        })
    }

    /// 等待第一个满足条件的事件
    pub fn wait_for(
        &self,
        timeout: Duration,
        predicate: impl Fn(&DeviceEvent) -> bool,
    ) -> Option<DeviceEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn wait_kind(&self, kind: EventKind, timeout: Duration) -> Option<DeviceEvent> {
        self.wait_for(timeout, |e| e.kind() == kind)
    }

    /// 在 `quiet` 时间内收到的所有事件
    pub fn drain(&self, quiet: Duration) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.recv_timeout(quiet) {
            events.push(event);
        }
        events
    }
}

/// 一个完整装配的注册表：Evolve 型号预置在目录中，Speak 型号只能向数据来源获取
pub struct Fixture {
    pub registry: Registry,
    pub transport: Arc<MockTransport>,
    pub provider: Arc<TableProvider>,
    pub engine: Arc<SteppedEngine>,
}

pub fn fixture(config: SdkConfig) -> Fixture {
    fixture_with_delay(config, Duration::from_millis(20))
}

pub fn fixture_with_delay(config: SdkConfig, fetch_delay: Duration) -> Fixture {
    let transport = Arc::new(MockTransport::new());
    let provider = TableProvider::new(fetch_delay)
        .with_product(SPEAK, vec![DeviceFeature::BusyLight, DeviceFeature::RingtoneUpload]);
    let engine = SteppedEngine::new(4, Duration::from_millis(10));
    let registry = RegistryBuilder::new()
        .config(config)
        .transport(transport.clone())
        .capability_provider(provider.clone())
        .firmware_engine(engine.clone())
        .known_product(headset("catalogue"), all_features())
        .build()
        .unwrap();
    Fixture {
        registry,
        transport,
        provider,
        engine,
    }
}

/// 非空的临时文件（上传 / 刷写的输入）
pub fn payload_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"RIFF\0\0\0\0WAVEfmt ").unwrap();
    file
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
