//! 内存中的传输实现（无硬件依赖）
//!
//! 测试通过 [`MockTransport::plug`] / [`MockTransport::unplug`] 模拟设备插拔，
//! 通过 `emit_*` 模拟设备上报；核心发出的写命令被记录下来供断言。

use crate::{DeviceEventSink, Transport, TransportDeviceError, TransportDeviceErrorKind, TransportError};
use bytes::Bytes;
use headset_protocol::{
    BatteryStatus, DeviceCommand, DeviceId, DeviceIdentity, DeviceQuery, DeviceReading,
    DeviceStatus, EqualizerBand,
};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// 模拟设备的可读写状态
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    pub busylight: Option<bool>,
    pub manual_busylight: Option<bool>,
    pub battery: Option<BatteryStatus>,
    pub equalizer_enabled: Option<bool>,
    pub equalizer_bands: Option<Vec<EqualizerBand>>,
    pub firmware_lock: Option<bool>,
    pub firmware_version: Option<String>,
    pub rebooted: bool,
}

impl MockDevice {
    /// 支持所有查询的设备
    pub fn full_featured() -> Self {
        Self {
            busylight: Some(false),
            manual_busylight: Some(false),
            battery: Some(BatteryStatus::new(80, false, false)),
            equalizer_enabled: Some(false),
            equalizer_bands: Some(vec![
                EqualizerBand {
                    max_gain: 6.0,
                    center_frequency: 250,
                    current_gain: 0.0,
                },
                EqualizerBand {
                    max_gain: 6.0,
                    center_frequency: 1000,
                    current_gain: 0.0,
                },
                EqualizerBand {
                    max_gain: 6.0,
                    center_frequency: 4000,
                    current_gain: 0.0,
                },
            ]),
            firmware_lock: Some(false),
            firmware_version: Some("1.0.0".to_string()),
            rebooted: false,
        }
    }

    fn apply(&mut self, command: &DeviceCommand) -> Result<(), TransportError> {
        let unsupported = || TransportError::Unsupported(command.name().to_string());
        match command {
            DeviceCommand::SetBusylight(on) => {
                *self.busylight.as_mut().ok_or_else(unsupported)? = *on;
            },
            DeviceCommand::SetManualBusylight(on) => {
                *self.manual_busylight.as_mut().ok_or_else(unsupported)? = *on;
            },
            DeviceCommand::EnableEqualizer(on) => {
                *self.equalizer_enabled.as_mut().ok_or_else(unsupported)? = *on;
            },
            DeviceCommand::SetEqualizerGains(gains) => {
                let bands = self.equalizer_bands.as_mut().ok_or_else(unsupported)?;
                if gains.len() != bands.len() {
                    return Err(TransportDeviceError::new(
                        TransportDeviceErrorKind::Nack,
                        format!("expected {} gains, got {}", bands.len(), gains.len()),
                    )
                    .into());
                }
                for (band, gain) in bands.iter_mut().zip(gains) {
                    band.current_gain = *gain;
                }
            },
            DeviceCommand::EnableFirmwareLock(on) => {
                *self.firmware_lock.as_mut().ok_or_else(unsupported)? = *on;
            },
            DeviceCommand::Reboot => self.rebooted = true,
            DeviceCommand::SetOffHook(_)
            | DeviceCommand::SetRinger(_)
            | DeviceCommand::SetMute(_)
            | DeviceCommand::SetHold(_) => {},
        }
        Ok(())
    }

    fn read(&self, query: DeviceQuery) -> Result<DeviceReading, TransportError> {
        let unsupported = || TransportError::Unsupported(format!("{:?}", query));
        Ok(match query {
            DeviceQuery::Busylight => DeviceReading::Flag(self.busylight.ok_or_else(unsupported)?),
            DeviceQuery::ManualBusylight => {
                DeviceReading::Flag(self.manual_busylight.ok_or_else(unsupported)?)
            },
            DeviceQuery::Battery => {
                DeviceReading::Battery(self.battery.clone().ok_or_else(unsupported)?)
            },
            DeviceQuery::EqualizerEnabled => {
                DeviceReading::Flag(self.equalizer_enabled.ok_or_else(unsupported)?)
            },
            DeviceQuery::EqualizerBands => {
                DeviceReading::EqualizerBands(self.equalizer_bands.clone().ok_or_else(unsupported)?)
            },
            DeviceQuery::FirmwareLock => {
                DeviceReading::Flag(self.firmware_lock.ok_or_else(unsupported)?)
            },
            DeviceQuery::FirmwareVersion => {
                DeviceReading::Version(self.firmware_version.clone().ok_or_else(unsupported)?)
            },
        })
    }
}

/// 内存传输
#[derive(Default)]
pub struct MockTransport {
    sink: RwLock<Option<Arc<dyn DeviceEventSink>>>,
    started: AtomicBool,
    devices: Mutex<HashMap<DeviceId, MockDevice>>,
    commands: Mutex<Vec<(DeviceId, DeviceCommand)>>,
    write_failure: Mutex<Option<TransportDeviceErrorKind>>,
    read_failure: Mutex<Option<TransportDeviceErrorKind>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&self) -> Option<Arc<dyn DeviceEventSink>> {
        if !self.started.load(Ordering::Acquire) {
            return None;
        }
        self.sink.read().clone()
    }

    /// 插入一个全功能设备
    pub fn plug(&self, identity: DeviceIdentity) -> Option<DeviceId> {
        self.plug_with(identity, MockDevice::full_featured())
    }

    /// 插入设备并指定其状态；返回核心分配的 ID
    pub fn plug_with(&self, identity: DeviceIdentity, device: MockDevice) -> Option<DeviceId> {
        let sink = self.sink()?;
        // 持锁上报，保证监听者收到 attach 事件后立即读写时设备已就绪
        let mut devices = self.devices.lock();
        let id = sink.attached(identity)?;
        debug!("Mock device plugged as {}", id);
        devices.insert(id, device);
        Some(id)
    }

    pub fn unplug(&self, device_id: DeviceId) {
        self.devices.lock().remove(&device_id);
        if let Some(sink) = self.sink() {
            sink.detached(device_id);
        }
    }

    pub fn emit_input(&self, device_id: DeviceId, raw: impl Into<Bytes>) {
        if let Some(sink) = self.sink() {
            sink.input(device_id, raw.into());
        }
    }

    pub fn emit_status(&self, device_id: DeviceId, status: DeviceStatus) {
        if let Some(sink) = self.sink() {
            sink.status(device_id, status);
        }
    }

    pub fn finish_scan(&self) {
        if let Some(sink) = self.sink() {
            sink.first_scan_done();
        }
    }

    /// 修改设备状态（不产生事件）
    pub fn update_device(&self, device_id: DeviceId, f: impl FnOnce(&mut MockDevice)) {
        if let Some(device) = self.devices.lock().get_mut(&device_id) {
            f(device);
        }
    }

    pub fn device(&self, device_id: DeviceId) -> Option<MockDevice> {
        self.devices.lock().get(&device_id).cloned()
    }

    /// 已发送的命令
    pub fn commands(&self) -> Vec<(DeviceId, DeviceCommand)> {
        self.commands.lock().clone()
    }

    /// 之后的写命令都以指定错误失败（`None` 恢复正常）
    pub fn fail_writes(&self, kind: Option<TransportDeviceErrorKind>) {
        *self.write_failure.lock() = kind;
    }

    pub fn fail_reads(&self, kind: Option<TransportDeviceErrorKind>) {
        *self.read_failure.lock() = kind;
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}

impl Transport for MockTransport {
    fn start(&self, sink: Arc<dyn DeviceEventSink>) -> Result<(), TransportError> {
        *self.sink.write() = Some(sink);
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
        self.sink.write().take();
    }

    fn write_command(
        &self,
        device_id: DeviceId,
        command: &DeviceCommand,
    ) -> Result<(), TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        if let Some(kind) = *self.write_failure.lock() {
            return Err(TransportDeviceError::new(kind, "injected write failure").into());
        }
        let mut devices = self.devices.lock();
        let device = devices.get_mut(&device_id).ok_or_else(|| {
            TransportDeviceError::new(TransportDeviceErrorKind::NoDevice, "device not plugged")
        })?;
        device.apply(command)?;
        self.commands.lock().push((device_id, command.clone()));
        Ok(())
    }

    fn read(&self, device_id: DeviceId, query: DeviceQuery) -> Result<DeviceReading, TransportError> {
        if !self.is_started() {
            return Err(TransportError::NotStarted);
        }
        if let Some(kind) = *self.read_failure.lock() {
            return Err(TransportDeviceError::new(kind, "injected read failure").into());
        }
        let devices = self.devices.lock();
        let device = devices.get(&device_id).ok_or_else(|| {
            TransportDeviceError::new(TransportDeviceErrorKind::NoDevice, "device not plugged")
        })?;
        device.read(query)
    }
}
