//! 注册表端到端场景测试
//!
//! 通过 MockTransport 模拟插拔与设备上报，验证：
//! 1. 设备锁在多个调用方之间的互斥
//! 2. 长时间操作的 Busy 状态、重复请求与取消
//! 3. detach 对锁、操作和事件的善后
//! 4. 状态上报、订阅掩码和命令读写路径

mod common;

use common::*;
use headset_driver::{CallerId, DriverError, FirmwareCheck, SessionState};
use headset_protocol::{
    BatteryStatus, BusyLightValue, DeviceCommand, DeviceStatus, EventKind, EventMask,
    EventPayload, FirmwareEventStatus, FirmwareEventType, HidInput, JackStatus, ReturnCode,
    SdkConfig, UploadEventStatus,
};
use headset_transport::TransportDeviceErrorKind;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(150);

#[test]
fn test_lock_contention_between_callers() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let a = CallerId::new(1);
    let b = CallerId::new(2);

    fx.registry.acquire_lock(id, a).unwrap();
    assert!(fx.registry.is_locked(id));
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Locked);

    let err = fx.registry.acquire_lock(id, b).unwrap_err();
    assert!(matches!(err, DriverError::AlreadyLocked(d) if d == id));
    assert_eq!(err.return_code(), ReturnCode::DeviceLock);

    // 非持有者释放
    let err = fx.registry.release_lock(id, b).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DeviceNotLock);

    fx.registry.release_lock(id, a).unwrap();
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Ready);
    fx.registry.acquire_lock(id, b).unwrap();

    assert_eq!(fx.registry.metrics().lock_contention, 1);
}

#[test]
fn test_telephony_commands_respect_lock() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let holder = CallerId::new(10);
    let other = CallerId::new(11);

    // 未锁定时任何调用方都可以发送
    fx.registry
        .send_command(id, other, &DeviceCommand::SetMute(true))
        .unwrap();

    fx.registry.acquire_lock(id, holder).unwrap();
    let err = fx
        .registry
        .send_command(id, other, &DeviceCommand::SetOffHook(true))
        .unwrap_err();
    assert!(matches!(err, DriverError::AlreadyLocked(_)));
    fx.registry
        .send_command(id, holder, &DeviceCommand::SetOffHook(true))
        .unwrap();
    // 非通话命令不受锁限制
    fx.registry
        .send_command(id, other, &DeviceCommand::SetBusylight(true))
        .unwrap();

    let sent: Vec<_> = fx.transport.commands().into_iter().map(|(_, c)| c).collect();
    assert_eq!(
        sent,
        vec![
            DeviceCommand::SetMute(true),
            DeviceCommand::SetOffHook(true),
            DeviceCommand::SetBusylight(true),
        ]
    );
}

#[test]
fn test_upload_busy_then_cancel() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .subscribe(EventMask::empty().with(EventKind::UploadProgress), Some(id), log.listener())
        .unwrap();
    let file = payload_file();

    fx.engine.hold();
    fx.registry.upload_ringtone(id, file.path()).unwrap();
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Busy);

    let err = fx.registry.upload_image(id, file.path()).unwrap_err();
    assert!(matches!(err, DriverError::Busy { device, .. } if device == id));
    assert_eq!(err.return_code(), ReturnCode::UploadAlreadyInProgress);

    let initiating = log.wait_kind(EventKind::UploadProgress, WAIT).unwrap();
    assert_eq!(
        initiating.payload,
        EventPayload::UploadProgress {
            status: UploadEventStatus::InProgress,
            percentage: 0
        }
    );

    fx.registry.cancel_operation(id).unwrap();
    let cancelled = log
        .wait_for(WAIT, |e| {
            matches!(
                e.payload,
                EventPayload::UploadProgress {
                    status: UploadEventStatus::Cancelled,
                    ..
                }
            )
        })
        .unwrap();
    assert_eq!(cancelled.device_id, Some(id));

    assert!(wait_until(WAIT, || {
        fx.registry.session_state(id).ok() == Some(SessionState::Ready)
    }));
    // 终止事件只出现一次，取消之后没有进度
    assert!(log.drain(QUIET).is_empty());
    assert_eq!(fx.registry.metrics().operations_cancelled, 1);
}

#[test]
fn test_upload_completes_with_progress() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .set_device_listener(id, EventKind::UploadProgress, log.listener())
        .unwrap();
    let file = payload_file();

    fx.registry.upload_image(id, file.path()).unwrap();
    log.wait_for(WAIT, |e| {
        matches!(
            e.payload,
            EventPayload::UploadProgress {
                status: UploadEventStatus::Completed,
                percentage: 100
            }
        )
    })
    .unwrap();
    assert!(wait_until(WAIT, || {
        fx.registry.session_state(id).ok() == Some(SessionState::Ready)
    }));
}

#[test]
fn test_upload_rejects_missing_file_and_unsupported_feature() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(speakerphone("usb-9")).unwrap();

    let err = fx
        .registry
        .upload_ringtone(id, std::path::Path::new("/nonexistent/ring.wav"))
        .unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::FileNotAccessible);

    // Speak 型号只支持铃声上传
    let file = payload_file();
    let err = fx.registry.upload_image(id, file.path()).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::NotSupported);
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Ready);
}

#[test]
fn test_detach_while_locked() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let a = CallerId::new(1);
    fx.registry.acquire_lock(id, a).unwrap();

    fx.transport.unplug(id);

    let err = fx.registry.acquire_lock(id, a).unwrap_err();
    assert!(matches!(err, DriverError::DeviceUnknown(d) if d == id));
    assert_eq!(err.return_code(), ReturnCode::DeviceUnknown);
    assert!(!fx.registry.is_locked(id));
    assert!(fx.registry.session_state(id).is_err());
    assert!(fx.registry.devices().is_empty());
}

#[test]
fn test_detach_during_upload_cancels_then_removes() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .subscribe(EventMask::all(), None, log.listener())
        .unwrap();
    let file = payload_file();

    fx.engine.hold();
    fx.registry.upload_ringtone(id, file.path()).unwrap();
    fx.transport.unplug(id);
    fx.engine.release();

    let cancelled = log
        .wait_for(WAIT, |e| {
            matches!(
                e.payload,
                EventPayload::UploadProgress {
                    status: UploadEventStatus::Cancelled,
                    ..
                }
            )
        })
        .unwrap();
    let removed = log.wait_kind(EventKind::DeviceRemoved, WAIT).unwrap();
    assert!(cancelled.sequence < removed.sequence);
    assert_eq!(removed.device_id, Some(id));

    // 工作线程退出后也不会再有该设备的事件
    let late: Vec<_> = log
        .drain(QUIET)
        .into_iter()
        .filter(|e| e.device_id == Some(id))
        .collect();
    assert!(late.is_empty(), "events after removal: {:?}", late);
}

#[test]
fn test_attach_and_remove_events() {
    let fx = fixture(SdkConfig::default());
    let log = EventLog::new();
    fx.registry.set_global_listener(EventKind::DeviceAttached, log.listener());
    fx.registry.set_global_listener(EventKind::DeviceRemoved, log.listener());
    fx.registry.set_global_listener(EventKind::FirstScanDone, log.listener());

    let id = fx.transport.plug(headset("usb-1")).unwrap();
    fx.transport.finish_scan();

    let attached = log.wait_kind(EventKind::DeviceAttached, WAIT).unwrap();
    match attached.payload {
        EventPayload::DeviceAttached(info) => {
            assert_eq!(info.device_id, id);
            assert_eq!(info.device_name(), "Evolve2 65");
        },
        other => panic!("unexpected payload {:?}", other),
    }
    let scan = log.wait_kind(EventKind::FirstScanDone, WAIT).unwrap();
    assert_eq!(scan.device_id, None);

    fx.transport.unplug(id);
    let removed = log.wait_kind(EventKind::DeviceRemoved, WAIT).unwrap();
    assert_eq!(removed.device_id, Some(id));
}

#[test]
fn test_status_reports_follow_subscription_mask() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .subscribe(
            EventMask::empty()
                .with(EventKind::Battery)
                .with(EventKind::Jack)
                .with(EventKind::RawHidInput)
                .with(EventKind::TranslatedInput),
            Some(id),
            log.listener(),
        )
        .unwrap();

    let battery = BatteryStatus::new(42, true, false);
    fx.transport
        .emit_status(id, DeviceStatus::Battery(battery.clone()));
    let event = log.wait_kind(EventKind::Battery, WAIT).unwrap();
    assert_eq!(event.payload, EventPayload::Battery(battery.clone()));

    fx.transport.emit_input(id, vec![0x01, 0x20]);
    let event = log.wait_kind(EventKind::RawHidInput, WAIT).unwrap();
    assert_eq!(event.payload, EventPayload::RawHidInput(vec![0x01, 0x20]));

    fx.transport.emit_status(
        id,
        DeviceStatus::TranslatedInput {
            input: HidInput::OffHook,
            value: true,
        },
    );
    log.wait_kind(EventKind::TranslatedInput, WAIT).unwrap();

    // 设备不再上报电池和输入
    let mut mask = EventMask::all();
    mask.remove(EventKind::Battery);
    mask.remove(EventKind::RawHidInput);
    fx.registry.set_subscribed_events(id, mask).unwrap();
    assert_eq!(fx.registry.subscribed_events(id).unwrap(), mask);

    let newer = BatteryStatus::new(41, true, false);
    fx.transport.emit_status(id, DeviceStatus::Battery(newer.clone()));
    fx.transport.emit_input(id, vec![0x02]);
    fx.transport
        .emit_status(id, DeviceStatus::Jack(JackStatus { inserted: true }));

    let event = log.wait_kind(EventKind::Jack, WAIT).unwrap();
    assert_eq!(event.payload, EventPayload::Jack(JackStatus { inserted: true }));
    assert!(log.drain(QUIET).is_empty());

    // 即使没有上报，最新的电池状态仍然被记录
    assert_eq!(fx.registry.battery(id).unwrap(), newer);
}

#[test]
fn test_battery_read_when_never_reported() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    assert_eq!(fx.registry.battery(id).unwrap(), BatteryStatus::new(80, false, false));

    fx.transport.fail_reads(Some(TransportDeviceErrorKind::Nack));
    // 已缓存，不再读设备
    assert!(fx.registry.battery(id).is_ok());
}

#[test]
fn test_busylight_round_trip() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    assert!(fx.registry.busylight_supported(id).unwrap());
    assert!(!fx.registry.busylight(id).unwrap());
    fx.registry.set_busylight(id, true).unwrap();
    assert!(fx.registry.busylight(id).unwrap());

    assert!(fx.registry.set_manual_busylight(id, BusyLightValue::Toggle).unwrap());
    assert!(!fx.registry.set_manual_busylight(id, BusyLightValue::Toggle).unwrap());
    assert!(fx.registry.set_manual_busylight(id, BusyLightValue::On).unwrap());
    assert!(fx.registry.manual_busylight(id).unwrap());
}

#[test]
fn test_write_failures_map_to_return_codes() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    fx.transport.fail_writes(Some(TransportDeviceErrorKind::Nack));
    let err = fx.registry.set_busylight(id, true).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DeviceNack);

    fx.transport.fail_writes(Some(TransportDeviceErrorKind::NoDevice));
    let err = fx.registry.set_busylight(id, true).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DeviceWriteFail);

    fx.transport.fail_writes(None);
    fx.transport.fail_reads(Some(TransportDeviceErrorKind::NoDevice));
    let err = fx.registry.busylight(id).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DeviceReadFails);
}

#[test]
fn test_equalizer_parameters_truncated_to_capacity() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    let reading = fx.registry.equalizer_parameters(id, 2).unwrap();
    assert_eq!(reading.bands.len(), 2);
    assert_eq!(reading.total_bands, 3);
    assert!(reading.truncated);

    let reading = fx.registry.equalizer_parameters(id, 8).unwrap();
    assert_eq!(reading.bands.len(), 3);
    assert!(!reading.truncated);

    let err = fx.registry.equalizer_parameters(id, 0).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::ParameterFail);
}

#[test]
fn test_equalizer_gains_validated_before_write() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    fx.registry.enable_equalizer(id, true).unwrap();
    assert!(fx.registry.equalizer_enabled(id).unwrap());

    fx.registry
        .set_equalizer_parameters(id, &[1.5, -2.0, 6.0])
        .unwrap();
    let gains: Vec<f32> = fx
        .transport
        .device(id)
        .unwrap()
        .equalizer_bands
        .unwrap()
        .iter()
        .map(|b| b.current_gain)
        .collect();
    assert_eq!(gains, vec![1.5, -2.0, 6.0]);

    let sent_before = fx.transport.commands().len();
    for bad in [&[7.0_f32, 0.0, 0.0][..], &[0.0, 0.0][..], &[][..], &[f32::NAN, 0.0, 0.0][..]] {
        let err = fx.registry.set_equalizer_parameters(id, bad).unwrap_err();
        assert_eq!(err.return_code(), ReturnCode::ParameterFail, "{:?}", bad);
    }
    assert_eq!(fx.transport.commands().len(), sent_before);
}

#[test]
fn test_firmware_check_compares_versions() {
    let fx = fixture(SdkConfig::default());
    fx.provider.set_latest_firmware("1.2.0");

    // 版本从设备读取（1.0.0）
    let old = fx.transport.plug(headset("usb-1")).unwrap();
    match fx.registry.check_firmware_update(old).unwrap() {
        FirmwareCheck::Available(info) => assert_eq!(info.version, "1.2.0"),
        other => panic!("expected update, got {:?}", other),
    }

    let current = fx
        .transport
        .plug(headset("usb-2").with_firmware_version("1.2.0"))
        .unwrap();
    assert_eq!(
        fx.registry.check_firmware_update(current).unwrap(),
        FirmwareCheck::UpToDate
    );
}

#[test]
fn test_firmware_lookup_blocked_by_configuration() {
    let mut config = SdkConfig::default();
    config.cloud.block_all_network_access = true;
    let fx = fixture(config);
    fx.provider.set_latest_firmware("9.0.0");
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    let err = fx.registry.latest_firmware(id).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::NetworkRequestFail);
    assert_eq!(fx.provider.calls(), 0);
}

#[test]
fn test_firmware_download_progress_and_cancel() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .subscribe(
            EventMask::empty().with(EventKind::FirmwareProgress),
            Some(id),
            log.listener(),
        )
        .unwrap();

    let err = fx.registry.download_firmware(id, "  ").unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::ParameterFail);
    assert_eq!(
        fx.registry.cancel_firmware_download(id).unwrap_err().return_code(),
        ReturnCode::DeviceBadState
    );

    fx.engine.hold();
    fx.registry.download_firmware(id, "1.2.0").unwrap();
    let err = fx.registry.download_firmware(id, "1.2.0").unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DownloadAlreadyInProgress);

    fx.registry.cancel_firmware_download(id).unwrap();
    let event = log
        .wait_for(WAIT, |e| {
            matches!(
                e.payload,
                EventPayload::FirmwareProgress {
                    status: FirmwareEventStatus::Cancelled,
                    ..
                }
            )
        })
        .unwrap();
    assert!(matches!(
        event.payload,
        EventPayload::FirmwareProgress {
            event_type: FirmwareEventType::Download,
            ..
        }
    ));
    assert!(wait_until(WAIT, || {
        fx.registry.session_state(id).ok() == Some(SessionState::Ready)
    }));
}

#[test]
fn test_firmware_download_failure_reported() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    fx.registry
        .set_device_listener(id, EventKind::FirmwareProgress, log.listener())
        .unwrap();

    fx.registry.download_firmware(id, "missing").unwrap();
    log.wait_for(WAIT, |e| {
        matches!(
            e.payload,
            EventPayload::FirmwareProgress {
                status: FirmwareEventStatus::FileNotAvailable,
                ..
            }
        )
    })
    .unwrap();
}

#[test]
fn test_reboot_is_synchronous() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();

    fx.registry.reboot(id).unwrap();
    assert!(fx.transport.device(id).unwrap().rebooted);
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Ready);

    fx.transport.fail_writes(Some(TransportDeviceErrorKind::NoDevice));
    let err = fx.registry.reboot(id).unwrap_err();
    assert_eq!(err.return_code(), ReturnCode::DeviceWriteFail);
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Ready);
}

#[test]
fn test_firmware_lock_flag() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    assert!(!fx.registry.firmware_lock_enabled(id).unwrap());
    fx.registry.enable_firmware_lock(id, true).unwrap();
    assert!(fx.registry.firmware_lock_enabled(id).unwrap());
}

#[test]
fn test_shutdown_detaches_everything() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    fx.transport.plug(headset("usb-2")).unwrap();

    fx.registry.shutdown();
    assert!(!fx.registry.is_running());
    assert!(!fx.transport.is_started());
    assert!(fx.registry.devices().is_empty());
    assert!(matches!(
        fx.registry.session_state(id),
        Err(DriverError::ShutDown)
    ));
    assert_eq!(fx.registry.metrics().devices_online(), 0);

    // 关闭后的插拔被忽略
    assert!(fx.transport.plug(headset("usb-3")).is_none());
    fx.registry.shutdown();
}

#[test]
fn test_shutdown_cancels_running_operation_before_removal() {
    let fx = fixture(SdkConfig::default());
    let busy = fx.transport.plug(headset("usb-1")).unwrap();
    let idle = fx.transport.plug(headset("usb-2")).unwrap();
    let log = EventLog::new();
    fx.registry
        .subscribe(
            EventMask::empty()
                .with(EventKind::UploadProgress)
                .with(EventKind::DeviceRemoved),
            None,
            log.listener(),
        )
        .unwrap();
    let file = payload_file();

    fx.engine.hold();
    fx.registry.upload_ringtone(busy, file.path()).unwrap();
    log.wait_kind(EventKind::UploadProgress, WAIT).unwrap();

    fx.registry.shutdown();
    fx.engine.release();

    // 返回时事件已全部投递
    let events: Vec<_> = log.rx.try_iter().collect();
    let cancelled = events
        .iter()
        .find(|e| {
            matches!(
                e.payload,
                EventPayload::UploadProgress {
                    status: UploadEventStatus::Cancelled,
                    ..
                }
            )
        })
        .expect("upload cancelled on shutdown");
    assert_eq!(cancelled.device_id, Some(busy));

    let removed: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::DeviceRemoved)
        .collect();
    let mut removed_ids: Vec<_> = removed.iter().filter_map(|e| e.device_id).collect();
    removed_ids.sort();
    assert_eq!(removed_ids, vec![busy, idle]);
    let busy_removed = removed
        .iter()
        .find(|e| e.device_id == Some(busy))
        .unwrap();
    assert!(cancelled.sequence < busy_removed.sequence);

    // 之后不再有任何回调
    assert!(log.drain(QUIET).is_empty());
    assert_eq!(fx.registry.metrics().operations_cancelled, 1);
}

#[test]
fn test_out_of_range_refresh_delay_does_not_panic() {
    let mut config = SdkConfig::default();
    config.catalogue.delay_before_refresh_secs = u64::MAX;
    assert!(config.validate().is_ok());

    let fx = fixture(config);
    // 已知型号 attach 时安排刷新
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    assert_eq!(fx.registry.session_state(id).unwrap(), SessionState::Ready);
    assert!(fx.registry.busylight_supported(id).unwrap());
    fx.registry.shutdown();
}

#[test]
fn test_device_subscriptions_removed_on_detach() {
    let fx = fixture(SdkConfig::default());
    let id = fx.transport.plug(headset("usb-1")).unwrap();
    let log = EventLog::new();
    let handle = fx
        .registry
        .subscribe(EventMask::all(), Some(id), log.listener())
        .unwrap();

    fx.transport.unplug(id);
    let removed = log.wait_kind(EventKind::DeviceRemoved, WAIT).unwrap();
    assert_eq!(removed.device_id, Some(id));
    // 订阅随设备一起移除
    assert!(!fx.registry.unsubscribe(handle));
    assert!(fx.registry.dropped_events(handle).is_none());
}
