//! 设备存储的性质测试与并发压力测试
//!
//! - 任意 attach / detach 序列之后，枚举结果与在线集合一致，ID 不重复分配
//! - 父子设备回指随上下线维护
//! - 监听者在回调里访问正在被 detach 的设备时不会死锁，也不会在 DeviceRemoved 之后收到该设备的事件

mod common;

use common::*;
use headset_driver::{Registry, RegistryBuilder, SessionState};
use headset_protocol::{BatteryStatus, DeviceId, DeviceStatus, EventKind, EventMask, SdkConfig};
use headset_transport::MockTransport;
use parking_lot::Mutex;
use proptest::prelude::*;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Step {
    Attach(u8),
    Detach(u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![(0u8..6).prop_map(Step::Attach), (0u8..6).prop_map(Step::Detach)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_enumerate_matches_attached_set(steps in prop::collection::vec(step(), 1..40)) {
        let fx = fixture(SdkConfig::default());
        let mut online: HashMap<u8, DeviceId> = HashMap::new();
        let mut issued: HashSet<DeviceId> = HashSet::new();

        for step in steps {
            match step {
                Step::Attach(slot) => {
                    let result = fx.transport.plug(headset(&format!("usb-{}", slot)));
                    if online.contains_key(&slot) {
                        // 同一物理设备不能重复注册
                        prop_assert!(result.is_none());
                    } else {
                        let id = result.unwrap();
                        prop_assert!(issued.insert(id), "id {} reused", id);
                        online.insert(slot, id);
                    }
                }
                Step::Detach(slot) => {
                    if let Some(id) = online.remove(&slot) {
                        fx.transport.unplug(id);
                        prop_assert!(fx.registry.device_info(id).is_err());
                    }
                }
            }

            let listed: Vec<DeviceId> = fx.registry.devices().iter().map(|d| d.device_id).collect();
            let mut expected: Vec<DeviceId> = online.values().copied().collect();
            expected.sort_unstable();
            prop_assert_eq!(listed, expected);
        }

        let metrics = fx.registry.metrics();
        prop_assert_eq!(metrics.devices_online(), online.len() as u64);
    }
}

#[test]
fn test_parent_link_maintained() {
    let fx = fixture(SdkConfig::default());

    // 子设备先于父设备出现
    let child = fx
        .transport
        .plug(speakerphone("usb-2").with_parent("hub-1"))
        .unwrap();
    assert_eq!(fx.registry.device_info(child).unwrap().parent_device_id, None);

    let parent = fx.transport.plug(headset("hub-1")).unwrap();
    assert_eq!(
        fx.registry.device_info(child).unwrap().parent_device_id,
        Some(parent)
    );

    fx.transport.unplug(parent);
    assert_eq!(fx.registry.device_info(child).unwrap().parent_device_id, None);
}

/// 在回调里反向调用注册表
fn reentrant_listener(
    registry: Arc<Mutex<Weak<Registry>>>,
    seen: Arc<Mutex<Vec<(DeviceId, EventKind)>>>,
) -> impl Fn(&headset_protocol::DeviceEvent) + Send + Sync {
    move |event: &headset_protocol::DeviceEvent| {
        let Some(id) = event.device_id else {
            return;
        };
        seen.lock().push((id, event.kind()));
        if let Some(registry) = registry.lock().upgrade() {
            // 设备可能正在被移除：要么成功，要么 DeviceUnknown
            let _ = registry.device_info(id);
            let _ = registry.battery(id);
            let _ = registry.session_state(id);
        }
    }
}

#[test]
fn test_reentrant_listener_during_churn() {
    let transport = Arc::new(MockTransport::new());
    let registry = Arc::new(
        RegistryBuilder::new()
            .transport(transport.clone())
            .known_product(headset("catalogue"), all_features())
            .build()
            .unwrap(),
    );
    let handle = Arc::new(Mutex::new(Arc::downgrade(&registry)));
    let seen = Arc::new(Mutex::new(Vec::new()));
    registry
        .subscribe(
            EventMask::all(),
            None,
            Arc::new(reentrant_listener(handle.clone(), seen.clone())),
        )
        .unwrap();

    let mut rng = rand::thread_rng();
    for round in 0..20 {
        let id = transport.plug(headset(&format!("usb-{}", round))).unwrap();
        for _ in 0..rng.gen_range(1..5) {
            transport.emit_status(
                id,
                DeviceStatus::Battery(BatteryStatus::new(rng.gen_range(0..=100), false, false)),
            );
        }
        thread::sleep(Duration::from_millis(rng.gen_range(0..5)));
        transport.unplug(id);
    }

    assert!(wait_until(Duration::from_secs(5), || {
        seen.lock()
            .iter()
            .filter(|(_, kind)| *kind == EventKind::DeviceRemoved)
            .count()
            == 20
    }));
    thread::sleep(Duration::from_millis(100));

    // 每个设备的 DeviceRemoved 都是它的最后一个事件
    let seen = seen.lock().clone();
    let mut removed: HashSet<DeviceId> = HashSet::new();
    for (id, kind) in seen {
        assert!(!removed.contains(&id), "event {:?} after removal of {}", kind, id);
        if kind == EventKind::DeviceRemoved {
            removed.insert(id);
        }
    }
    assert!(registry.devices().is_empty());

    // 在测试线程上关闭，回调线程不会持有最后一个引用
    *handle.lock() = Weak::new();
    registry.shutdown();
}

#[test]
fn test_session_state_reported_through_snapshot() {
    let fx = fixture(SdkConfig::default());
    let known = fx.transport.plug(headset("usb-1")).unwrap();
    let unknown = fx.transport.plug(speakerphone("usb-2")).unwrap();

    assert_eq!(fx.registry.session_state(known).unwrap(), SessionState::Ready);
    assert_eq!(fx.registry.session_state(unknown).unwrap(), SessionState::Attached);
    assert_eq!(fx.registry.devices().len(), 2);
}
