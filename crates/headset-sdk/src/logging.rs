//! 日志初始化
//!
//! 可选。应用已经安装了自己的 subscriber 时不需要调用。

use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// 安装 fmt subscriber（`RUST_LOG` 控制过滤，默认 `info`），并把 `log` 记录桥接到 `tracing`
///
/// 幂等；返回本进程中是否由本函数安装了 subscriber。
pub fn init_logging() -> bool {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        // try_init 同时安装 LogTracer；已有全局 subscriber 时失败
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_ok();
        if !installed {
            let _ = tracing_log::LogTracer::init();
        }
        INSTALLED.store(installed, Ordering::Release);
    });
    INSTALLED.load(Ordering::Acquire)
}
