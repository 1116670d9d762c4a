use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

/// 优雅关闭管理器
///
/// 克隆出的实例共享同一个关闭状态；关闭之后再订阅会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    inner: Arc<ShutdownInner>,
}

struct ShutdownInner {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(ShutdownInner {
                tx,
                triggered: AtomicBool::new(false),
            }),
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.inner.tx.subscribe()
    }

    /// 触发关闭，只有第一次调用会广播信号
    pub fn shutdown(&self) -> bool {
        if self.inner.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return false;
        }
        let receivers = self.inner.tx.receiver_count();
        // 没有订阅者时发送会失败，可以忽略
        let _ = self.inner.tx.send(());
        info!("关闭信号已发送给 {} 个订阅者", receivers);
        true
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
