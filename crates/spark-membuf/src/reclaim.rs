use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    error::{BufferError, Result},
    memory::OwnedRegion,
};

/// `BufferDrop` 是缓冲生命周期终点的回收钩子。
///
/// # 设计背景（Why）
/// - 生命周期引擎不关心内存的去向：系统分配器直接释放，池化分配器截获
///   区域等待复用。钩子把这一决策外置，引擎只保证“恰好调用一次”。
/// - 对标旧缓冲设施的 `BufferRecycler`：区别在于这里移交的是裸区域的
///   完整所有权，而非 `BytesMut` 的夺回尝试，因此钩子永远能拿到内存。
///
/// # 契约说明（What）
/// - **前置条件**：实现必须线程安全，且调用过程中不得 panic——钩子可能
///   在任意持有者线程的释放路径上触发。
/// - **后置条件**：`on_release` 至多被同一块区域触发一次；钩子返回后，
///   引擎不再持有对该区域的任何引用。
pub trait BufferDrop: Send + Sync + 'static {
    /// 计数归零时恰好调用一次，接收底层区域的所有权。
    fn on_release(&self, region: OwnedRegion);
}

/// 默认回收钩子：把区域直接还给系统。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemReclaim;

impl BufferDrop for SystemReclaim {
    fn on_release(&self, region: OwnedRegion) {
        tracing::trace!(
            capacity = region.capacity(),
            kind = ?region.kind(),
            "releasing region to the system"
        );
        drop(region);
    }
}

/// `RegionRc` 把一块区域与它的回收钩子捆绑成可共享的回收体。
///
/// # 设计背景（Why）
/// - split 之后，两个谱系各自独立计数，却指向同一块底层内存；回收体
///   以 `Arc<RegionRc>` 的形式被多个谱系共享，最后一个 `Arc` 消亡时才
///   触发钩子。这就是“同一回收之上的独立 Arc”。
/// - 槽位模式沿用旧设施 `Lease` 的做法：`Mutex<Option<_>>` 保证区域
///   只被取走一次，取走者负责执行钩子。
///
/// # 契约说明（What）
/// - 构造后区域立即入槽；`Drop` 取槽并调用钩子；
/// - 只要还有任何 `Arc<RegionRc>` 存活，区域内存就保持有效。
pub struct RegionRc {
    slot: Mutex<Option<OwnedRegion>>,
    hook: Arc<dyn BufferDrop>,
}

impl RegionRc {
    /// 将区域与回收钩子捆绑为回收体。
    pub fn tether(region: OwnedRegion, hook: Arc<dyn BufferDrop>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Some(region)),
            hook,
        })
    }

    /// 当前区域容量；槽位已清空时为 0。
    pub fn capacity(&self) -> usize {
        self.slot.lock().as_ref().map_or(0, OwnedRegion::capacity)
    }

    /// 独占地解开回收体，直接取回区域而不触发钩子。
    ///
    /// 仅在本 `Arc` 是最后一个引用时成功；失败时回收体保持原状。
    pub(crate) fn try_unwrap(this: Arc<Self>) -> Option<OwnedRegion> {
        Arc::try_unwrap(this)
            .ok()
            .and_then(|rc| rc.slot.lock().take())
    }
}

impl Drop for RegionRc {
    fn drop(&mut self) {
        if let Some(region) = self.slot.lock().take() {
            self.hook.on_release(region);
        }
    }
}

/// `SharedCount` 是谱系级的原子共享计数。
///
/// # 设计背景（Why）
/// - 一个谱系 = 一个缓冲句柄加上它的 acquire 克隆与 slice 视图；计数为 1
///   时谱系独占（owned），这是 grow、compact、split、send 的前置条件。
/// - 计数归零是永久终态：此后 `acquire` 返回 `buffer.closed`，防止关闭后
///   的句柄复活。
///
/// # 执行逻辑（How）
/// - `acquire` 用 CAS 循环自增，遇 0 即失败，避免与归零竞争产生复活；
/// - `release` 顺序一致地自减，过渡到 0 的线程取走系带（tether），由
///   `Arc<RegionRc>` 的消亡级联触发回收；
/// - `retether` 供 grow 安装新区域：旧系带的 Arc 被丢弃一次，其余谱系
///   不受影响。
pub struct SharedCount {
    count: AtomicUsize,
    tether: Mutex<Option<Arc<RegionRc>>>,
}

impl SharedCount {
    /// 以计数 1 包装一条系带（新谱系）。
    pub fn new(tether: Option<Arc<RegionRc>>) -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(1),
            tether: Mutex::new(tether),
        })
    }

    /// 登记一个新的借用者。
    ///
    /// # 契约说明（What）
    /// - 成功时计数加一；计数已为 0 时返回 `buffer.closed`，且不产生
    ///   任何副作用。
    pub fn acquire(&self) -> Result<()> {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return Err(BufferError::closed(
                    "shared count already reached zero; the memory has been reclaimed",
                ));
            }
            match self.count.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(()),
                Err(observed) => current = observed,
            }
        }
    }

    /// 注销一个持有者；过渡到 0 的调用方级联释放系带。
    ///
    /// 返回 `true` 表示本次调用完成了归零。
    pub fn release(&self) -> bool {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "release called past zero");
        if previous == 1 {
            drop(self.tether.lock().take());
            true
        } else {
            false
        }
    }

    /// 谱系是否独占（计数 ≤ 1）。
    pub fn is_owned(&self) -> bool {
        self.count.load(Ordering::SeqCst) <= 1
    }

    /// 当前借用者数量（计数 − 1）。
    pub fn borrows(&self) -> usize {
        self.count.load(Ordering::SeqCst).saturating_sub(1)
    }

    /// 取出当前系带的一个克隆，供切分与池化路径重新系到同一回收体。
    pub fn tether(&self) -> Option<Arc<RegionRc>> {
        self.tether.lock().clone()
    }

    /// 替换系带，返回旧系带（grow 安装新区域用）。
    ///
    /// # 前置条件
    /// - 调用方必须独占谱系（计数 1），否则旧区域上仍有别名。
    pub fn retether(&self, tether: Arc<RegionRc>) -> Option<Arc<RegionRc>> {
        self.tether.lock().replace(tether)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Sharing;
    use alloc::vec::Vec;

    /// 记录回收事件的探针钩子。
    struct RecordingDrop {
        events: Mutex<Vec<usize>>,
    }

    impl RecordingDrop {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn taken(&self) -> Vec<usize> {
            self.events.lock().clone()
        }
    }

    impl BufferDrop for RecordingDrop {
        fn on_release(&self, region: OwnedRegion) {
            self.events.lock().push(region.capacity());
        }
    }

    /// 计数归零才触发回收，且只触发一次。
    #[test]
    fn release_fires_hook_exactly_once_at_zero() {
        let hook = RecordingDrop::new();
        let region = OwnedRegion::heap(8, Sharing::Confined).expect("堆分配不应失败");
        let count = SharedCount::new(Some(RegionRc::tether(region, hook.clone())));

        count.acquire().expect("存活计数上的 acquire 应成功");
        assert!(!count.is_owned());
        assert_eq!(count.borrows(), 1);

        assert!(!count.release());
        assert!(hook.taken().is_empty(), "仍有持有者时不应回收");
        assert!(count.release());
        assert_eq!(hook.taken(), alloc::vec![8]);
    }

    /// 归零后的计数拒绝复活。
    #[test]
    fn acquire_after_zero_is_rejected() {
        let count = SharedCount::new(None);
        assert!(count.release());
        let err = count.acquire().expect_err("归零后的 acquire 应失败");
        assert_eq!(err.kind(), crate::error::ErrorKind::Closed);
    }

    /// 两条谱系共享同一回收体时，回收发生在最后一条谱系归零处。
    #[test]
    fn reclaim_waits_for_every_lineage() {
        let hook = RecordingDrop::new();
        let region = OwnedRegion::heap(16, Sharing::Confined).expect("堆分配不应失败");
        let tether = RegionRc::tether(region, hook.clone());

        let first = SharedCount::new(Some(tether.clone()));
        let second = SharedCount::new(Some(tether));

        assert!(first.release());
        assert!(hook.taken().is_empty(), "另一谱系仍持有系带");
        assert!(second.release());
        assert_eq!(hook.taken(), alloc::vec![16]);
    }
}
