use alloc::{boxed::Box, sync::Arc};
use core::{
    fmt,
    ptr::NonNull,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::{
    buffer::{Buffer, MemBuf},
    error::{BufferError, Result},
    memory::{
        DirectMemoryManager, HeapMemoryManager, MemoryKind, MemoryManager, OwnedRegion,
        SegmentMemoryManager, Sharing,
    },
    reclaim::{BufferDrop, RegionRc, SystemReclaim},
};

/// 尚未登记回收钩子的分配结果。
///
/// grow/compact 在安装前临时持有它；在安装之前丢弃是安全的，区域会
/// 按自身后端直接释放。
pub struct Untethered {
    /// 新分配的清零区域。
    pub region: OwnedRegion,
    /// 安装时应绑定的回收钩子。
    pub hook: Arc<dyn BufferDrop>,
}

/// `AllocatorControl` 是缓冲回到出生分配器的扩容桥接。
///
/// # 设计背景（Why）
/// - `ensure_writable` 需要追加内存，但缓冲不应知道分配器的身份与
///   池化策略；桥接把“再要一块”收敛为单一入口。
/// - 返回 [`Untethered`]，由缓冲在拷贝完成后自行系上回收体：扩容期间
///   同时持有新旧两块区域，旧区域的系带随后被干净地丢弃一次。
pub trait AllocatorControl: Send + Sync + 'static {
    /// 为 `origin` 申请 `size` 字节的新区域，不登记任何回收钩子。
    ///
    /// 分配器关闭后该入口依旧可用：存活缓冲的扩容不应因分配器先行
    /// 关闭而失败，只有新的 `allocate` 调用会被拒绝。
    fn allocate_untethered(&self, origin: &dyn Buffer, size: usize) -> Result<Untethered>;
}

/// `BufferAllocator` 是缓冲的用户级入口。
///
/// # 契约说明（What）
/// - `allocate(size)`：返回全新缓冲——`r = w = 0`、可写、独占、可访问、
///   原生字节序；
/// - `const_supplier(bytes)`：返回共享只读快照的供应器；
/// - `close()`：此后 `allocate`/`const_supplier` 返回 `allocator.closed`，
///   已分配的缓冲不受影响。
pub trait BufferAllocator: Send + Sync + 'static {
    /// 分配 `size` 字节的新缓冲。
    fn allocate(&self, size: usize) -> Result<Box<dyn Buffer>>;

    /// 以 `bytes` 的一份拷贝建立常量缓冲供应器。
    fn const_supplier(&self, bytes: &[u8]) -> Result<ConstBufferSupplier>;

    /// 暴露扩容桥接，供组合缓冲与扩容路径使用。
    fn control(&self) -> Arc<dyn AllocatorControl>;

    /// 关闭分配器，释放池化资源。
    fn close(&self);
}

/// 直接向内存管理器索取新内存的系统分配器。
///
/// # 设计背景（Why）
/// - 非池化路径的基准实现：每次分配都是新区域，回收即释放；
/// - 同时承担 [`AllocatorControl`] 角色——缓冲扩容回到出生分配器，
///   与池化分配器同时兼任回收器的做法一致。
#[derive(Clone)]
pub struct SystemAllocator {
    inner: Arc<SystemControl>,
}

struct SystemControl {
    manager: Box<dyn MemoryManager>,
    sharing: Sharing,
    closed: AtomicBool,
}

impl SystemControl {
    fn allocate_region(&self, size: usize) -> Result<OwnedRegion> {
        match self.sharing {
            Sharing::Confined => self.manager.allocate_confined(size),
            Sharing::Shared => self.manager.allocate_shared(size),
        }
    }
}

impl SystemAllocator {
    /// 堆数组后端的分配器。
    pub fn heap() -> Self {
        Self::with_manager(Box::new(HeapMemoryManager), Sharing::Confined)
    }

    /// 直接内存后端的分配器。
    pub fn direct() -> Self {
        Self::with_manager(Box::new(DirectMemoryManager), Sharing::Confined)
    }

    /// 页对齐内存段后端的分配器。
    pub fn segment() -> Self {
        Self::with_manager(Box::new(SegmentMemoryManager), Sharing::Shared)
    }

    /// 以指定管理器与共享意图构建分配器。
    pub fn with_manager(manager: Box<dyn MemoryManager>, sharing: Sharing) -> Self {
        Self {
            inner: Arc::new(SystemControl {
                manager,
                sharing,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 分配器的后端形态。
    pub fn memory_kind(&self) -> MemoryKind {
        self.inner.manager.kind()
    }
}

impl BufferAllocator for SystemAllocator {
    fn allocate(&self, size: usize) -> Result<Box<dyn Buffer>> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BufferError::allocator_closed(
                "allocator is closed; no further allocations are served",
            ));
        }
        let region = self.inner.allocate_region(size)?;
        tracing::trace!(size, kind = ?region.kind(), "allocated fresh buffer");
        Ok(Box::new(MemBuf::adopt(
            region,
            Arc::new(SystemReclaim),
            self.control(),
        )))
    }

    fn const_supplier(&self, bytes: &[u8]) -> Result<ConstBufferSupplier> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BufferError::allocator_closed(
                "allocator is closed; no further allocations are served",
            ));
        }
        let mut region = self.inner.manager.allocate_shared(bytes.len())?;
        region.as_mut_slice().copy_from_slice(bytes);
        let base = region.base_ptr();
        let kind = region.kind();
        let len = region.capacity();
        let tether = RegionRc::tether(region, Arc::new(SystemReclaim));
        Ok(ConstBufferSupplier {
            tether,
            base,
            len,
            kind,
            control: self.control(),
        })
    }

    fn control(&self) -> Arc<dyn AllocatorControl> {
        Arc::clone(&self.inner) as Arc<dyn AllocatorControl>
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        tracing::debug!(kind = ?self.inner.manager.kind(), "allocator closed");
    }
}

impl AllocatorControl for SystemControl {
    fn allocate_untethered(&self, origin: &dyn Buffer, size: usize) -> Result<Untethered> {
        let region = self.allocate_region(size)?;
        tracing::trace!(
            size,
            origin = ?origin.kind(),
            "allocated untethered region for growth"
        );
        Ok(Untethered {
            region,
            hook: Arc::new(SystemReclaim),
        })
    }
}

impl fmt::Debug for SystemAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemAllocator")
            .field("kind", &self.inner.manager.kind())
            .field("sharing", &self.inner.sharing)
            .field("closed", &self.inner.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// `ConstBufferSupplier` 向多方发放同一份只读字节的独立句柄。
///
/// # 契约说明（What）
/// - 每次 [`get`](ConstBufferSupplier::get) 返回新的谱系（计数 1）：
///   只读、常量视图、游标覆盖全部内容；
/// - 所有句柄与供应器共享同一块底层内存，最后一方释放时回收；
/// - 各句柄的后续演化（切分、发送、关闭）互不影响。
pub struct ConstBufferSupplier {
    tether: Arc<RegionRc>,
    base: NonNull<u8>,
    len: usize,
    kind: MemoryKind,
    control: Arc<dyn AllocatorControl>,
}

// SAFETY: 供应器只发放只读视图；指针有效性由共享的系带保证。
unsafe impl Send for ConstBufferSupplier {}
unsafe impl Sync for ConstBufferSupplier {}

impl ConstBufferSupplier {
    /// 发放一个新的常量视图句柄。
    pub fn get(&self) -> Box<dyn Buffer> {
        Box::new(MemBuf::const_view(
            Arc::clone(&self.tether),
            self.base,
            self.len,
            self.kind,
            Arc::clone(&self.control),
        ))
    }
}

impl fmt::Debug for ConstBufferSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstBufferSupplier")
            .field("len", &self.len)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
pub(crate) fn testing_noop_control() -> Arc<dyn AllocatorControl> {
    SystemAllocator::heap().control()
}
