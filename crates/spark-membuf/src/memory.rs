use alloc::{
    alloc::{alloc_zeroed, dealloc, handle_alloc_error},
    boxed::Box,
    sync::Arc,
};
use core::{alloc::Layout, fmt, ptr::NonNull, slice};

use crate::{
    allocator::AllocatorControl,
    buffer::mem::MemBuf,
    error::{BufferError, Result},
    reclaim::BufferDrop,
};

/// 页对齐常量，内存段后端按页粒度向系统索取内存。
const SEGMENT_ALIGN: usize = 4096;

/// 直接内存后端的对齐，保证 8 字节原生类型的对齐访问。
const DIRECT_ALIGN: usize = 8;

/// 底层内存的三种后端形态。
///
/// # 契约说明（What）
/// - `Heap`：堆上字节数组，组件视图暴露切片；
/// - `Direct`：堆外直接内存，组件视图暴露原生地址；
/// - `Segment`：页对齐内存段，同样暴露原生地址，并携带受限/共享标记。
///
/// 三种后端通过同一裸指针读写，叶子缓冲只有一份实现；后端差异体现在
/// 分配、回收与组件内省上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Heap,
    Direct,
    Segment,
}

/// 区域的线程共享意图。
///
/// - `Confined`：调用方承诺单线程内使用，跨线程移交走 send 信封；
/// - `Shared`：允许以只读视图形式跨线程共享。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sharing {
    Confined,
    Shared,
}

/// 区域的释放方式，与 [`MemoryKind`] 一一对应。
enum Backing {
    /// 零容量区域，无需释放。
    Empty,
    /// `Box<[u8]>` 经 `Box::into_raw` 转移而来，释放时重建。
    Heap,
    /// 经 `alloc_zeroed` 分配的原生内存，按布局归还。
    Raw(Layout),
}

/// `OwnedRegion` 是一块未挂任何回收钩子的裸内存区域。
///
/// # 设计背景（Why）
/// - 生命周期引擎把“内存从哪来、怎么还”与“谁还持有引用”彻底分离：
///   区域只负责前者，引用计数由 [`SharedCount`](crate::reclaim::SharedCount)
///   与 [`RegionRc`](crate::reclaim::RegionRc) 负责。
/// - grow/compact 需要临时持有两块区域（旧 + 新），未挂钩的区域可以在
///   安装前安全丢弃，不会触碰任何计数。
///
/// # 契约说明（What）
/// - 分配即清零，读取任意偏移都是已定义行为；
/// - `Drop` 按后端释放内存；被回收钩子捕获的区域由钩子决定去向（直接
///   释放，或暂存进池中等待 `wrap_recovered`）。
pub struct OwnedRegion {
    ptr: NonNull<u8>,
    capacity: usize,
    kind: MemoryKind,
    sharing: Sharing,
    backing: Backing,
}

// SAFETY: 区域独占其内存；指针只是所有权的表现形式，跨线程移动与
// 只读共享均不会引入数据竞争。
unsafe impl Send for OwnedRegion {}
unsafe impl Sync for OwnedRegion {}

impl OwnedRegion {
    /// 分配一块清零的堆数组区域。
    pub fn heap(size: usize, sharing: Sharing) -> Result<Self> {
        if size == 0 {
            return Ok(Self::empty(MemoryKind::Heap, sharing));
        }
        let boxed = alloc::vec![0u8; size].into_boxed_slice();
        let ptr = Box::into_raw(boxed) as *mut u8;
        Ok(Self {
            // SAFETY: Box::into_raw 不会返回空指针。
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            capacity: size,
            kind: MemoryKind::Heap,
            sharing,
            backing: Backing::Heap,
        })
    }

    /// 分配一块清零的原生内存区域（直接或段后端）。
    fn raw(size: usize, align: usize, kind: MemoryKind, sharing: Sharing) -> Result<Self> {
        if size == 0 {
            return Ok(Self::empty(kind, sharing));
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| {
            BufferError::argument(alloc::format!(
                "allocation of {size} bytes exceeds the addressable range"
            ))
        })?;
        // SAFETY: layout 非零尺寸且合法。
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        Ok(Self {
            ptr,
            capacity: size,
            kind,
            sharing,
            backing: Backing::Raw(layout),
        })
    }

    /// 分配直接内存区域。
    pub fn direct(size: usize, sharing: Sharing) -> Result<Self> {
        Self::raw(size, DIRECT_ALIGN, MemoryKind::Direct, sharing)
    }

    /// 分配页对齐内存段区域。
    pub fn segment(size: usize, sharing: Sharing) -> Result<Self> {
        Self::raw(size, SEGMENT_ALIGN, MemoryKind::Segment, sharing)
    }

    fn empty(kind: MemoryKind, sharing: Sharing) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            kind,
            sharing,
            backing: Backing::Empty,
        }
    }

    /// 区域容量（字节）。
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 区域的后端形态。
    pub fn kind(&self) -> MemoryKind {
        self.kind
    }

    /// 区域的共享意图。
    pub fn sharing(&self) -> Sharing {
        self.sharing
    }

    /// 原生地址；堆后端与空区域返回 0。
    pub fn native_address(&self) -> usize {
        match self.backing {
            Backing::Raw(_) => self.ptr.as_ptr() as usize,
            Backing::Empty | Backing::Heap => 0,
        }
    }

    pub(crate) fn base_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// 以切片视图读取整个区域。
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: 区域独占内存，容量与分配时一致，内容已清零。
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    /// 以可变切片视图访问整个区域。
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `&mut self` 独占区域。
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl fmt::Debug for OwnedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedRegion")
            .field("capacity", &self.capacity)
            .field("kind", &self.kind)
            .field("sharing", &self.sharing)
            .finish()
    }
}

impl Drop for OwnedRegion {
    fn drop(&mut self) {
        match self.backing {
            Backing::Empty => {}
            Backing::Heap => {
                // SAFETY: 指针与容量来自 Box::into_raw，此处重建并释放。
                unsafe {
                    drop(Box::from_raw(core::ptr::slice_from_raw_parts_mut(
                        self.ptr.as_ptr(),
                        self.capacity,
                    )));
                }
            }
            Backing::Raw(layout) => {
                // SAFETY: 指针与布局来自 alloc_zeroed。
                unsafe { dealloc(self.ptr.as_ptr(), layout) }
            }
        }
    }
}

/// `MemoryManager` 是后端专属的内存引擎：分配、回收、以及池化场景下的
/// 再包装。
///
/// # 设计背景（Why）
/// - 生命周期引擎把分配器视为“新内存来源 + 回收回调”的黑盒；管理器是
///   黑盒内部的最底层，负责向系统申请与归还内存。
/// - 池化分配器在回收钩子中截获 [`OwnedRegion`] 后，通过
///   [`wrap_recovered`](MemoryManager::wrap_recovered) 把同一块内存绑定到
///   新的回收钩子上复用，全程零拷贝。
///
/// # 契约说明（What）
/// - `allocate_confined`/`allocate_shared` 返回清零的新区域；
/// - `reclaim` 接收区域所有权并立即释放；
/// - `wrap_recovered` 要求区域后端与管理器一致，否则返回 `buffer.argument`。
pub trait MemoryManager: Send + Sync + 'static {
    /// 管理器对应的后端形态。
    fn kind(&self) -> MemoryKind;

    /// 分配单线程受限区域。
    fn allocate_confined(&self, size: usize) -> Result<OwnedRegion>;

    /// 分配可跨线程共享区域。
    fn allocate_shared(&self, size: usize) -> Result<OwnedRegion>;

    /// 立即释放一块区域。
    fn reclaim(&self, region: OwnedRegion) {
        tracing::trace!(
            capacity = region.capacity(),
            kind = ?region.kind(),
            "reclaiming region"
        );
        drop(region);
    }

    /// 把缓冲从当前回收钩子上解绑，取回可复用的区域。
    ///
    /// 与 [`wrap_recovered`](MemoryManager::wrap_recovered) 成对使用：
    /// 池化分配器先解绑独占缓冲，稍后把同一块内存系上新的钩子复用。
    /// 要求缓冲独占且后端与管理器一致。无论成败，传入的句柄都被消费；
    /// 失败时区域仍由其余持有者共享，由他们的关闭路径完成回收。
    fn unwrap_recoverable(&self, buffer: MemBuf) -> Result<OwnedRegion> {
        if buffer.mem_kind() != self.kind() {
            return Err(BufferError::argument(alloc::format!(
                "cannot recover a {:?} buffer through a {:?} manager",
                buffer.mem_kind(),
                self.kind()
            )));
        }
        buffer.try_unwrap_region()
    }

    /// 将回收到的区域重新包装为叶子缓冲，绑定新的回收钩子。
    fn wrap_recovered(
        &self,
        region: OwnedRegion,
        hook: Arc<dyn BufferDrop>,
        control: Arc<dyn AllocatorControl>,
    ) -> Result<MemBuf> {
        if region.kind() != self.kind() {
            return Err(BufferError::argument(alloc::format!(
                "cannot recover a {:?} region through a {:?} manager",
                region.kind(),
                self.kind()
            )));
        }
        Ok(MemBuf::adopt(region, hook, control))
    }
}

/// 堆数组后端。
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapMemoryManager;

impl MemoryManager for HeapMemoryManager {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Heap
    }

    fn allocate_confined(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::heap(size, Sharing::Confined)
    }

    fn allocate_shared(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::heap(size, Sharing::Shared)
    }
}

/// 直接内存后端。
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectMemoryManager;

impl MemoryManager for DirectMemoryManager {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Direct
    }

    fn allocate_confined(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::direct(size, Sharing::Confined)
    }

    fn allocate_shared(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::direct(size, Sharing::Shared)
    }
}

/// 页对齐内存段后端。
#[derive(Debug, Default, Clone, Copy)]
pub struct SegmentMemoryManager;

impl MemoryManager for SegmentMemoryManager {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Segment
    }

    fn allocate_confined(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::segment(size, Sharing::Confined)
    }

    fn allocate_shared(&self, size: usize) -> Result<OwnedRegion> {
        OwnedRegion::segment(size, Sharing::Shared)
    }
}
