use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    ptr::NonNull,
    slice,
    sync::atomic::{Ordering, fence},
};

use crate::{
    allocator::AllocatorControl,
    buffer::{
        Buffer, BufferKind, ByteOrder, ReadProcessor, ReadableComponent, WritableComponent,
        WriteProcessor, borrowed_write_error, closed_error, read_only_error,
    },
    cursor::{ByteCursor, ReverseByteCursor},
    error::{BufferError, Result},
    memory::{MemoryKind, OwnedRegion},
    reclaim::{BufferDrop, RegionRc, SharedCount},
    send::{Envelope, LeafState},
};

/// `MemBuf` 是覆盖单块连续区域的叶子缓冲，服务全部三种后端。
///
/// # 设计背景（Why）
/// - 堆、直接内存、内存段在 Rust 里都经由同一个裸指针读写，为每个
///   后端维护一份访问器矩阵只会复制三遍相同的代码；后端差异已经被
///   [`MemoryManager`](crate::memory::MemoryManager)（分配/回收）与
///   组件内省（数组 vs 原生地址）完整承载。
/// - 句柄自带游标与标志位：acquire 克隆、slice 视图各有独立游标，
///   共享的只有内存与谱系计数。这使“借用即只读”的别名纪律不需要
///   任何跨句柄同步。
///
/// # 安全性（Safety）
/// - 窗口内存的生命周期由 `Arc<RegionRc>` 系带保证：只要句柄可访问，
///   计数非零，系带存活，指针有效；
/// - 写路径要求谱系计数为 1 且未置只读，读路径允许多个只读别名；
/// - split 产生的两半窗口互不重叠，各自独占写权。
pub struct MemBuf {
    count: Arc<SharedCount>,
    base: NonNull<u8>,
    cap: usize,
    roff: usize,
    woff: usize,
    order: ByteOrder,
    kind: MemoryKind,
    read_only: bool,
    const_view: bool,
    accessible: bool,
    control: Arc<dyn AllocatorControl>,
}

// SAFETY: 写访问以谱系计数为 1 为前提，读访问只派生共享借用；
// 跨线程移动句柄等价于移动其独占或只读视图，不产生数据竞争。
unsafe impl Send for MemBuf {}
unsafe impl Sync for MemBuf {}

impl MemBuf {
    /// 把一块区域连同回收钩子收编为全新的叶子缓冲。
    pub(crate) fn adopt(
        region: OwnedRegion,
        hook: Arc<dyn BufferDrop>,
        control: Arc<dyn AllocatorControl>,
    ) -> Self {
        let base = region.base_ptr();
        let cap = region.capacity();
        let kind = region.kind();
        let tether = RegionRc::tether(region, hook);
        Self {
            count: SharedCount::new(Some(tether)),
            base,
            cap,
            roff: 0,
            woff: 0,
            order: ByteOrder::native(),
            kind,
            read_only: false,
            const_view: false,
            accessible: true,
            control,
        }
    }

    /// 从发送快照物化新句柄（计数 1）。
    pub(crate) fn from_leaf_state(state: LeafState) -> Self {
        Self {
            count: SharedCount::new(Some(state.tether)),
            base: state.base,
            cap: state.cap,
            roff: state.roff,
            woff: state.woff,
            order: state.order,
            kind: state.kind,
            read_only: state.read_only,
            const_view: state.const_view,
            accessible: true,
            control: state.control,
        }
    }

    /// 常量供应器的出口：同一系带上的独立只读谱系。
    pub(crate) fn const_view(
        tether: Arc<RegionRc>,
        base: NonNull<u8>,
        len: usize,
        kind: MemoryKind,
        control: Arc<dyn AllocatorControl>,
    ) -> Self {
        Self {
            count: SharedCount::new(Some(tether)),
            base,
            cap: len,
            roff: 0,
            woff: len,
            order: ByteOrder::native(),
            kind,
            read_only: true,
            const_view: true,
            accessible: true,
            control,
        }
    }

    fn check_accessible(&self) -> Result<()> {
        if self.accessible {
            Ok(())
        } else {
            Err(closed_error())
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(read_only_error());
        }
        if !self.count.is_owned() {
            return Err(borrowed_write_error());
        }
        Ok(())
    }

    fn check_owned(&self, operation: &str) -> Result<()> {
        if self.count.is_owned() {
            Ok(())
        } else {
            Err(BufferError::ownership(alloc::format!(
                "{operation} requires exclusive ownership; {} borrow(s) outstanding",
                self.count.borrows()
            )))
        }
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<()> {
        let end = offset.checked_add(length).ok_or_else(|| {
            BufferError::bounds("offset plus length overflows the address space")
        })?;
        if end > self.cap {
            return Err(BufferError::bounds(alloc::format!(
                "range [{offset}, {end}) exceeds capacity {}",
                self.cap
            )));
        }
        Ok(())
    }

    /// 本句柄窗口的只读视图。
    pub(crate) fn window(&self) -> &[u8] {
        // SAFETY: 句柄可访问期间系带存活，窗口在区域边界之内。
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.cap) }
    }

    /// 本句柄窗口的可写视图；调用方需已通过写权检查。
    pub(crate) fn window_mut(&mut self) -> &mut [u8] {
        // SAFETY: 同上，且写路径要求谱系独占，不存在并发别名写。
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.cap) }
    }

    pub(crate) fn mem_kind(&self) -> MemoryKind {
        self.kind
    }

    fn native_address_at(&self, offset: usize) -> usize {
        match self.kind {
            MemoryKind::Heap => 0,
            MemoryKind::Direct | MemoryKind::Segment => self.base.as_ptr() as usize + offset,
        }
    }

    pub(crate) fn native_address_of_reader(&self) -> usize {
        self.native_address_at(self.roff)
    }

    pub(crate) fn native_address_of_writer(&self) -> usize {
        self.native_address_at(self.woff)
    }

    /// 叶子类型的切片视图；登记借用并共享本谱系计数。
    pub(crate) fn slice_leaf(&self, offset: usize, length: usize) -> Result<Self> {
        self.check_accessible()?;
        self.check_range(offset, length)?;
        self.count.acquire()?;
        // SAFETY: offset + length ≤ cap，窗口仍在区域内部。
        let base = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        Ok(Self {
            count: Arc::clone(&self.count),
            base,
            cap: length,
            roff: 0,
            woff: length,
            order: self.order,
            kind: self.kind,
            read_only: true,
            const_view: self.const_view,
            accessible: true,
            control: Arc::clone(&self.control),
        })
    }

    /// 当前可读区间的切片。
    pub(crate) fn readable_chunk(&self) -> &[u8] {
        &self.window()[self.roff..self.woff]
    }

    /// 当前可写区间的可变切片。
    pub(crate) fn writable_chunk(&mut self) -> &mut [u8] {
        let (woff, cap) = (self.woff, self.cap);
        &mut self.window_mut()[woff..cap]
    }

    /// 直接设置两个游标，绕过检查；仅限组合缓冲的同步路径。
    pub(crate) fn set_span_raw(&mut self, roff: usize, woff: usize) {
        debug_assert!(roff <= woff && woff <= self.cap);
        self.roff = roff;
        self.woff = woff;
    }

    /// 直接设置字节序，绕过可访问性检查；仅限组合缓冲的构造路径。
    pub(crate) fn set_order_raw(&mut self, order: ByteOrder) {
        self.order = order;
    }

    fn clone_handle(&self) -> Self {
        Self {
            count: Arc::clone(&self.count),
            base: self.base,
            cap: self.cap,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            kind: self.kind,
            read_only: self.read_only,
            const_view: self.const_view,
            accessible: true,
            control: Arc::clone(&self.control),
        }
    }

    /// 登记借用并返回叶子类型的克隆句柄。
    pub(crate) fn acquire_leaf(&self) -> Result<Self> {
        self.check_accessible()?;
        self.count.acquire()?;
        Ok(self.clone_handle())
    }

    /// 不做所有权检查的切分；调用方负责前置校验。
    pub(crate) fn split_leaf(&mut self, offset: usize) -> Result<Self> {
        let tether = self.count.tether().ok_or_else(closed_error)?;
        let front = Self {
            count: SharedCount::new(Some(tether)),
            base: self.base,
            cap: offset,
            roff: self.roff.min(offset),
            woff: self.woff.min(offset),
            order: self.order,
            kind: self.kind,
            read_only: self.read_only,
            const_view: self.const_view,
            accessible: true,
            control: Arc::clone(&self.control),
        };
        // SAFETY: offset ≤ cap，仍指向同一分配内部。
        self.base = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        self.cap -= offset;
        self.roff = self.roff.max(offset) - offset;
        self.woff = self.woff.max(offset) - offset;
        Ok(front)
    }

    /// 解除与回收钩子的绑定并取回底层区域。
    ///
    /// 要求句柄独占，且区域没有被其它谱系（切分出的兄弟、池中暂存的
    /// 系带）共享；成功后回收钩子不会再被该区域触发。
    pub(crate) fn try_unwrap_region(mut self) -> Result<OwnedRegion> {
        self.check_accessible()?;
        self.check_owned("recover")?;
        let tether = self.count.tether().ok_or_else(closed_error)?;
        // 此刻恰有两个引用：谱系计数内的系带与本地克隆。更多引用意味着
        // 其它谱系仍依赖这块区域，解绑将使它们悬垂。
        if Arc::strong_count(&tether) > 2 {
            return Err(BufferError::ownership(
                "cannot recover memory: the region is shared by other lineages",
            ));
        }
        self.close();
        RegionRc::try_unwrap(tether)
            .ok_or_else(|| BufferError::closed("region was reclaimed concurrently"))
    }

    /// 冻结句柄状态为发送快照，本句柄随即不可访问。
    pub(crate) fn snapshot_for_send(&mut self) -> Result<LeafState> {
        let tether = self.count.tether().ok_or_else(closed_error)?;
        let state = LeafState {
            tether,
            base: self.base,
            cap: self.cap,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            kind: self.kind,
            read_only: self.read_only,
            const_view: self.const_view,
            control: Arc::clone(&self.control),
        };
        self.accessible = false;
        self.read_only = false;
        self.count.release();
        Ok(state)
    }
}

impl Buffer for MemBuf {
    fn kind(&self) -> BufferKind {
        self.kind.into()
    }

    fn capacity(&self) -> usize {
        self.cap
    }

    fn reader_offset(&self) -> usize {
        self.roff
    }

    fn writer_offset(&self) -> usize {
        self.woff
    }

    fn set_reader_offset(&mut self, offset: usize) -> Result<()> {
        self.check_accessible()?;
        if offset > self.woff {
            return Err(BufferError::bounds(alloc::format!(
                "reader offset {offset} would pass writer offset {}",
                self.woff
            )));
        }
        self.roff = offset;
        Ok(())
    }

    fn set_writer_offset(&mut self, offset: usize) -> Result<()> {
        self.check_accessible()?;
        self.check_writable()?;
        if offset < self.roff || offset > self.cap {
            return Err(BufferError::bounds(alloc::format!(
                "writer offset {offset} outside [{}, {}]",
                self.roff,
                self.cap
            )));
        }
        self.woff = offset;
        Ok(())
    }

    fn order(&self) -> ByteOrder {
        self.order
    }

    fn set_order(&mut self, order: ByteOrder) -> Result<()> {
        self.check_accessible()?;
        self.order = order;
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn make_read_only(&mut self) -> Result<()> {
        self.check_accessible()?;
        self.read_only = true;
        Ok(())
    }

    fn is_accessible(&self) -> bool {
        self.accessible
    }

    fn is_owned(&self) -> bool {
        self.accessible && self.count.is_owned()
    }

    fn is_const_view(&self) -> bool {
        self.const_view
    }

    fn close(&mut self) {
        if !self.accessible {
            return;
        }
        self.accessible = false;
        self.read_only = false;
        self.count.release();
    }

    fn copy_into_slice(&self, offset: usize, dest: &mut [u8]) -> Result<()> {
        self.check_accessible()?;
        self.check_range(offset, dest.len())?;
        dest.copy_from_slice(&self.window()[offset..offset + dest.len()]);
        Ok(())
    }

    fn set_slice(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_accessible()?;
        self.check_writable()?;
        self.check_range(offset, src.len())?;
        self.window_mut()[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn fill(&mut self, value: u8) -> Result<()> {
        self.check_accessible()?;
        self.check_writable()?;
        self.window_mut().fill(value);
        Ok(())
    }

    fn split_at(&mut self, offset: usize) -> Result<Box<dyn Buffer>> {
        self.check_accessible()?;
        self.check_owned("split")?;
        if offset > self.cap {
            return Err(BufferError::bounds(alloc::format!(
                "split offset {offset} exceeds capacity {}",
                self.cap
            )));
        }
        Ok(Box::new(self.split_leaf(offset)?))
    }

    fn slice_range(&self, offset: usize, length: usize) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(self.slice_leaf(offset, length)?))
    }

    fn acquire(&self) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(self.acquire_leaf()?))
    }

    fn acquire_parts(&self) -> Result<Vec<MemBuf>> {
        Ok(alloc::vec![self.acquire_leaf()?])
    }

    fn send(&mut self) -> Result<Envelope> {
        if !self.accessible {
            return Err(BufferError::send_state(
                "Cannot send() a buffer that is closed or was already sent",
            ));
        }
        self.check_owned("send")?;
        let state = self.snapshot_for_send()?;
        fence(Ordering::SeqCst);
        Ok(Envelope::for_leaf(state))
    }

    fn ensure_writable_with(
        &mut self,
        size: usize,
        minimum_growth: usize,
        allow_compaction: bool,
    ) -> Result<()> {
        self.check_accessible()?;
        if self.read_only {
            return Err(read_only_error());
        }
        self.check_owned("ensure_writable")?;
        let writable = self.cap - self.woff;
        if writable >= size {
            return Ok(());
        }
        if allow_compaction && writable + self.roff >= size {
            return self.compact();
        }
        let growth = (size - writable).max(minimum_growth);
        let new_cap = self.cap.checked_add(growth).ok_or_else(|| {
            BufferError::bounds("grown capacity overflows the address space")
        })?;
        let control = Arc::clone(&self.control);
        let untethered = control.allocate_untethered(&*self, new_cap)?;
        let mut region = untethered.region;
        if region.capacity() < new_cap {
            return Err(BufferError::argument(alloc::format!(
                "allocator returned {} bytes where {new_cap} were requested",
                region.capacity()
            )));
        }
        region.as_mut_slice()[..self.cap].copy_from_slice(self.window());
        let base = region.base_ptr();
        let kind = region.kind();
        let tether = RegionRc::tether(region, untethered.hook);
        // 旧系带的 Arc 在此丢弃一次；其它谱系（切分出的兄弟）不受影响。
        drop(self.count.retether(tether));
        self.base = base;
        self.cap = new_cap;
        self.kind = kind;
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.check_accessible()?;
        if self.read_only {
            return Err(read_only_error());
        }
        self.check_owned("compact")?;
        let (roff, woff) = (self.roff, self.woff);
        self.window_mut().copy_within(roff..woff, 0);
        self.woff = woff - roff;
        self.roff = 0;
        Ok(())
    }

    fn count_components(&self) -> usize {
        1
    }

    fn count_readable_components(&self) -> usize {
        usize::from(self.woff > self.roff)
    }

    fn count_writable_components(&self) -> usize {
        usize::from(!self.read_only && self.cap > self.woff)
    }

    fn for_each_readable(
        &self,
        start_index: usize,
        processor: &mut ReadProcessor<'_>,
    ) -> Result<isize> {
        self.check_accessible()?;
        if self.roff == self.woff {
            return Ok(0);
        }
        let component = ReadableComponent::new(
            self.readable_chunk(),
            self.native_address_at(self.roff),
            self.kind,
        );
        Ok(if processor(start_index, component) { 1 } else { -1 })
    }

    fn for_each_writable(
        &mut self,
        start_index: usize,
        processor: &mut WriteProcessor<'_>,
    ) -> Result<isize> {
        self.check_accessible()?;
        self.check_writable()?;
        if self.woff == self.cap {
            return Ok(0);
        }
        let address = self.native_address_at(self.woff);
        let kind = self.kind;
        let component = WritableComponent::new(self.writable_chunk(), address, kind);
        Ok(if processor(start_index, component) { 1 } else { -1 })
    }

    fn open_cursor_at(&self, offset: usize, length: usize) -> Result<ByteCursor<'_>> {
        self.check_accessible()?;
        self.check_range(offset, length)?;
        let chunk = &self.window()[offset..offset + length];
        Ok(ByteCursor::over_chunks(alloc::vec![chunk], offset))
    }

    fn open_reverse_cursor_at(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<ReverseByteCursor<'_>> {
        self.check_accessible()?;
        if length == 0 {
            if offset > self.cap {
                return Err(BufferError::bounds(alloc::format!(
                    "reverse cursor offset {offset} exceeds capacity {}",
                    self.cap
                )));
            }
            return Ok(ReverseByteCursor::over_chunks(Vec::new(), offset, 0));
        }
        if offset >= self.cap {
            return Err(BufferError::bounds(alloc::format!(
                "reverse cursor offset {offset} exceeds capacity {}",
                self.cap
            )));
        }
        if length > offset + 1 {
            return Err(BufferError::bounds(alloc::format!(
                "reverse cursor of {length} bytes underflows offset {offset}"
            )));
        }
        let low = offset + 1 - length;
        let chunk = &self.window()[low..offset + 1];
        Ok(ReverseByteCursor::over_chunks(
            alloc::vec![chunk],
            offset,
            length,
        ))
    }
}

impl Drop for MemBuf {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MemBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemBuf")
            .field("kind", &self.kind)
            .field("capacity", &self.cap)
            .field("roff", &self.roff)
            .field("woff", &self.woff)
            .field("read_only", &self.read_only)
            .field("accessible", &self.accessible)
            .finish()
    }
}
