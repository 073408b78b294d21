use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    fmt,
    sync::atomic::{Ordering, fence},
};

use crate::{
    allocator::{AllocatorControl, BufferAllocator},
    buffer::{
        Buffer, BufferKind, ByteOrder, MemBuf, ReadProcessor, ReadableComponent,
        WritableComponent, WriteProcessor, borrowed_write_error, closed_error, read_only_error,
    },
    cursor::{ByteCursor, ReverseByteCursor},
    error::{BufferError, Result},
    send::{CompositeState, Envelope},
};

/// `CompositeBuf` 把若干叶子缓冲首尾相接为一条逻辑字节区间。
///
/// # 设计背景（Why）
/// - 协议栈经常需要在不拷贝的前提下拼接报文头与负载；组合缓冲以前缀
///   和翻译绝对偏移，把同一份契约投影到组件列表之上。
/// - 组件在构造时被扁平化（组合的组件仍是叶子），树深恒为一层，
///   偏移翻译没有递归成本。
///
/// # 不变式（What）
/// - 所有组件字节序一致（构造时校验，`set_order` 统一同步）；
/// - 组合游标与组件游标始终一致：`[0, r)` 已消费、`[r, w)` 可读、
///   `[w, capacity)` 可写，逐组件钳制；
/// - 只读标志是组件只读的析取，且可在组合上独立闭锁；
/// - 空组合合法：容量 0，可独占、可发送。
pub struct CompositeBuf {
    parts: Vec<MemBuf>,
    cap: usize,
    roff: usize,
    woff: usize,
    order: ByteOrder,
    read_only: bool,
    accessible: bool,
    count: Arc<crate::reclaim::SharedCount>,
    control: Arc<dyn AllocatorControl>,
}

impl CompositeBuf {
    /// 以借用语义把 `components` 组合成一条缓冲。
    ///
    /// # 契约说明（What）
    /// - 每个组件的共享计数加一，组合在关闭时归还；在调用方关闭自己
    ///   的原句柄之前，组合及其组件都处于被借用状态；
    /// - 组件中的组合缓冲被扁平化为叶子；
    /// - 校验：组件均可访问（`buffer.closed`）、字节序一致且游标无空洞
    ///   （`buffer.argument`）。
    pub fn compose(
        allocator: &dyn BufferAllocator,
        components: &[&dyn Buffer],
    ) -> Result<CompositeBuf> {
        let control = allocator.control();
        let mut parts: Vec<MemBuf> = Vec::new();
        for component in components {
            if !component.is_accessible() {
                return Err(closed_error());
            }
            parts.extend(component.acquire_parts()?);
        }

        let order = parts.first().map_or(ByteOrder::native(), |p| p.order());
        if parts.iter().any(|p| p.order() != order) {
            return Err(BufferError::argument(
                "cannot compose buffers with mixed byte orders",
            ));
        }

        // 游标连续性：已写字节不得出现在可写空洞之后，已读字节不得
        // 出现在未读数据之后，否则组合游标无法与组件游标保持一致。
        let mut saw_writable_gap = false;
        let mut saw_unread = false;
        let mut roff = 0;
        let mut woff = 0;
        let mut cap = 0usize;
        for part in &parts {
            if saw_writable_gap && part.writer_offset() > 0 {
                return Err(BufferError::argument(
                    "cannot compose: component with written bytes after a writable gap",
                ));
            }
            if saw_unread && part.reader_offset() > 0 {
                return Err(BufferError::argument(
                    "cannot compose: component with read bytes after unread data",
                ));
            }
            if part.writer_offset() < part.capacity() {
                saw_writable_gap = true;
            }
            if part.reader_offset() < part.writer_offset() {
                saw_unread = true;
            }
            roff += part.reader_offset();
            woff += part.writer_offset();
            cap += part.capacity();
        }

        let read_only = parts.iter().any(|p| p.is_read_only());
        Ok(CompositeBuf {
            parts,
            cap,
            roff,
            woff,
            order,
            read_only,
            accessible: true,
            count: crate::reclaim::SharedCount::new(None),
            control,
        })
    }

    /// 从发送快照重建组合缓冲（计数 1）。
    pub(crate) fn from_state(state: CompositeState) -> Self {
        let parts: Vec<MemBuf> = state.parts.into_iter().map(MemBuf::from_leaf_state).collect();
        let cap = parts.iter().map(|p| p.capacity()).sum();
        Self {
            parts,
            cap,
            roff: state.roff,
            woff: state.woff,
            order: state.order,
            read_only: state.read_only,
            accessible: true,
            count: crate::reclaim::SharedCount::new(None),
            control: state.control,
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
        if !self.is_owned() {
            return Err(borrowed_write_error());
        }
        Ok(())
    }

    fn check_owned(&self, operation: &str) -> Result<()> {
        if self.is_owned() {
            Ok(())
        } else {
            Err(BufferError::ownership(alloc::format!(
                "{operation} requires exclusive ownership of the composite and all components",
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

    /// 把组合游标投影回每个组件。
    fn sync_part_cursors(&mut self) {
        let (roff, woff) = (self.roff, self.woff);
        let mut start = 0;
        for part in &mut self.parts {
            let cap = part.capacity();
            let local_r = roff.saturating_sub(start).min(cap);
            let local_w = woff.saturating_sub(start).min(cap);
            part.set_span_raw(local_r, local_w);
            start += cap;
        }
    }

    /// 定位绝对偏移所在组件；`offset == capacity` 返回 `(len, 0)`。
    fn locate(&self, offset: usize) -> (usize, usize) {
        let mut start = 0;
        for (index, part) in self.parts.iter().enumerate() {
            let end = start + part.capacity();
            if offset < end {
                return (index, offset - start);
            }
            start = end;
        }
        (self.parts.len(), 0)
    }

    /// 组合读路径的首个非空可读块。
    pub(crate) fn first_readable_chunk(&self) -> Option<&[u8]> {
        self.parts
            .iter()
            .map(|p| p.readable_chunk())
            .find(|chunk| !chunk.is_empty())
    }

    /// 组合写路径的首个非空可写块。
    pub(crate) fn first_writable_chunk(&mut self) -> Option<&mut [u8]> {
        self.parts
            .iter_mut()
            .map(|p| p.writable_chunk())
            .find(|chunk| !chunk.is_empty())
    }
}

impl Buffer for CompositeBuf {
    fn kind(&self) -> BufferKind {
        BufferKind::Composite
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
        self.sync_part_cursors();
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
        self.sync_part_cursors();
        Ok(())
    }

    fn order(&self) -> ByteOrder {
        self.order
    }

    fn set_order(&mut self, order: ByteOrder) -> Result<()> {
        self.check_accessible()?;
        self.order = order;
        for part in &mut self.parts {
            part.set_order_raw(order);
        }
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
        self.accessible && self.count.is_owned() && self.parts.iter().all(|p| p.is_owned())
    }

    fn is_const_view(&self) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|p| p.is_const_view())
    }

    fn close(&mut self) {
        if !self.accessible {
            return;
        }
        self.accessible = false;
        self.read_only = false;
        for part in &mut self.parts {
            part.close();
        }
        self.count.release();
    }

    fn copy_into_slice(&self, offset: usize, dest: &mut [u8]) -> Result<()> {
        self.check_accessible()?;
        self.check_range(offset, dest.len())?;
        let mut start = 0;
        let mut copied = 0;
        for part in &self.parts {
            let cap = part.capacity();
            let end = start + cap;
            if copied < dest.len() && offset + copied < end {
                let local = offset + copied - start;
                let take = (cap - local).min(dest.len() - copied);
                part.copy_into_slice(local, &mut dest[copied..copied + take])?;
                copied += take;
            }
            start = end;
        }
        Ok(())
    }

    fn set_slice(&mut self, offset: usize, src: &[u8]) -> Result<()> {
        self.check_accessible()?;
        self.check_writable()?;
        self.check_range(offset, src.len())?;
        let mut start = 0;
        let mut written = 0;
        for part in &mut self.parts {
            let cap = part.capacity();
            let end = start + cap;
            if written < src.len() && offset + written < end {
                let local = offset + written - start;
                let take = (cap - local).min(src.len() - written);
                part.set_slice(local, &src[written..written + take])?;
                written += take;
            }
            start = end;
        }
        Ok(())
    }

    fn fill(&mut self, value: u8) -> Result<()> {
        self.check_accessible()?;
        self.check_writable()?;
        for part in &mut self.parts {
            part.fill(value)?;
        }
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
        let (index, local) = self.locate(offset);
        let mut front_parts: Vec<MemBuf> = self.parts.drain(..index).collect();
        if local > 0 {
            front_parts.push(self.parts[0].split_leaf(local)?);
        }
        let front = CompositeBuf {
            parts: front_parts,
            cap: offset,
            roff: self.roff.min(offset),
            woff: self.woff.min(offset),
            order: self.order,
            read_only: self.read_only,
            accessible: true,
            count: crate::reclaim::SharedCount::new(None),
            control: Arc::clone(&self.control),
        };
        self.cap -= offset;
        self.roff = self.roff.max(offset) - offset;
        self.woff = self.woff.max(offset) - offset;
        Ok(Box::new(front))
    }

    fn slice_range(&self, offset: usize, length: usize) -> Result<Box<dyn Buffer>> {
        self.check_accessible()?;
        self.check_range(offset, length)?;
        self.count.acquire()?;
        let mut slices: Vec<MemBuf> = Vec::new();
        let mut start = 0;
        for part in &self.parts {
            let cap = part.capacity();
            let end = start + cap;
            let lo = offset.max(start);
            let hi = (offset + length).min(end);
            if lo < hi {
                match part.slice_leaf(lo - start, hi - lo) {
                    Ok(piece) => slices.push(piece),
                    Err(err) => {
                        // 部件借用回滚由句柄 Drop 完成，组合计数手动归还。
                        drop(slices);
                        self.count.release();
                        return Err(err);
                    }
                }
            }
            start = end;
        }
        Ok(Box::new(CompositeBuf {
            cap: length,
            roff: 0,
            woff: length,
            order: self.order,
            read_only: true,
            accessible: true,
            count: Arc::clone(&self.count),
            parts: slices,
            control: Arc::clone(&self.control),
        }))
    }

    fn acquire(&self) -> Result<Box<dyn Buffer>> {
        self.check_accessible()?;
        self.count.acquire()?;
        let mut parts = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            match part.acquire_leaf() {
                Ok(clone) => parts.push(clone),
                Err(err) => {
                    // 已借部件由 Drop 归还，组合计数手动回滚。
                    drop(parts);
                    self.count.release();
                    return Err(err);
                }
            }
        }
        Ok(Box::new(CompositeBuf {
            parts,
            cap: self.cap,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: self.read_only,
            accessible: true,
            count: Arc::clone(&self.count),
            control: Arc::clone(&self.control),
        }))
    }

    fn acquire_parts(&self) -> Result<Vec<MemBuf>> {
        self.check_accessible()?;
        self.parts.iter().map(MemBuf::acquire_leaf).collect()
    }

    fn send(&mut self) -> Result<Envelope> {
        if !self.accessible {
            return Err(BufferError::send_state(
                "Cannot send() a buffer that is closed or was already sent",
            ));
        }
        self.check_owned("send")?;
        let mut parts = Vec::with_capacity(self.parts.len());
        for part in &mut self.parts {
            parts.push(part.snapshot_for_send()?);
        }
        self.parts.clear();
        let state = CompositeState {
            parts,
            roff: self.roff,
            woff: self.woff,
            order: self.order,
            read_only: self.read_only,
            control: Arc::clone(&self.control),
        };
        self.accessible = false;
        self.read_only = false;
        self.count.release();
        fence(Ordering::SeqCst);
        Ok(Envelope::for_composite(state))
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
        // 组合扩容不重排现有内存，向分配器追加一个新组件。
        let growth = (size - writable).max(minimum_growth);
        let control = Arc::clone(&self.control);
        let untethered = control.allocate_untethered(&*self, growth)?;
        let mut part = MemBuf::adopt(
            untethered.region,
            untethered.hook,
            Arc::clone(&self.control),
        );
        part.set_order_raw(self.order);
        self.cap += part.capacity();
        self.parts.push(part);
        self.sync_part_cursors();
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        self.check_accessible()?;
        if self.read_only {
            return Err(read_only_error());
        }
        self.check_owned("compact")?;
        let readable = self.woff - self.roff;
        if self.roff == 0 {
            return Ok(());
        }
        let mut staging = alloc::vec![0u8; readable];
        self.copy_into_slice(self.roff, &mut staging)?;
        self.set_slice(0, &staging)?;
        self.roff = 0;
        self.woff = readable;
        self.sync_part_cursors();
        Ok(())
    }

    fn count_components(&self) -> usize {
        self.parts.len()
    }

    fn count_readable_components(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| p.count_readable_components() > 0)
            .count()
    }

    fn count_writable_components(&self) -> usize {
        if self.read_only {
            return 0;
        }
        self.parts
            .iter()
            .filter(|p| p.count_writable_components() > 0)
            .count()
    }

    fn for_each_readable(
        &self,
        start_index: usize,
        processor: &mut ReadProcessor<'_>,
    ) -> Result<isize> {
        self.check_accessible()?;
        let mut processed = 0isize;
        let mut index = start_index;
        for part in &self.parts {
            let chunk = part.readable_chunk();
            if chunk.is_empty() {
                continue;
            }
            let component = ReadableComponent::new(
                chunk,
                part.native_address_of_reader(),
                part.mem_kind(),
            );
            processed += 1;
            if !processor(index, component) {
                return Ok(-processed);
            }
            index += 1;
        }
        Ok(processed)
    }

    fn for_each_writable(
        &mut self,
        start_index: usize,
        processor: &mut WriteProcessor<'_>,
    ) -> Result<isize> {
        self.check_accessible()?;
        self.check_writable()?;
        let mut processed = 0isize;
        let mut index = start_index;
        for part in &mut self.parts {
            let address = part.native_address_of_writer();
            let kind = part.mem_kind();
            let chunk = part.writable_chunk();
            if chunk.is_empty() {
                continue;
            }
            let component = WritableComponent::new(chunk, address, kind);
            processed += 1;
            if !processor(index, component) {
                return Ok(-processed);
            }
            index += 1;
        }
        Ok(processed)
    }

    fn open_cursor_at(&self, offset: usize, length: usize) -> Result<ByteCursor<'_>> {
        self.check_accessible()?;
        self.check_range(offset, length)?;
        Ok(ByteCursor::over_chunks(
            self.chunks_in(offset, length),
            offset,
        ))
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
        Ok(ReverseByteCursor::over_chunks(
            self.chunks_in(low, length),
            offset,
            length,
        ))
    }
}

impl CompositeBuf {
    /// 收集绝对区间内每个组件的子切片。
    fn chunks_in(&self, offset: usize, length: usize) -> Vec<&[u8]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        for part in &self.parts {
            let cap = part.capacity();
            let end = start + cap;
            let lo = offset.max(start);
            let hi = (offset + length).min(end);
            if lo < hi {
                chunks.push(&part.window()[lo - start..hi - start]);
            }
            start = end;
        }
        chunks
    }
}

impl Drop for CompositeBuf {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for CompositeBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeBuf")
            .field("components", &self.parts.len())
            .field("capacity", &self.cap)
            .field("roff", &self.roff)
            .field("woff", &self.woff)
            .field("read_only", &self.read_only)
            .field("accessible", &self.accessible)
            .finish()
    }
}
