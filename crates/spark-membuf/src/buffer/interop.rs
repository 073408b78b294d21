//! `bytes` 生态的互操作层。
//!
//! 旧缓冲适配层与各编解码器以 `bytes::Buf`/`bytes::BufMut` 为公共语言；
//! 这里把叶子与组合缓冲适配到这两个契约上。两个 trait 的方法不可失败，
//! 因此契约违例（越界推进、对只读或被借用缓冲写入）转译为 panic，与
//! 核心契约对 `dyn` 写入缓冲的适配策略一致。

use bytes::buf::UninitSlice;

use crate::buffer::{Buffer, CompositeBuf, MemBuf};

fn empty_uninit_slice<'a>() -> &'a mut UninitSlice {
    // SAFETY: 悬垂指针允许用于零长度切片。
    unsafe { UninitSlice::from_raw_parts_mut(core::ptr::NonNull::<u8>::dangling().as_ptr(), 0) }
}

impl bytes::Buf for MemBuf {
    fn remaining(&self) -> usize {
        if self.is_accessible() {
            self.readable_bytes()
        } else {
            0
        }
    }

    fn chunk(&self) -> &[u8] {
        if self.is_accessible() {
            self.readable_chunk()
        } else {
            &[]
        }
    }

    fn advance(&mut self, cnt: usize) {
        if cnt == 0 {
            return;
        }
        let offset = self.reader_offset() + cnt;
        Buffer::set_reader_offset(self, offset)
            .unwrap_or_else(|err| panic!("MemBuf::advance failed: {err:?}"));
    }
}

// SAFETY: chunk_mut 暴露的窗口始终位于已分配区域内部；不可写状态下
// 返回空切片，BufMut 的默认写入路径会据此 panic 而不是越界。
unsafe impl bytes::BufMut for MemBuf {
    fn remaining_mut(&self) -> usize {
        if self.is_accessible() && !self.is_read_only() && self.is_owned() {
            self.capacity() - self.writer_offset()
        } else {
            0
        }
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        if cnt == 0 {
            return;
        }
        let offset = self.writer_offset() + cnt;
        Buffer::set_writer_offset(self, offset)
            .unwrap_or_else(|err| panic!("MemBuf::advance_mut failed: {err:?}"));
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        if bytes::BufMut::remaining_mut(self) == 0 {
            return empty_uninit_slice();
        }
        UninitSlice::new(self.writable_chunk())
    }
}

impl bytes::Buf for CompositeBuf {
    fn remaining(&self) -> usize {
        if self.is_accessible() {
            self.readable_bytes()
        } else {
            0
        }
    }

    fn chunk(&self) -> &[u8] {
        if !self.is_accessible() {
            return &[];
        }
        self.first_readable_chunk().unwrap_or(&[])
    }

    fn advance(&mut self, cnt: usize) {
        if cnt == 0 {
            return;
        }
        let offset = self.reader_offset() + cnt;
        Buffer::set_reader_offset(self, offset)
            .unwrap_or_else(|err| panic!("CompositeBuf::advance failed: {err:?}"));
    }
}

// SAFETY: 同叶子缓冲的实现；组合写入按组件推进，空隙由核心契约的
// 游标同步规则排除。
unsafe impl bytes::BufMut for CompositeBuf {
    fn remaining_mut(&self) -> usize {
        if self.is_accessible() && !self.is_read_only() && self.is_owned() {
            self.capacity() - self.writer_offset()
        } else {
            0
        }
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        if cnt == 0 {
            return;
        }
        let offset = self.writer_offset() + cnt;
        Buffer::set_writer_offset(self, offset)
            .unwrap_or_else(|err| panic!("CompositeBuf::advance_mut failed: {err:?}"));
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        if bytes::BufMut::remaining_mut(self) == 0 {
            return empty_uninit_slice();
        }
        match self.first_writable_chunk() {
            Some(chunk) => UninitSlice::new(chunk),
            None => empty_uninit_slice(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::allocator::{BufferAllocator, SystemAllocator};
    use crate::buffer::Buffer;
    use bytes::{Buf, BufMut};

    /// 经由 bytes 契约写入与读出，游标推进与核心契约一致。
    #[test]
    fn bytes_traits_round_trip_through_the_core_contract() {
        let allocator = SystemAllocator::heap();
        let mut buf = allocator.allocate(16).expect("分配不应失败");
        buf.write_slice(b"ab").expect("核心写入不应失败");

        // 叶子缓冲是具体类型才实现 bytes 契约；经由具体句柄演示。
        let mut leaf = crate::buffer::MemBuf::adopt(
            crate::memory::OwnedRegion::heap(8, crate::memory::Sharing::Confined)
                .expect("堆分配不应失败"),
            alloc::sync::Arc::new(crate::reclaim::SystemReclaim),
            allocator.control(),
        );
        leaf.put_slice(b"xyz");
        assert_eq!(leaf.writer_offset(), 3);
        assert_eq!(leaf.remaining(), 3);
        assert_eq!(leaf.chunk(), b"xyz");
        leaf.advance(1);
        assert_eq!(leaf.reader_offset(), 1);
        assert_eq!(leaf.chunk(), b"yz");
    }
}
