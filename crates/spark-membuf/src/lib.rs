#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::result_large_err)]
#![doc = "spark-membuf: 所有权驱动的零拷贝字节缓冲引擎。"]
#![doc = ""]
#![doc = "== 定位 =="]
#![doc = "本 crate 取代旧的引用计数缓冲设施，以显式的生命周期状态机（可访问、只读、独占）"]
#![doc = "在 API 形态与运行时检查两个层面杜绝 use-after-free、double-free 与别名写入，"]
#![doc = "同时保留零拷贝组合、原地扩容与散集 I/O 能力。"]
#![doc = ""]
#![doc = "== 形态一览 =="]
#![doc = "三种叶子后端（堆数组、直接内存、内存段）共用一份叶子实现，组合缓冲把组件"]
#![doc = "列表投影为同一契约；跨线程移交统一经由一次性的发送信封完成。"]

extern crate alloc;

pub mod allocator;
pub mod buffer;
pub mod cursor;
pub mod error;
pub mod holder;
pub mod memory;
pub mod reclaim;
pub mod send;

pub use allocator::{AllocatorControl, BufferAllocator, ConstBufferSupplier, SystemAllocator, Untethered};
pub use buffer::{
    Buffer, BufferKind, ByteOrder, CompositeBuf, MemBuf, ReadProcessor, ReadableComponent,
    WritableComponent, WriteProcessor,
};
pub use cursor::{ByteCursor, ReverseByteCursor};
pub use error::{BufferError, ErrorKind, Result, codes};
pub use holder::BufferHolder;
pub use memory::{
    DirectMemoryManager, HeapMemoryManager, MemoryKind, MemoryManager, OwnedRegion,
    SegmentMemoryManager, Sharing,
};
pub use reclaim::{BufferDrop, RegionRc, SharedCount, SystemReclaim};
pub use send::{Envelope, EnvelopeState};
