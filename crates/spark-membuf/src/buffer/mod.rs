pub mod composite;
pub mod interop;
pub mod mem;

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{
    cursor::{ByteCursor, ReverseByteCursor},
    error::{BufferError, Result},
    memory::MemoryKind,
    send::Envelope,
};

pub use composite::CompositeBuf;
pub use mem::MemBuf;

/// 多字节访问器使用的字节序。
///
/// 只影响 `read_*`/`get_*`/`write_*`/`set_*` 的多字节变体；游标与批量
/// 拷贝按字节工作，与字节序无关。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    BigEndian,
    LittleEndian,
}

impl ByteOrder {
    /// 目标平台的原生字节序；新分配缓冲的默认值。
    pub const fn native() -> Self {
        #[cfg(target_endian = "big")]
        {
            ByteOrder::BigEndian
        }
        #[cfg(target_endian = "little")]
        {
            ByteOrder::LittleEndian
        }
    }
}

/// 缓冲的形态标签：三种叶子后端加组合形态。
///
/// 构造时选定，此后不变；send 信封以它作为类型标签，保证
/// [`Envelope::is_kind`](crate::send::Envelope::is_kind) 在消费后依旧可信。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Heap,
    Direct,
    Segment,
    Composite,
}

impl From<MemoryKind> for BufferKind {
    fn from(kind: MemoryKind) -> Self {
        match kind {
            MemoryKind::Heap => BufferKind::Heap,
            MemoryKind::Direct => BufferKind::Direct,
            MemoryKind::Segment => BufferKind::Segment,
        }
    }
}

/// 散集 I/O 的只读组件视图。
///
/// 堆后端暴露数组切片（`has_readable_array`），直接/段后端暴露原生
/// 地址；两者都提供切片视图供就地读取。
pub struct ReadableComponent<'a> {
    bytes: &'a [u8],
    native_address: usize,
    kind: MemoryKind,
}

impl<'a> ReadableComponent<'a> {
    pub(crate) fn new(bytes: &'a [u8], native_address: usize, kind: MemoryKind) -> Self {
        Self {
            bytes,
            native_address,
            kind,
        }
    }

    /// 可读字节的切片视图。
    pub fn readable_slice(&self) -> &'a [u8] {
        self.bytes
    }

    /// 可读字节数。
    pub fn readable_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// 是否由堆数组承载。
    pub fn has_readable_array(&self) -> bool {
        matches!(self.kind, MemoryKind::Heap)
    }

    /// 可读区域起点的原生地址；堆后端返回 0。
    pub fn native_address(&self) -> usize {
        self.native_address
    }
}

/// 散集 I/O 的可写组件视图。
pub struct WritableComponent<'a> {
    bytes: &'a mut [u8],
    native_address: usize,
    kind: MemoryKind,
}

impl<'a> WritableComponent<'a> {
    pub(crate) fn new(bytes: &'a mut [u8], native_address: usize, kind: MemoryKind) -> Self {
        Self {
            bytes,
            native_address,
            kind,
        }
    }

    /// 可写字节的可变切片视图。
    pub fn writable_slice_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// 可写字节数。
    pub fn writable_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// 是否由堆数组承载。
    pub fn has_writable_array(&self) -> bool {
        matches!(self.kind, MemoryKind::Heap)
    }

    /// 可写区域起点的原生地址；堆后端返回 0。
    pub fn native_address(&self) -> usize {
        self.native_address
    }
}

/// 只读组件处理器；返回 `false` 提前终止遍历。
pub type ReadProcessor<'p> = dyn FnMut(usize, ReadableComponent<'_>) -> bool + 'p;

/// 可写组件处理器；返回 `false` 提前终止遍历。
pub type WriteProcessor<'p> = dyn FnMut(usize, WritableComponent<'_>) -> bool + 'p;

pub(crate) fn closed_error() -> BufferError {
    BufferError::closed("buffer is closed (it may have been sent)")
}

pub(crate) fn read_only_error() -> BufferError {
    BufferError::read_only("buffer is read-only")
}

pub(crate) fn borrowed_write_error() -> BufferError {
    BufferError::read_only("buffer is borrowed; writes require exclusive ownership")
}

/// 生成有符号/无符号/浮点访问器矩阵。
///
/// 每个条目展开为四个默认方法：`read_*`（读取并前进）、`get_*`（绝对
/// 偏移读取）、`write_*`（写入并前进）、`set_*`（绝对偏移写入），全部
/// 构建在 [`Buffer::copy_into_slice`] 与 [`Buffer::set_slice`] 两个原语
/// 之上，因此叶子与组合缓冲共享同一份字节序与越界语义。
macro_rules! numeric_accessors {
    ($({ $ty:ty, $read:ident, $get:ident, $write:ident, $set:ident }),+ $(,)?) => {
        $(
            #[doc = concat!("按当前字节序读取 `", stringify!($ty), "` 并前进读游标。")]
            fn $read(&mut self) -> Result<$ty> {
                let width = core::mem::size_of::<$ty>();
                if !self.is_accessible() {
                    return Err(closed_error());
                }
                if self.readable_bytes() < width {
                    return Err(BufferError::bounds(alloc::format!(
                        "cannot read {width} bytes: only {} readable",
                        self.readable_bytes()
                    )));
                }
                let offset = self.reader_offset();
                let value = self.$get(offset)?;
                self.set_reader_offset(offset + width)?;
                Ok(value)
            }

            #[doc = concat!("按当前字节序在绝对偏移处读取 `", stringify!($ty), "`，不移动游标。")]
            fn $get(&self, offset: usize) -> Result<$ty> {
                let mut raw = [0u8; core::mem::size_of::<$ty>()];
                self.copy_into_slice(offset, &mut raw)?;
                Ok(match self.order() {
                    ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
                    ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                })
            }

            #[doc = concat!("按当前字节序写入 `", stringify!($ty), "` 并前进写游标。")]
            fn $write(&mut self, value: $ty) -> Result<()> {
                let offset = self.writer_offset();
                self.$set(offset, value)?;
                self.set_writer_offset(offset + core::mem::size_of::<$ty>())
            }

            #[doc = concat!("按当前字节序在绝对偏移处写入 `", stringify!($ty), "`，不移动游标。")]
            fn $set(&mut self, offset: usize, value: $ty) -> Result<()> {
                let raw = match self.order() {
                    ByteOrder::BigEndian => value.to_be_bytes(),
                    ByteOrder::LittleEndian => value.to_le_bytes(),
                };
                self.set_slice(offset, &raw)
            }
        )+
    };
}

/// `Buffer` 是生命周期引擎的统一契约：叶子（堆/直接/段）与组合缓冲
/// 都实现它，调用方通过 `Box<dyn Buffer>` 进行后端无关的读写。
///
/// # 设计背景（Why）
/// - 网络框架的内存基座必须同时统一四件事：引用计数、可变性纪律、
///   有序读写游标、后端多态。旧设施把它们分摊在 `BytesMut` 的隐式
///   引用计数上，use-after-free 与别名写入只能靠约定防御；本契约把
///   它们收敛为显式状态机——`accessible`、`read_only`、`owned` 三个
///   谓词决定每个操作的成败。
/// - 对象安全优先：流水线各阶段需要在运行时混用不同后端的缓冲，
///   泛型化的零成本抽象会让处理器签名不可擦除。
///
/// # 状态机要点（What）
/// - `0 ≤ reader_offset ≤ writer_offset ≤ capacity` 恒成立；
/// - 只读缓冲拒绝一切字节变更与写游标前进（`buffer.read_only`）；
/// - 被借用（计数 > 1）的缓冲同样拒绝写入（仍报 `buffer.read_only`），
///   而形态操作（split/send/扩容/压实）报 `buffer.ownership`；
/// - 关闭或已发送的缓冲上，除可访问性查询外的数据操作一律报
///   `buffer.closed`；
/// - 失败的操作不得留下可观察副作用：写操作先校验、后落字节、最后
///   前进游标。
///
/// # 风险提示（Trade-offs）
/// - 元数据查询（容量、游标、字节序）在关闭后仍返回关闭前的最后值，
///   方便排障路径打印现场；数据通路则被 `accessible` 拦截。
pub trait Buffer: Send + Sync + fmt::Debug + 'static {
    /// 缓冲的形态标签。
    fn kind(&self) -> BufferKind;

    /// 总容量（字节），仅能通过显式扩容改变。
    fn capacity(&self) -> usize;

    /// 读游标。
    fn reader_offset(&self) -> usize;

    /// 写游标。
    fn writer_offset(&self) -> usize;

    /// 设置读游标；越过写游标返回 `buffer.bounds`。
    fn set_reader_offset(&mut self, offset: usize) -> Result<()>;

    /// 设置写游标；只读缓冲返回 `buffer.read_only`，范围为
    /// `[reader_offset, capacity]`。
    fn set_writer_offset(&mut self, offset: usize) -> Result<()>;

    /// 当前字节序。
    fn order(&self) -> ByteOrder;

    /// 设置字节序；组合缓冲会同步到所有组件。
    fn set_order(&mut self, order: ByteOrder) -> Result<()>;

    /// 是否只读。关闭后恒为 `false`。
    fn is_read_only(&self) -> bool;

    /// 置为只读；幂等，且在本实例上不可逆。
    fn make_read_only(&mut self) -> Result<()>;

    /// 是否可访问。关闭、被发送、或被 split 消费后为 `false`。
    fn is_accessible(&self) -> bool;

    /// 是否独占（共享计数为 1）；形态操作的前置条件。
    fn is_owned(&self) -> bool;

    /// 是否来自常量供应器的共享只读快照。
    fn is_const_view(&self) -> bool;

    /// 关闭本句柄：注销共享计数、标记不可访问、清除只读标记。幂等。
    fn close(&mut self);

    /// 游标不变的绝对读取：把 `[offset, offset + dest.len())` 拷入 `dest`。
    fn copy_into_slice(&self, offset: usize, dest: &mut [u8]) -> Result<()>;

    /// 游标不变的绝对写入：把 `src` 拷入 `[offset, offset + src.len())`。
    ///
    /// 写入前置检查按 关闭 → 只读/借用 → 越界 的顺序报告。
    fn set_slice(&mut self, offset: usize, src: &[u8]) -> Result<()>;

    /// 以 `value` 填充整个 `[0, capacity)`，不移动写游标；要求可写。
    fn fill(&mut self, value: u8) -> Result<()>;

    /// 在 `offset` 处切分：返回覆盖 `[0, offset)` 的新缓冲，本缓冲
    /// 收缩为 `[offset, capacity)`；两半各自独占，游标按区间钳制。
    fn split_at(&mut self, offset: usize) -> Result<Box<dyn Buffer>>;

    /// 返回共享内存的只读切片视图，容量为 `length`，游标覆盖全范围；
    /// 父缓冲的共享计数加一。
    fn slice_range(&self, offset: usize, length: usize) -> Result<Box<dyn Buffer>>;

    /// 登记一个额外持有者并返回新句柄；两者均不再独占。
    fn acquire(&self) -> Result<Box<dyn Buffer>>;

    /// 以借用语义复制出扁平化的叶子组件集合，供组合缓冲在构造时登记
    /// 所有权；叶子返回仅含自身克隆的单元素集合。
    fn acquire_parts(&self) -> Result<Vec<MemBuf>>;

    /// 发出所有权转移信封；本缓冲立即不可访问。要求独占。
    fn send(&mut self) -> Result<Envelope>;

    /// 确保至少 `size` 字节可写：必要时压实（`allow_compaction`）或向
    /// 分配器追加 `max(size - writable, minimum_growth)` 字节。要求独占
    /// 且可写。
    fn ensure_writable_with(
        &mut self,
        size: usize,
        minimum_growth: usize,
        allow_compaction: bool,
    ) -> Result<()>;

    /// 把 `[r, w)` 平移到区间起点，释放已读前缀；要求独占且可写。
    fn compact(&mut self) -> Result<()>;

    /// 组件总数；叶子为 1。
    fn count_components(&self) -> usize;

    /// 非空可读组件数。
    fn count_readable_components(&self) -> usize;

    /// 非空可写组件数。
    fn count_writable_components(&self) -> usize;

    /// 对每个非空可读组件调用一次处理器，编号从 `start_index` 递增；
    /// 返回处理个数，处理器提前终止时取负。
    fn for_each_readable(&self, start_index: usize, processor: &mut ReadProcessor<'_>)
    -> Result<isize>;

    /// 对每个非空可写组件调用一次处理器；语义同
    /// [`for_each_readable`](Buffer::for_each_readable)，要求可写。
    fn for_each_writable(
        &mut self,
        start_index: usize,
        processor: &mut WriteProcessor<'_>,
    ) -> Result<isize>;

    /// 打开覆盖绝对区间 `[offset, offset + length)` 的前向游标。
    fn open_cursor_at(&self, offset: usize, length: usize) -> Result<ByteCursor<'_>>;

    /// 打开反向游标：从 `offset` 处的字节开始向低地址走 `length` 字节。
    fn open_reverse_cursor_at(&self, offset: usize, length: usize)
    -> Result<ReverseByteCursor<'_>>;

    // ------------------------------------------------------------------
    // 以下为默认实现：两条原语之上的派生操作。
    // ------------------------------------------------------------------

    /// 可读字节数（`writer_offset - reader_offset`）。
    fn readable_bytes(&self) -> usize {
        self.writer_offset() - self.reader_offset()
    }

    /// 可写字节数（`capacity - writer_offset`）；只读缓冲为 0。
    fn writable_bytes(&self) -> usize {
        if self.is_read_only() {
            0
        } else {
            self.capacity() - self.writer_offset()
        }
    }

    /// 在写游标处切分，等价于 `split_at(writer_offset())`。
    fn split(&mut self) -> Result<Box<dyn Buffer>> {
        self.split_at(self.writer_offset())
    }

    /// 覆盖当前可读区间的切片视图。
    fn slice(&self) -> Result<Box<dyn Buffer>> {
        self.slice_range(self.reader_offset(), self.readable_bytes())
    }

    /// `ensure_writable_with(size, 0, false)`：扩容默认不挪动读游标。
    fn ensure_writable(&mut self, size: usize) -> Result<()> {
        self.ensure_writable_with(size, 0, false)
    }

    /// 打开覆盖当前可读区间的前向游标。
    fn open_cursor(&self) -> Result<ByteCursor<'_>> {
        self.open_cursor_at(self.reader_offset(), self.readable_bytes())
    }

    /// 打开覆盖当前可读区间的反向游标，从最后一个可读字节开始。
    fn open_reverse_cursor(&self) -> Result<ReverseByteCursor<'_>> {
        let readable = self.readable_bytes();
        if readable == 0 {
            self.open_reverse_cursor_at(self.reader_offset(), 0)
        } else {
            self.open_reverse_cursor_at(self.writer_offset() - 1, readable)
        }
    }

    /// 写入整个切片并前进写游标；空间不足返回 `buffer.bounds`。
    fn write_slice(&mut self, src: &[u8]) -> Result<()> {
        let offset = self.writer_offset();
        self.set_slice(offset, src)?;
        self.set_writer_offset(offset + src.len())
    }

    /// 读出 `dest.len()` 字节并前进读游标；不足返回 `buffer.bounds`。
    fn read_slice(&mut self, dest: &mut [u8]) -> Result<()> {
        if !self.is_accessible() {
            return Err(closed_error());
        }
        if self.readable_bytes() < dest.len() {
            return Err(BufferError::bounds(alloc::format!(
                "cannot read {} bytes: only {} readable",
                dest.len(),
                self.readable_bytes()
            )));
        }
        let offset = self.reader_offset();
        self.copy_into_slice(offset, dest)?;
        self.set_reader_offset(offset + dest.len())
    }

    /// 游标不变的跨缓冲拷贝：把本缓冲 `[src_pos, src_pos + length)` 写入
    /// `dest` 的 `[dest_pos, dest_pos + length)`。
    ///
    /// 经由中转缓冲完成，因此同一块底层内存的自拷贝也安全；两端的
    /// 字节序设置与拷贝无关。
    fn copy_into_buffer(
        &self,
        src_pos: usize,
        dest: &mut dyn Buffer,
        dest_pos: usize,
        length: usize,
    ) -> Result<()> {
        let mut staging = alloc::vec![0u8; length];
        self.copy_into_slice(src_pos, &mut staging)?;
        dest.set_slice(dest_pos, &staging)
    }

    /// 把 `source` 的整个可读区间转写进本缓冲，两端游标同步前进。
    fn write_bytes(&mut self, source: &mut dyn Buffer) -> Result<()> {
        let length = source.readable_bytes();
        let src_pos = source.reader_offset();
        let dest_pos = self.writer_offset();
        let mut staging = alloc::vec![0u8; length];
        source.copy_into_slice(src_pos, &mut staging)?;
        self.set_slice(dest_pos, &staging)?;
        source.set_reader_offset(src_pos + length)?;
        self.set_writer_offset(dest_pos + length)
    }

    numeric_accessors! {
        { u8,  read_u8,  get_u8,  write_u8,  set_u8  },
        { i8,  read_i8,  get_i8,  write_i8,  set_i8  },
        { u16, read_u16, get_u16, write_u16, set_u16 },
        { i16, read_i16, get_i16, write_i16, set_i16 },
        { u32, read_u32, get_u32, write_u32, set_u32 },
        { i32, read_i32, get_i32, write_i32, set_i32 },
        { u64, read_u64, get_u64, write_u64, set_u64 },
        { i64, read_i64, get_i64, write_i64, set_i64 },
        { f32, read_f32, get_f32, write_f32, set_f32 },
        { f64, read_f64, get_f64, write_f64, set_f64 },
    }

    /// 在绝对偏移处读取 24 位无符号整数（零扩展），不移动游标。
    fn get_unsigned_medium(&self, offset: usize) -> Result<u32> {
        let mut raw = [0u8; 3];
        self.copy_into_slice(offset, &mut raw)?;
        Ok(match self.order() {
            ByteOrder::BigEndian => {
                (u32::from(raw[0]) << 16) | (u32::from(raw[1]) << 8) | u32::from(raw[2])
            }
            ByteOrder::LittleEndian => {
                u32::from(raw[0]) | (u32::from(raw[1]) << 8) | (u32::from(raw[2]) << 16)
            }
        })
    }

    /// 在绝对偏移处读取 24 位有符号整数（自第 23 位符号扩展）。
    fn get_medium(&self, offset: usize) -> Result<i32> {
        let unsigned = self.get_unsigned_medium(offset)?;
        Ok(((unsigned << 8) as i32) >> 8)
    }

    /// 读取 24 位无符号整数并前进读游标。
    fn read_unsigned_medium(&mut self) -> Result<u32> {
        if !self.is_accessible() {
            return Err(closed_error());
        }
        if self.readable_bytes() < 3 {
            return Err(BufferError::bounds(alloc::format!(
                "cannot read 3 bytes: only {} readable",
                self.readable_bytes()
            )));
        }
        let offset = self.reader_offset();
        let value = self.get_unsigned_medium(offset)?;
        self.set_reader_offset(offset + 3)?;
        Ok(value)
    }

    /// 读取 24 位有符号整数并前进读游标。
    fn read_medium(&mut self) -> Result<i32> {
        let unsigned = self.read_unsigned_medium()?;
        Ok(((unsigned << 8) as i32) >> 8)
    }

    /// 在绝对偏移处写入 24 位整数的低 24 位，不移动游标。
    fn set_medium(&mut self, offset: usize, value: i32) -> Result<()> {
        let truncated = (value as u32) & 0x00FF_FFFF;
        let raw = match self.order() {
            ByteOrder::BigEndian => [
                (truncated >> 16) as u8,
                (truncated >> 8) as u8,
                truncated as u8,
            ],
            ByteOrder::LittleEndian => [
                truncated as u8,
                (truncated >> 8) as u8,
                (truncated >> 16) as u8,
            ],
        };
        self.set_slice(offset, &raw)
    }

    /// 写入 24 位整数的低 24 位并前进写游标。
    fn write_medium(&mut self, value: i32) -> Result<()> {
        let offset = self.writer_offset();
        self.set_medium(offset, value)?;
        self.set_writer_offset(offset + 3)
    }

    /// 在绝对偏移处读取 16 位码元并转换为 `char`。
    ///
    /// 码元落在代理区时返回 `buffer.argument`，不产生副作用。
    fn get_char(&self, offset: usize) -> Result<char> {
        let unit = self.get_u16(offset)?;
        char::from_u32(u32::from(unit)).ok_or_else(|| {
            BufferError::argument(alloc::format!(
                "code unit {unit:#06x} is a surrogate and has no scalar value"
            ))
        })
    }

    /// 读取 16 位码元为 `char` 并前进读游标。
    fn read_char(&mut self) -> Result<char> {
        if !self.is_accessible() {
            return Err(closed_error());
        }
        if self.readable_bytes() < 2 {
            return Err(BufferError::bounds(alloc::format!(
                "cannot read 2 bytes: only {} readable",
                self.readable_bytes()
            )));
        }
        let offset = self.reader_offset();
        let value = self.get_char(offset)?;
        self.set_reader_offset(offset + 2)?;
        Ok(value)
    }

    /// 在绝对偏移处写入 BMP 内的 `char`；超出 BMP 返回 `buffer.argument`。
    fn set_char(&mut self, offset: usize, value: char) -> Result<()> {
        let scalar = u32::from(value);
        if scalar > u32::from(u16::MAX) {
            return Err(BufferError::argument(alloc::format!(
                "character {value:?} is outside the basic multilingual plane"
            )));
        }
        self.set_u16(offset, scalar as u16)
    }

    /// 写入 BMP 内的 `char` 并前进写游标。
    fn write_char(&mut self, value: char) -> Result<()> {
        let offset = self.writer_offset();
        self.set_char(offset, value)?;
        self.set_writer_offset(offset + 2)
    }
}
