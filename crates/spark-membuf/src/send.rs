use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::{
    ptr::NonNull,
    sync::atomic::{AtomicU8, Ordering, fence},
};

use spin::Mutex;

use crate::{
    allocator::AllocatorControl,
    buffer::{Buffer, BufferKind, ByteOrder, CompositeBuf, MemBuf},
    error::{BufferError, Result},
    memory::MemoryKind,
    reclaim::RegionRc,
};

const PENDING: u8 = 0;
const CONSUMED: u8 = 1;
const DISCARDED: u8 = 2;

/// 信封的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Pending,
    Consumed,
    Discarded,
}

/// 叶子缓冲的发送快照：系带加句柄状态。
pub(crate) struct LeafState {
    pub(crate) tether: Arc<RegionRc>,
    pub(crate) base: NonNull<u8>,
    pub(crate) cap: usize,
    pub(crate) roff: usize,
    pub(crate) woff: usize,
    pub(crate) order: ByteOrder,
    pub(crate) kind: MemoryKind,
    pub(crate) read_only: bool,
    pub(crate) const_view: bool,
    pub(crate) control: Arc<dyn AllocatorControl>,
}

/// 组合缓冲的发送快照：逐组件快照加组合级状态。
pub(crate) struct CompositeState {
    pub(crate) parts: Vec<LeafState>,
    pub(crate) roff: usize,
    pub(crate) woff: usize,
    pub(crate) order: ByteOrder,
    pub(crate) read_only: bool,
    pub(crate) control: Arc<dyn AllocatorControl>,
}

pub(crate) enum Payload {
    Leaf(LeafState),
    Composite(CompositeState),
}

/// `Envelope` 是一次性的所有权转移载体。
///
/// # 设计背景（Why）
/// - 跨线程移交可写缓冲的唯一合法途径：发送方在 `send()` 处让出独占
///   所有权并失去访问能力，接收方以全新的共享计数取回，全程不存在
///   两个线程同时可写同一块内存的窗口。
/// - 发送端与接收端各打一道全序栅栏，保证发送前的普通写入在接收后
///   全部可见（happens-before 边）。
///
/// # 状态机（What）
/// - `pending → consumed`（`receive`）或 `pending → discarded`
///   （`discard` 或信封被丢弃）；两者都是单向终态；
/// - 对非 `pending` 信封执行 `receive`/`discard` 返回
///   `buffer.send_state`；
/// - [`kind`](Envelope::kind) 在消费后依旧如实报告原缓冲的形态标签。
pub struct Envelope {
    kind: BufferKind,
    state: AtomicU8,
    payload: Mutex<Option<Payload>>,
}

// SAFETY: 快照中的裸指针仅表示独占转移的窗口基址；负载被互斥槽独占，
// 收发两端的 SeqCst 栅栏建立 happens-before。
unsafe impl Send for Envelope {}
unsafe impl Sync for Envelope {}

impl Envelope {
    pub(crate) fn for_leaf(state: LeafState) -> Self {
        Self {
            kind: state.kind.into(),
            state: AtomicU8::new(PENDING),
            payload: Mutex::new(Some(Payload::Leaf(state))),
        }
    }

    pub(crate) fn for_composite(state: CompositeState) -> Self {
        Self {
            kind: BufferKind::Composite,
            state: AtomicU8::new(PENDING),
            payload: Mutex::new(Some(Payload::Composite(state))),
        }
    }

    /// 原缓冲的形态标签；消费或丢弃之后依旧可信。
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    /// 判断信封是否承载指定形态的缓冲。
    pub fn is_kind(&self, kind: BufferKind) -> bool {
        self.kind == kind
    }

    /// 当前状态。
    pub fn state(&self) -> EnvelopeState {
        match self.state.load(Ordering::SeqCst) {
            PENDING => EnvelopeState::Pending,
            CONSUMED => EnvelopeState::Consumed,
            _ => EnvelopeState::Discarded,
        }
    }

    /// 在任意线程接收缓冲：返回携带原状态、计数为 1 的全新句柄。
    ///
    /// # 契约说明（What）
    /// - 只有第一次调用成功；此后返回 `buffer.send_state`；
    /// - 返回前打一道 `SeqCst` 栅栏，发送前的写入自此可见。
    pub fn receive(&self) -> Result<Box<dyn Buffer>> {
        self.state
            .compare_exchange(PENDING, CONSUMED, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                BufferError::send_state(
                    "cannot receive(): the envelope was already consumed or discarded",
                )
            })?;
        fence(Ordering::SeqCst);
        let payload = self
            .payload
            .lock()
            .take()
            .ok_or_else(|| BufferError::send_state("envelope payload already taken"))?;
        Ok(match payload {
            Payload::Leaf(state) => Box::new(MemBuf::from_leaf_state(state)),
            Payload::Composite(state) => Box::new(CompositeBuf::from_state(state)),
        })
    }

    /// 显式丢弃：释放承载的缓冲状态，级联触发内存回收。
    pub fn discard(&self) -> Result<()> {
        self.state
            .compare_exchange(PENDING, DISCARDED, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| {
                BufferError::send_state(
                    "cannot discard(): the envelope was already consumed or discarded",
                )
            })?;
        drop(self.payload.lock().take());
        tracing::debug!(kind = ?self.kind, "envelope discarded");
        Ok(())
    }
}

impl Drop for Envelope {
    fn drop(&mut self) {
        if self.state.load(Ordering::SeqCst) == PENDING {
            drop(self.payload.lock().take());
            tracing::debug!(kind = ?self.kind, "pending envelope dropped; payload discarded");
        }
    }
}

impl core::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Envelope")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
