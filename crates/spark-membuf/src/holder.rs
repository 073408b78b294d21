use alloc::boxed::Box;
use core::mem;

use crate::{
    buffer::Buffer,
    error::Result,
    send::Envelope,
};

/// `BufferHolder` 是“包装并中介一个缓冲”的用户类型基座。
///
/// # 设计背景（Why）
/// - 编解码产物、消息载体等用户类型往往持有恰好一个缓冲，并希望把
///   生命周期操作（替换、发送、关闭）集中到一处；基座统一这些样板，
///   让包装类型专注自身语义。
///
/// # 契约说明（What）
/// - 持有者始终恰好包装一个缓冲；`replace` 关闭旧缓冲后换入新缓冲；
/// - `send` 透传缓冲的所有权转移；此后内部缓冲不可访问，调用方应
///   尽快以 `replace`/`replace_with` 换入新内容或丢弃持有者。
pub struct BufferHolder {
    inner: Box<dyn Buffer>,
}

impl BufferHolder {
    /// 包装一个缓冲。
    pub fn new(inner: Box<dyn Buffer>) -> Self {
        Self { inner }
    }

    /// 从信封接收缓冲并包装，常用于跨线程接力。
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        Ok(Self {
            inner: envelope.receive()?,
        })
    }

    /// 访问内部缓冲。
    pub fn buffer(&self) -> &dyn Buffer {
        self.inner.as_ref()
    }

    /// 可变访问内部缓冲。
    pub fn buffer_mut(&mut self) -> &mut dyn Buffer {
        self.inner.as_mut()
    }

    /// 换入新缓冲，关闭旧缓冲。
    pub fn replace(&mut self, replacement: Box<dyn Buffer>) {
        let mut previous = mem::replace(&mut self.inner, replacement);
        previous.close();
    }

    /// 从信封接收并换入，关闭旧缓冲。
    pub fn replace_with(&mut self, envelope: &Envelope) -> Result<()> {
        let received = envelope.receive()?;
        self.replace(received);
        Ok(())
    }

    /// 发送内部缓冲；要求其独占且可访问。
    pub fn send(&mut self) -> Result<Envelope> {
        self.inner.send()
    }

    /// 关闭内部缓冲；幂等。
    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl core::fmt::Debug for BufferHolder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferHolder")
            .field("accessible", &self.inner.is_accessible())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}
