use alloc::borrow::Cow;
use core::fmt;

/// 缓冲操作的统一返回别名。
pub type Result<T, E = BufferError> = core::result::Result<T, E>;

/// `BufferError` 是缓冲引擎所有可观察故障的最终形态。
///
/// # 设计背景（Why）
/// - 生命周期引擎的失败路径（越界、关闭后访问、只读写入、所有权不足、
///   重复发送、非法参数）必须能被调用方精确区分，才能驱动自动化兜底：
///   例如编解码器遇到 `buffer.bounds` 时触发扩容重试，而 `buffer.closed`
///   则意味着逻辑错误，应当中断流水线。
/// - 延续核心契约的稳定错误码约定：`code` 为 `'static` 字符串，承载稳定
///   语义；`message` 面向排障人员，可携带现场数值。
///
/// # 契约说明（What）
/// - `code`：取自 [`codes`] 模块，遵循 `<域>.<语义>` 命名；
/// - `message`：人类可读描述，不含敏感信息；
/// - 所有失败均同步浮现于调用点，失败的操作不得留下可观察副作用
///   （游标、字节、引用计数均保持原值）。
///
/// # 风险提示（Trade-offs）
/// - `Cow` 允许热路径上的静态文案零分配，动态现场信息才触发堆分配。
#[derive(Debug)]
pub struct BufferError {
    code: &'static str,
    message: Cow<'static, str>,
}

/// 机读的错误类别，免去调用方解析错误码字符串。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// 偏移或长度超出操作允许的范围。
    Bounds,
    /// 缓冲、信封或共享计数已不可访问。
    Closed,
    /// 对只读（或被借用）缓冲执行了写操作。
    ReadOnly,
    /// 操作要求独占所有权，但缓冲处于被借用状态。
    Ownership,
    /// 重复发送，或对已消费/已丢弃的信封执行接收。
    SendState,
    /// 非法输入：混合字节序组件、超出 BMP 的字符等。
    Argument,
    /// 分配器已关闭。
    AllocatorClosed,
}

impl BufferError {
    /// 构造错误；`code` 应取自 [`codes`]，保证可观测链路的稳定识别符。
    pub fn new(code: &'static str, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// 越界错误。
    pub fn bounds(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_BOUNDS, message)
    }

    /// 关闭后访问错误。
    pub fn closed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_CLOSED, message)
    }

    /// 只读写入错误。
    pub fn read_only(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_READ_ONLY, message)
    }

    /// 所有权不足错误。
    pub fn ownership(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_OWNERSHIP, message)
    }

    /// 发送状态机错误。
    pub fn send_state(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_SEND_STATE, message)
    }

    /// 非法参数错误。
    pub fn argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::BUFFER_ARGUMENT, message)
    }

    /// 分配器关闭错误。
    pub fn allocator_closed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(codes::ALLOCATOR_CLOSED, message)
    }

    /// 获取稳定错误码。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 获取描述。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 返回机读类别。
    ///
    /// # 契约说明（What）
    /// - 类别由错误码查表得出；自定义错误码回退为 [`ErrorKind::Argument`]，
    ///   提醒调用方将其登记进 [`codes`] 模块。
    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::BUFFER_BOUNDS => ErrorKind::Bounds,
            codes::BUFFER_CLOSED => ErrorKind::Closed,
            codes::BUFFER_READ_ONLY => ErrorKind::ReadOnly,
            codes::BUFFER_OWNERSHIP => ErrorKind::Ownership,
            codes::BUFFER_SEND_STATE => ErrorKind::SendState,
            codes::ALLOCATOR_CLOSED => ErrorKind::AllocatorClosed,
            _ => ErrorKind::Argument,
        }
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl core::error::Error for BufferError {}

/// 缓冲引擎的错误码常量集合，确保可观测性系统具有稳定识别符。
pub mod codes {
    /// 偏移或长度越界。
    pub const BUFFER_BOUNDS: &str = "buffer.bounds";
    /// 缓冲已关闭或已被发送。
    pub const BUFFER_CLOSED: &str = "buffer.closed";
    /// 只读缓冲拒绝写入。
    pub const BUFFER_READ_ONLY: &str = "buffer.read_only";
    /// 操作要求独占所有权。
    pub const BUFFER_OWNERSHIP: &str = "buffer.ownership";
    /// 发送状态机违例。
    pub const BUFFER_SEND_STATE: &str = "buffer.send_state";
    /// 非法参数。
    pub const BUFFER_ARGUMENT: &str = "buffer.argument";
    /// 分配器已关闭。
    pub const ALLOCATOR_CLOSED: &str = "allocator.closed";
}

const _: fn() = || {
    fn assert_error_traits<T: core::error::Error + Send + Sync + 'static>() {}

    assert_error_traits::<BufferError>();
};
