use alloc::vec::Vec;

/// `ByteCursor` 是覆盖绝对区间的前向字节游标。
///
/// # 设计背景（Why）
/// - 协议扫描（定界符查找、校验和、特征匹配）需要一条与缓冲字节序
///   设置无关的稳定字节流；游标固定以大端组装 64 位读取，调用方不必
///   关心缓冲当前的 order 配置。
/// - 游标在构造时借用缓冲（`&self`），借用检查器保证遍历期间没有任何
///   写入路径可达，这正是“稳定行走”所需的别名保证。
///
/// # 契约说明（What）
/// - `read_byte`/`read_long` 返回是否成功；成功后 `get_byte`/`get_long`
///   暴露最近一次读到的值；
/// - 剩余字节不足 8 时 `read_long` 返回 `false` 且不消费任何字节；
/// - `current_offset` 为下一个待读字节的绝对偏移，`bytes_left` 为剩余
///   可读字节数。
#[derive(Debug)]
pub struct ByteCursor<'a> {
    chunks: Vec<&'a [u8]>,
    chunk: usize,
    pos: usize,
    start: usize,
    length: usize,
    remaining: usize,
    last_byte: u8,
    last_long: i64,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn over_chunks(chunks: Vec<&'a [u8]>, start: usize) -> Self {
        let length = chunks.iter().map(|c| c.len()).sum();
        Self {
            chunks,
            chunk: 0,
            pos: 0,
            start,
            length,
            remaining: length,
            last_byte: 0,
            last_long: 0,
        }
    }

    /// 取走下一个字节；调用方保证 `remaining > 0`。
    fn take(&mut self) -> u8 {
        while self.pos >= self.chunks[self.chunk].len() {
            self.chunk += 1;
            self.pos = 0;
        }
        let byte = self.chunks[self.chunk][self.pos];
        self.pos += 1;
        self.remaining -= 1;
        byte
    }

    /// 读取一个字节；成功时可通过 [`get_byte`](Self::get_byte) 取值。
    pub fn read_byte(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.last_byte = self.take();
        true
    }

    /// 最近一次成功读取的字节。
    pub fn get_byte(&self) -> u8 {
        self.last_byte
    }

    /// 以大端序读取 8 字节；不足 8 字节时返回 `false` 且不消费。
    pub fn read_long(&mut self) -> bool {
        if self.remaining < 8 {
            return false;
        }
        let mut raw = [0u8; 8];
        for slot in raw.iter_mut() {
            *slot = self.take();
        }
        self.last_long = i64::from_be_bytes(raw);
        true
    }

    /// 最近一次成功读取的 64 位值。
    pub fn get_long(&self) -> i64 {
        self.last_long
    }

    /// 下一个待读字节的绝对偏移。
    pub fn current_offset(&self) -> usize {
        self.start + (self.length - self.remaining)
    }

    /// 剩余可读字节数。
    pub fn bytes_left(&self) -> usize {
        self.remaining
    }
}

/// `ReverseByteCursor` 自高地址向低地址行走。
///
/// 64 位读取消费游标下方（含游标处）的 8 个字节，并按小端组装：
/// 与前向游标在同一段大端写入的数据上读取，二者互为字节翻转。
pub struct ReverseByteCursor<'a> {
    chunks: Vec<&'a [u8]>,
    chunk: usize,
    pos: usize,
    start: usize,
    length: usize,
    remaining: usize,
    last_byte: u8,
    last_long: i64,
}

impl<'a> ReverseByteCursor<'a> {
    pub(crate) fn over_chunks(chunks: Vec<&'a [u8]>, start: usize, length: usize) -> Self {
        debug_assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), length);
        let chunk = chunks.len();
        Self {
            chunks,
            chunk,
            pos: 0,
            start,
            length,
            remaining: length,
            last_byte: 0,
            last_long: 0,
        }
    }

    /// 取走当前最高地址处的字节；调用方保证 `remaining > 0`。
    fn take_back(&mut self) -> u8 {
        while self.pos == 0 {
            self.chunk -= 1;
            self.pos = self.chunks[self.chunk].len();
        }
        self.pos -= 1;
        let byte = self.chunks[self.chunk][self.pos];
        self.remaining -= 1;
        byte
    }

    /// 读取一个字节并向低地址前进。
    pub fn read_byte(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.last_byte = self.take_back();
        true
    }

    /// 最近一次成功读取的字节。
    pub fn get_byte(&self) -> u8 {
        self.last_byte
    }

    /// 消费游标下方的 8 个字节并按小端组装；不足时返回 `false`。
    pub fn read_long(&mut self) -> bool {
        if self.remaining < 8 {
            return false;
        }
        let mut raw = [0u8; 8];
        for index in (0..8).rev() {
            raw[index] = self.take_back();
        }
        self.last_long = i64::from_le_bytes(raw);
        true
    }

    /// 最近一次成功读取的 64 位值。
    pub fn get_long(&self) -> i64 {
        self.last_long
    }

    /// 下一个待读字节的绝对偏移；区间耗尽后停在区间下界。
    pub fn current_offset(&self) -> usize {
        self.start.saturating_sub(self.length - self.remaining)
    }

    /// 剩余可读字节数。
    pub fn bytes_left(&self) -> usize {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 前向游标固定按大端组装，跨块边界也保持字节顺序。
    #[test]
    fn forward_cursor_reads_big_endian_across_chunks() {
        let head: &[u8] = &[0x01, 0x02, 0x03];
        let tail: &[u8] = &[0x04, 0x05, 0x06, 0x07, 0x08, 0xFF];
        let mut cursor = ByteCursor::over_chunks(alloc::vec![head, tail], 4);
        assert_eq!(cursor.bytes_left(), 9);
        assert!(cursor.read_long());
        assert_eq!(cursor.get_long(), 0x0102030405060708);
        assert_eq!(cursor.current_offset(), 12);
        assert!(cursor.read_byte());
        assert_eq!(cursor.get_byte(), 0xFF);
        assert!(!cursor.read_byte(), "区间耗尽后应返回 false");
    }

    /// 反向游标按小端组装，读到前向结果的字节翻转。
    #[test]
    fn reverse_cursor_reads_little_endian_from_the_top() {
        let bytes: &[u8] = &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut cursor = ReverseByteCursor::over_chunks(alloc::vec![bytes], 7, 8);
        assert!(cursor.read_long());
        assert_eq!(cursor.get_long(), 0x0807060504030201);
        assert!(!cursor.read_byte());
    }

    /// 剩余不足 8 字节时 read_long 不消费任何字节。
    #[test]
    fn read_long_does_not_consume_on_underflow() {
        let bytes: &[u8] = &[1, 2, 3];
        let mut cursor = ByteCursor::over_chunks(alloc::vec![bytes], 0);
        assert!(!cursor.read_long());
        assert_eq!(cursor.bytes_left(), 3);
        assert!(cursor.read_byte());
        assert_eq!(cursor.get_byte(), 1);
    }
}
