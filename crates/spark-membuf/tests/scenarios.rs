//! `scenarios` 集成测试：端到端串联场景与量化不变式。
//!
//! # 测试总览（Why）
//! - 把分配、读写、切分、发送、常量供应、跨后端转写串成完整用例，
//!   验证各组件协作时的可观察状态；
//! - 随机化不变式（proptest）覆盖手工用例难以穷举的切分点与
//!   游标组合。

use std::thread;

use proptest::prelude::*;
use spark_membuf::{
    Buffer, BufferAllocator, ByteOrder, CompositeBuf, ErrorKind, SystemAllocator,
};

/// 场景一：线性写后读。写入 8 字节长整数并读回，游标到达末尾。
#[test]
fn linear_write_then_read() {
    let allocator = SystemAllocator::heap();
    let mut buf = allocator.allocate(8).expect("分配不应失败");
    buf.write_i64(0x0102_0304_0506_0708).expect("写入");
    assert_eq!(buf.read_i64().expect("读回"), 0x0102_0304_0506_0708);
    assert_eq!(buf.reader_offset(), 8);
    assert_eq!(buf.writer_offset(), 8);
}

/// 场景二：多次切分各保其值，发送的一半在另一线程读出。
#[test]
fn split_keeps_halves_intact() {
    let allocator = SystemAllocator::heap();
    let mut buf = allocator.allocate(16).expect("分配不应失败");

    buf.write_i32(64).expect("写入 64");
    let mut a = buf.split().expect("切出 A");

    buf.write_i32(42).expect("写入 42");
    let mut sent = buf.split().expect("切出待发送的一半");
    let envelope = sent.send().expect("发送");

    buf.write_i32(72).expect("写入 72");
    let mut b = buf.split().expect("切出 B");

    let remote = thread::spawn(move || {
        let mut received = envelope.receive().expect("另一线程接收");
        received.read_i32().expect("读出发送值")
    });
    assert_eq!(remote.join().expect("线程应正常结束"), 42);

    buf.write_i32(32).expect("父缓冲继续写");
    assert_eq!(buf.read_i32().expect("父缓冲读回"), 32);
    assert_eq!(a.read_i32().expect("A 保持原值"), 64);
    assert_eq!(b.read_i32().expect("B 保持原值"), 72);
}

/// 场景三：常量供应器发放的句柄相互隔离，一律拒绝压实。
#[test]
fn const_supplier_isolation() {
    let allocator = SystemAllocator::heap();
    let supplier = allocator
        .const_supplier(&[1, 2, 3, 4])
        .expect("建立常量供应器");

    let mut first = supplier.get();
    let mut second = supplier.get();
    let third = supplier.get();

    for buf in [&mut first, &mut second] {
        assert!(buf.is_read_only());
        assert!(buf.is_const_view());
        let mut out = [0u8; 4];
        buf.read_slice(&mut out).expect("读出常量内容");
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(
            buf.compact().expect_err("常量视图拒绝压实").kind(),
            ErrorKind::ReadOnly
        );
    }
    assert_eq!(third.readable_bytes(), 4, "兄弟句柄不受影响");
}

/// 场景四：切片只读且引用计数正确，关闭切片后父缓冲恢复可写。
#[test]
fn slice_is_read_only_and_reference_counted() {
    let allocator = SystemAllocator::heap();
    let mut buf = allocator.allocate(8).expect("分配不应失败");
    for value in 1u8..=8 {
        buf.write_u8(value).expect("填充");
    }

    let mut slice = buf.slice().expect("切片");
    assert!(slice.is_read_only());
    assert_eq!(
        buf.write_u8(0).expect_err("切片存活期间父缓冲拒绝写").kind(),
        ErrorKind::ReadOnly
    );
    let mut out = [0u8; 8];
    slice.read_slice(&mut out).expect("切片内容与父一致");
    assert_eq!(out, [1, 2, 3, 4, 5, 6, 7, 8]);

    slice.close();
    assert!(buf.is_owned());
    buf.set_u8(0, 9).expect("关闭切片后父缓冲恢复可写");
}

/// 场景五：发送后的第二次发送以 `Cannot send()` 失败。
#[test]
fn second_send_fails_with_send_state() {
    let allocator = SystemAllocator::heap();
    let mut buf = allocator.allocate(8).expect("分配不应失败");
    let _envelope = buf.send().expect("首次发送");
    let err = buf.send().expect_err("第二次发送应失败");
    assert_eq!(err.kind(), ErrorKind::SendState);
    assert!(err.message().contains("Cannot send()"));
}

/// 场景六：跨后端转写 35 字节，目标切片与源内容一致。
#[test]
fn cross_backend_copy() {
    let payload: Vec<u8> = (1..=35).collect();
    let heap = SystemAllocator::heap();
    let direct = SystemAllocator::direct();

    let mut source = heap.allocate(35).expect("源分配");
    source.write_slice(&payload).expect("填充源");
    let mut target = direct.allocate(37).expect("目标分配");

    target.write_bytes(source.as_mut()).expect("转写");
    assert_eq!(target.reader_offset(), 0);
    assert_eq!(target.writer_offset(), 35);
    assert_eq!(source.reader_offset(), 35);
    assert_eq!(source.writer_offset(), 35);

    let mut slice = target.slice().expect("目标切片");
    let mut out = vec![0u8; 35];
    slice.read_slice(&mut out).expect("读出切片");
    assert_eq!(out, payload, "目标切片与源逐字节一致");
}

/// 大端写入经前向游标读回同样的位模式。
#[test]
fn cursor_round_trips_big_endian_longs() {
    let allocator = SystemAllocator::direct();
    let mut buf = allocator.allocate(24).expect("分配不应失败");
    buf.set_order(ByteOrder::BigEndian).expect("设置大端");
    for value in [i64::MIN, -1, 0, 1, 0x0102_0304_0506_0708, i64::MAX] {
        buf.set_writer_offset(0).expect("重置写游标");
        buf.set_reader_offset(0).expect("重置读游标");
        buf.write_i64(value).expect("写入");
        let mut cursor = buf.open_cursor().expect("游标");
        assert!(cursor.read_long());
        assert_eq!(cursor.get_long(), value, "大端位模式往返");
    }
}

proptest! {
    /// 任意切分点：两半容量互补，游标按钳制公式分布，各自独占。
    #[test]
    fn split_partitions_hold_for_any_offset(
        cap in 1usize..64,
        written in 0usize..64,
        read in 0usize..64,
        at in 0usize..64,
    ) {
        let written = written.min(cap);
        let read = read.min(written);
        let at = at.min(cap);

        let allocator = SystemAllocator::heap();
        let mut buf = allocator.allocate(cap).expect("分配不应失败");
        for index in 0..written {
            buf.write_u8(index as u8).expect("填充");
        }
        buf.set_reader_offset(read).expect("设置读游标");

        let front = buf.split_at(at).expect("切分");
        prop_assert_eq!(front.capacity() + buf.capacity(), cap);
        prop_assert_eq!(front.reader_offset(), read.min(at));
        prop_assert_eq!(front.writer_offset(), written.min(at));
        prop_assert_eq!(buf.reader_offset(), read.max(at) - at);
        prop_assert_eq!(buf.writer_offset(), written.max(at) - at);
        prop_assert!(front.is_owned());
        prop_assert!(buf.is_owned());

        // 两半读到的字节与写入的线性模式一致。
        for offset in 0..front.writer_offset().saturating_sub(front.reader_offset()) {
            let index = front.reader_offset() + offset;
            prop_assert_eq!(front.get_u8(index).expect("前半内容"), index as u8);
        }
        for offset in 0..buf.readable_bytes() {
            let index = buf.reader_offset() + offset;
            prop_assert_eq!(buf.get_u8(index).expect("后半内容"), (at + index) as u8);
        }
    }

    /// 扩容保持既有字节与游标不变。
    #[test]
    fn growth_preserves_contents(
        cap in 1usize..48,
        extra in 1usize..48,
    ) {
        let allocator = SystemAllocator::heap();
        let mut buf = allocator.allocate(cap).expect("分配不应失败");
        for index in 0..cap {
            buf.write_u8(index as u8).expect("填满");
        }
        buf.ensure_writable(extra).expect("扩容");
        prop_assert!(buf.capacity() >= cap + extra);
        prop_assert_eq!(buf.writer_offset(), cap);
        for index in 0..cap {
            prop_assert_eq!(buf.get_u8(index).expect("内容保留"), index as u8);
        }
    }

    /// 组合缓冲的绝对读与逐组件读一致。
    #[test]
    fn composite_offsets_translate_consistently(
        first in 1usize..16,
        second in 1usize..16,
        offset in 0usize..30,
    ) {
        let allocator = SystemAllocator::heap();
        let a = allocator.allocate(first).expect("分配");
        let b = allocator.allocate(second).expect("分配");
        let mut composite = CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()])
            .expect("组合");
        drop(a);
        drop(b);

        let cap = first + second;
        for index in 0..cap {
            composite.write_u8(index as u8).expect("填满");
        }
        let offset = offset.min(cap - 1);
        prop_assert_eq!(composite.get_u8(offset).expect("绝对读"), offset as u8);
    }
}
