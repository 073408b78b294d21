//! `composite_contract` 集成测试：组合缓冲的构造、偏移翻译与形态操作。
//!
//! # 测试总览（Why）
//! - 组合以前缀和翻译绝对偏移，跨组件的多字节访问必须与叶子缓冲
//!   位精确一致；
//! - 构造校验（扁平化、字节序一致、游标无空洞）与组件所有权
//!   （构造即借用、关闭即归还）是组合正确性的根基；
//! - 切分、扩容、组件遍历都要与组件游标保持同步。

use spark_membuf::{
    Buffer, BufferAllocator, BufferKind, ByteOrder, CompositeBuf, ErrorKind, SystemAllocator,
};

fn filled(allocator: &SystemAllocator, bytes: &[u8]) -> Box<dyn Buffer> {
    let mut buf = allocator.allocate(bytes.len()).expect("分配不应失败");
    buf.write_slice(bytes).expect("预填充不应失败");
    buf
}

/// 组合容量为组件之和，游标从组件游标推导。
#[test]
fn compose_derives_capacity_and_cursors() {
    let allocator = SystemAllocator::heap();
    let a = filled(&allocator, &[1, 2, 3, 4]);
    let mut b = allocator.allocate(4).expect("分配第二块");
    b.write_u16(0x0506).expect("写入两字节");

    let composite =
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()]).expect("组合不应失败");
    assert_eq!(composite.kind(), BufferKind::Composite);
    assert_eq!(composite.capacity(), 8);
    assert_eq!(composite.reader_offset(), 0);
    assert_eq!(composite.writer_offset(), 6, "写游标为组件写游标之和");
    assert_eq!(composite.count_components(), 2);
    assert!(!composite.is_owned(), "组合借用组件，原句柄未关闭前不独占");

    drop(a);
    drop(b);
    assert!(composite.is_owned(), "原句柄关闭后组合获得独占");
}

/// 构造校验：混合字节序与游标空洞都被拒绝；组合的组件被扁平化。
#[test]
fn compose_validates_components_and_flattens() {
    let allocator = SystemAllocator::heap();
    let a = filled(&allocator, &[1, 2]);
    let mut b = allocator.allocate(2).expect("分配");
    let order = if a.order() == ByteOrder::BigEndian {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    };
    b.set_order(order).expect("制造混合字节序");
    assert_eq!(
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()])
            .expect_err("混合字节序应被拒绝")
            .kind(),
        ErrorKind::Argument
    );

    // 空洞：第一块有剩余可写空间，第二块却已有数据。
    let half = {
        let mut buf = allocator.allocate(4).expect("分配");
        buf.write_u8(9).expect("写一字节");
        buf
    };
    let full = filled(&allocator, &[7, 7]);
    assert_eq!(
        CompositeBuf::compose(&allocator, &[half.as_ref(), full.as_ref()])
            .expect_err("写游标空洞应被拒绝")
            .kind(),
        ErrorKind::Argument
    );

    // 扁平化：以组合为组件再组合，深度仍为一层。
    let inner_a = filled(&allocator, &[1]);
    let inner_b = filled(&allocator, &[2]);
    let inner = CompositeBuf::compose(&allocator, &[inner_a.as_ref(), inner_b.as_ref()])
        .expect("内层组合");
    let outer_c = filled(&allocator, &[3]);
    let outer = CompositeBuf::compose(&allocator, &[&inner as &dyn Buffer, outer_c.as_ref()])
        .expect("外层组合");
    assert_eq!(outer.count_components(), 3, "组合的组件应被拉平成叶子");
}

/// 跨组件边界的多字节读写与叶子位精确一致。
#[test]
fn accessors_span_component_boundaries() {
    let allocator = SystemAllocator::heap();
    let a = allocator.allocate(3).expect("分配 3 字节");
    let b = allocator.allocate(5).expect("分配 5 字节");
    let mut composite =
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()]).expect("组合");
    drop(a);
    drop(b);

    composite.set_order(ByteOrder::BigEndian).expect("设置大端");
    composite.write_u64(0x0102_0304_0506_0708).expect("跨界写 8 字节");
    assert_eq!(composite.writer_offset(), 8);
    assert_eq!(composite.get_u8(2).expect("第一组件末字节"), 0x03);
    assert_eq!(composite.get_u8(3).expect("第二组件首字节"), 0x04);
    assert_eq!(composite.read_u64().expect("跨界读"), 0x0102_0304_0506_0708);

    composite.set_reader_offset(1).expect("回拨读游标");
    assert_eq!(composite.get_u32(1).expect("跨界绝对读"), 0x0203_0405);
}

/// 组件遍历只访问非空段，编号连续，短路返回负计数。
#[test]
fn for_each_readable_visits_non_empty_segments_once() {
    let allocator = SystemAllocator::heap();
    let a = filled(&allocator, &[1, 2]);
    let empty = allocator.allocate(2).expect("空组件");
    let b = filled(&allocator, &[3]);
    let composite = CompositeBuf::compose(&allocator, &[a.as_ref(), empty.as_ref(), b.as_ref()])
        .expect("组合");

    let mut seen = Vec::new();
    let visited = composite
        .for_each_readable(0, &mut |index, component| {
            seen.push((index, component.readable_slice().to_vec()));
            true
        })
        .expect("遍历不应失败");
    assert_eq!(visited, 2, "空段不计入");
    assert_eq!(seen, vec![(0, vec![1, 2]), (1, vec![3])]);

    let visited = composite
        .for_each_readable(0, &mut |_, _| false)
        .expect("短路遍历");
    assert_eq!(visited, -1);
}

/// 组件边界切分直接划分列表，组件内切分先切分所在组件。
#[test]
fn split_partitions_the_component_list() {
    let allocator = SystemAllocator::heap();
    let a = filled(&allocator, &[1, 2, 3, 4]);
    let b = filled(&allocator, &[5, 6, 7, 8]);
    let mut composite =
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()]).expect("组合");
    drop(a);
    drop(b);

    // 组件内切分：偏移 2 落在第一组件中部。
    let mut front = composite.split_at(2).expect("组件内切分");
    assert_eq!(front.capacity(), 2);
    assert_eq!(front.count_components(), 1);
    assert_eq!(composite.capacity(), 6);
    assert_eq!(composite.count_components(), 2);
    assert_eq!(front.read_u8().expect("前半首字节"), 1);
    assert_eq!(composite.read_u8().expect("后半首字节"), 3);

    // 组件边界切分：剩余 [3,4 | 5..8]，偏移 2 即边界。
    let mut boundary = composite.split_at(2).expect("边界切分");
    assert_eq!(boundary.count_components(), 1);
    assert_eq!(composite.count_components(), 1);
    assert_eq!(composite.get_u8(0).expect("边界后的首字节"), 5);

    front.close();
    boundary.close();
    assert!(composite.is_owned(), "切分产物关闭不影响剩余部分");
}

/// 组合扩容追加新组件而非搬移内存。
#[test]
fn ensure_writable_appends_a_component() {
    let allocator = SystemAllocator::heap();
    let a = filled(&allocator, &[1, 2, 3, 4]);
    let mut composite = CompositeBuf::compose(&allocator, &[a.as_ref()]).expect("组合");
    drop(a);

    assert_eq!(composite.writable_bytes(), 0);
    composite.ensure_writable(8).expect("扩容不应失败");
    assert_eq!(composite.count_components(), 2, "扩容追加组件");
    assert!(composite.capacity() >= 12);
    assert_eq!(composite.get_u8(0).expect("原内容保留"), 1);
    composite.write_u64(7).expect("新空间可写");

    // 压实路径：消费前缀后允许压实时不追加组件。
    let b = filled(&allocator, &[9, 9, 9, 9]);
    let mut compactable = CompositeBuf::compose(&allocator, &[b.as_ref()]).expect("组合");
    drop(b);
    compactable.read_u16().expect("消费 2 字节");
    compactable.ensure_writable_with(2, 0, true).expect("压实");
    assert_eq!(compactable.count_components(), 1, "压实不追加组件");
    assert_eq!(compactable.reader_offset(), 0);
    assert_eq!(compactable.writer_offset(), 2);
}

/// 只读是组件只读的析取，且可在组合上独立闭锁。
#[test]
fn read_only_is_a_disjunction_and_latches() {
    let allocator = SystemAllocator::heap();
    let mut a = allocator.allocate(2).expect("分配");
    a.make_read_only().expect("组件只读");
    let b = allocator.allocate(2).expect("分配");
    let composite =
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()]).expect("组合");
    assert!(composite.is_read_only(), "任一组件只读则组合只读");

    let c = allocator.allocate(2).expect("分配");
    let mut writable = CompositeBuf::compose(&allocator, &[c.as_ref()]).expect("组合");
    drop(c);
    assert!(!writable.is_read_only());
    writable.make_read_only().expect("组合独立闭锁");
    assert_eq!(
        writable.write_u8(0).expect_err("只读组合拒绝写").kind(),
        ErrorKind::ReadOnly
    );
}

/// 空组合合法：容量 0、独占、可发送。
#[test]
fn empty_composite_is_legal_and_sendable() {
    let allocator = SystemAllocator::heap();
    let mut empty = CompositeBuf::compose(&allocator, &[]).expect("空组合");
    assert_eq!(empty.capacity(), 0);
    assert_eq!(empty.count_components(), 0);
    assert!(empty.is_owned());
    assert!(empty.is_accessible());

    let envelope = empty.send().expect("空组合可发送");
    assert!(envelope.is_kind(BufferKind::Composite));
    let received = envelope.receive().expect("接收空组合");
    assert_eq!(received.capacity(), 0);
    assert!(received.is_owned());
}

/// 跨后端、跨字节序的 write_bytes 保持字节一致并按约前进游标。
#[test]
fn write_bytes_drains_across_backends_and_orders() {
    let heap = SystemAllocator::heap();
    let direct = SystemAllocator::direct();
    let payload: Vec<u8> = (1..=35).collect();
    let mut source = heap.allocate(35).expect("源分配");
    source.set_order(ByteOrder::BigEndian).expect("源大端");
    source.write_slice(&payload).expect("填充源");

    let a = direct.allocate(20).expect("目标组件一");
    let b = direct.allocate(17).expect("目标组件二");
    let mut target = CompositeBuf::compose(&direct, &[a.as_ref(), b.as_ref()]).expect("组合目标");
    drop(a);
    drop(b);
    target.set_order(ByteOrder::LittleEndian).expect("目标小端");

    target.write_bytes(source.as_mut()).expect("转写全部可读字节");
    assert_eq!(target.reader_offset(), 0);
    assert_eq!(target.writer_offset(), 35);
    assert_eq!(source.reader_offset(), 35);
    assert_eq!(source.writer_offset(), 35);

    let mut copy = vec![0u8; 35];
    target.copy_into_slice(0, &mut copy).expect("读回目标");
    assert_eq!(copy, payload, "字节序设置与拷贝无关");
}

/// 组合游标与组件游标保持一致（不变式 7）。
#[test]
fn composite_cursors_stay_consistent_with_components() {
    let allocator = SystemAllocator::heap();
    let a = allocator.allocate(4).expect("分配");
    let b = allocator.allocate(4).expect("分配");
    let mut composite =
        CompositeBuf::compose(&allocator, &[a.as_ref(), b.as_ref()]).expect("组合");
    drop(a);
    drop(b);

    composite.write_slice(&[1, 2, 3, 4, 5, 6]).expect("写 6 字节");
    composite.read_slice(&mut [0u8; 5]).expect("读 5 字节");

    let mut spans = Vec::new();
    composite
        .for_each_readable(0, &mut |_, component| {
            spans.push(component.readable_slice().to_vec());
            true
        })
        .expect("遍历");
    assert_eq!(spans, vec![vec![6u8]], "只剩第二组件的一个可读字节");

    let mut writable = 0;
    composite
        .for_each_writable(0, &mut |_, component| {
            writable += component.writable_bytes();
            true
        })
        .expect("可写遍历");
    assert_eq!(writable, 2, "可写空间只在第二组件尾部");
}
