use cldispatch::dispatch::padded_extent;
use cldispatch::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const VADD: &str = r#"
__kernel void vadd(__global const int* a, __global const int* b, __global int* c, uint n) {
    size_t i = get_global_id(0);
    if (i < n) {
        c[i] = a[i] + b[i];
    }
}
"#;

fn setup(library: KernelLibrary) -> (Context, CommandQueue) {
    let config = Config::builder().compute_units(4).build().unwrap();
    let enumerator = Enumerator::with_library(library, &config).unwrap();
    let device = enumerator.first_device(DeviceTypeFilter::ALL).unwrap();
    let context = Context::new(&[device], &config).unwrap();
    let queue = context.create_default_queue().unwrap();
    (context, queue)
}

fn build(context: &Context, source: &str, name: &str) -> Kernel {
    let program = context.create_program(source).unwrap();
    program.build(&[], "").unwrap();
    program.create_kernel(name).unwrap()
}

fn vadd_library() -> KernelLibrary {
    let library = KernelLibrary::new();
    library.register_fn("vadd", |item, args| {
        let i = item.global_id(0);
        let n = args.scalar::<u32>(3)? as usize;
        if i < n {
            let (a, b, c) = (args.global::<i32>(0)?, args.global::<i32>(1)?, args.global::<i32>(2)?);
            c.set(i, a.get(i)? + b.get(i)?)?;
        }
        Ok(())
    });
    library
}

#[test]
fn test_vector_add() {
    let (context, queue) = setup(vadd_library());
    let kernel = build(&context, VADD, "vadd");

    let a: Vec<i32> = (0..10).collect();
    let b: Vec<i32> = (0..10).map(|x| x * 2).collect();
    let buf_a = context.create_buffer_with_data(AccessMode::ReadOnly, &a).unwrap();
    let buf_b = context.create_buffer_with_data(AccessMode::ReadOnly, &b).unwrap();
    let buf_c = context.create_buffer(AccessMode::WriteOnly, 10 * 4).unwrap();

    kernel.set_arg(0, &buf_a).unwrap();
    kernel.set_arg(1, &buf_b).unwrap();
    kernel.set_arg(2, &buf_c).unwrap();
    kernel.set_arg(3, 10u32).unwrap();

    queue
        .enqueue_nd_range(&kernel, &NdRange::linear(10).with_local(&[5]), &[])
        .unwrap();
    let mut c = vec![0i32; 10];
    queue.read_buffer(&buf_c, 0, &mut c).unwrap();
    assert_eq!(c, (0..10).map(|x| x * 3).collect::<Vec<_>>());
    queue.finish().unwrap();
}

#[test]
fn test_padding_rounds_up_and_kernel_ignores_extra_ids() {
    assert_eq!(padded_extent(10, 5), Some(10));
    assert_eq!(padded_extent(11, 5), Some(15));

    let library = vadd_library();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    library.register_fn("count", move |item, args| {
        counter.fetch_add(1, Ordering::Relaxed);
        let n = args.scalar::<u32>(1)? as usize;
        assert_eq!(item.global_size(0), 15);
        if item.global_id(0) < n {
            args.global::<i32>(0)?.set(item.global_id(0), 1)?;
        }
        Ok(())
    });
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void count(__global int* out, uint n) {}", "count");

    let out = context.create_buffer(AccessMode::ReadWrite, 11 * 4).unwrap();
    kernel.set_arg(0, &out).unwrap();
    kernel.set_arg(1, 11u32).unwrap();
    queue
        .enqueue_nd_range(&kernel, &NdRange::linear(11).with_local(&[5]), &[])
        .unwrap()
        .wait()
        .unwrap();

    assert_eq!(seen.load(Ordering::Relaxed), 15);
    let mut host = vec![0i32; 11];
    queue.read_buffer(&out, 0, &mut host).unwrap();
    assert!(host.iter().all(|&v| v == 1));
}

#[test]
fn test_map_write_on_read_only_buffer_fails() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadOnly, 64).unwrap();
    let err = queue
        .enqueue_map_buffer(&buffer, true, MapMode::Write, 0, 64, &[])
        .unwrap_err();
    assert!(matches!(err, Error::AccessModeViolation { .. }));
    assert_eq!(err.category(), ErrorCategory::ArgumentBinding);

    let write_only = context.create_buffer(AccessMode::WriteOnly, 64).unwrap();
    assert!(queue
        .enqueue_map_buffer(&write_only, true, MapMode::Read, 0, 64, &[])
        .is_err());
    assert_eq!(buffer.live_mappings(), 0);
}

#[test]
fn test_write_then_read_round_trip() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadWrite, 256).unwrap();
    let data: Vec<f32> = (0..64).map(|i| i as f32 * 0.5).collect();

    queue.enqueue_write_buffer(&buffer, false, 0, &data, &[]).unwrap();
    let back = queue
        .enqueue_read_buffer::<f32>(&buffer, 0, 64, &[])
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(back, data);

    let tail = queue
        .enqueue_read_buffer::<f32>(&buffer, 60 * 4, 4, &[])
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(tail, &data[60..]);

    let err = queue.enqueue_read_buffer::<f32>(&buffer, 200, 32, &[]).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }));
}

#[test]
fn test_map_unmap_without_writes_leaves_contents() {
    let (context, queue) = setup(KernelLibrary::new());
    let original: Vec<u8> = (0..128u8).collect();
    let buffer = context.create_buffer_with_data(AccessMode::ReadWrite, &original).unwrap();

    let view = queue.enqueue_map_buffer(&buffer, true, MapMode::Read, 0, 128, &[]).unwrap();
    assert_eq!(view.bytes().unwrap(), &original[..]);
    queue.enqueue_unmap(&buffer, view, &[]).unwrap();

    let view = queue
        .enqueue_map_buffer(&buffer, true, MapMode::ReadWrite, 32, 64, &[])
        .unwrap();
    queue.enqueue_unmap(&buffer, view, &[]).unwrap();

    let mut after = vec![0u8; 128];
    queue.read_buffer(&buffer, 0, &mut after).unwrap();
    assert_eq!(after, original);
}

#[test]
fn test_mapped_writes_visible_after_unmap() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadWrite, 16 * 4).unwrap();

    let mut view = queue
        .enqueue_map_buffer(&buffer, true, MapMode::Write, 16, 32, &[])
        .unwrap();
    view.as_mut_slice::<u32>().unwrap().copy_from_slice(&[7; 8]);
    view.unmap(&[]).unwrap();

    let mut host = vec![0u32; 16];
    queue.read_buffer(&buffer, 0, &mut host).unwrap();
    assert_eq!(&host[..4], &[0; 4]);
    assert_eq!(&host[4..12], &[7; 8]);
    assert_eq!(&host[12..], &[0; 4]);
}

#[test]
fn test_dropped_view_is_unmapped() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadWrite, 8).unwrap();
    {
        let mut view = queue
            .enqueue_map_buffer(&buffer, true, MapMode::ReadWrite, 0, 8, &[])
            .unwrap();
        view.bytes_mut().unwrap().fill(0xab);
    }
    queue.finish().unwrap();
    assert_eq!(buffer.live_mappings(), 0);

    let mut host = [0u8; 8];
    queue.read_buffer(&buffer, 0, &mut host).unwrap();
    assert_eq!(host, [0xab; 8]);
}

#[test]
fn test_non_blocking_map_needs_wait() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer_with_data(AccessMode::ReadOnly, &[5u16; 8]).unwrap();
    let gate = context.create_user_event().unwrap();

    let mut view = queue
        .enqueue_map_buffer(&buffer, false, MapMode::Read, 0, 16, &[gate.event()])
        .unwrap();
    assert!(!view.is_ready());
    assert!(matches!(view.bytes(), Err(Error::MapNotReady)));
    assert!(matches!(view.bytes_mut(), Err(Error::AccessModeViolation { .. })));

    gate.complete().unwrap();
    view.wait().unwrap();
    assert_eq!(view.as_slice::<u16>().unwrap(), &[5; 8]);
    view.unmap(&[]).unwrap().wait().unwrap();
}

#[test]
fn test_concurrent_access_violation() {
    let library = vadd_library();
    let (context, queue) = setup(library);
    let kernel = build(&context, VADD, "vadd");
    let buffer = context.create_buffer(AccessMode::ReadWrite, 64).unwrap();

    let view = queue
        .enqueue_map_buffer(&buffer, true, MapMode::Read, 16, 16, &[])
        .unwrap();

    let err = queue.enqueue_read_buffer::<u8>(&buffer, 0, 20, &[]).unwrap_err();
    assert!(matches!(err, Error::ConcurrentAccessViolation { offset: 16, end: 20, .. }));
    assert_eq!(err.category(), ErrorCategory::SynchronizationViolation);
    assert!(queue.enqueue_write_buffer(&buffer, true, 40, &[1u8; 8], &[]).is_ok());

    kernel.set_arg(0, &buffer).unwrap();
    kernel.set_arg(1, &buffer).unwrap();
    kernel.set_arg(2, &buffer).unwrap();
    kernel.set_arg(3, 0u32).unwrap();
    assert!(matches!(
        queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]),
        Err(Error::ConcurrentAccessViolation { .. })
    ));

    queue.enqueue_unmap(&buffer, view, &[]).unwrap();
    queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]).unwrap();
    queue.finish().unwrap();
}

#[test]
fn test_unmap_against_wrong_buffer() {
    let (context, queue) = setup(KernelLibrary::new());
    let a = context.create_buffer(AccessMode::ReadWrite, 16).unwrap();
    let b = context.create_buffer(AccessMode::ReadWrite, 16).unwrap();
    let view = queue.enqueue_map_buffer(&a, true, MapMode::Read, 0, 16, &[]).unwrap();

    let err = queue.enqueue_unmap(&b, view, &[]).unwrap_err();
    assert!(matches!(err, Error::UnmapWithoutMap(id) if id == b.id()));
    queue.finish().unwrap();
    assert_eq!(a.live_mappings(), 0);
}

fn mapped_and_filled(context: &Context, queue: &CommandQueue, byte: u8) -> (Buffer, HostView) {
    let buffer = context.create_buffer(AccessMode::ReadWrite, 8).unwrap();
    let mut view = queue.enqueue_map_buffer(&buffer, true, MapMode::Write, 0, 8, &[]).unwrap();
    view.bytes_mut().unwrap().fill(byte);
    (buffer, view)
}

#[test]
fn test_unmap_through_foreign_queue_keeps_writes() {
    let (context, queue) = setup(KernelLibrary::new());
    let (_other_context, other_queue) = setup(KernelLibrary::new());
    let (buffer, view) = mapped_and_filled(&context, &queue, 0xab);

    let err = other_queue.enqueue_unmap(&buffer, view, &[]).unwrap_err();
    assert!(matches!(err, Error::ContextMismatch));

    queue.finish().unwrap();
    assert_eq!(buffer.live_mappings(), 0);
    let mut out = [0u8; 8];
    queue.read_buffer(&buffer, 0, &mut out).unwrap();
    assert_eq!(out, [0xab; 8]);
}

#[test]
fn test_unmap_with_foreign_wait_list_keeps_writes() {
    let (context, queue) = setup(KernelLibrary::new());
    let (other_context, _other_queue) = setup(KernelLibrary::new());
    let (buffer, view) = mapped_and_filled(&context, &queue, 0xcd);
    let foreign = other_context.create_user_event().unwrap();

    let err = queue.enqueue_unmap(&buffer, view, &[foreign.event()]).unwrap_err();
    assert!(matches!(err, Error::ContextMismatch));

    queue.finish().unwrap();
    assert_eq!(buffer.live_mappings(), 0);
    let mut out = [0u8; 8];
    queue.read_buffer(&buffer, 0, &mut out).unwrap();
    assert_eq!(out, [0xcd; 8]);
}

#[test]
fn test_unmap_on_released_queue_writes_back_on_host() {
    let (context, queue) = setup(KernelLibrary::new());
    let mapper = context.create_default_queue().unwrap();
    let (buffer, view) = mapped_and_filled(&context, &mapper, 0x5a);

    mapper.release();
    assert!(matches!(view.unmap(&[]), Err(Error::ObjectReleased(_))));

    assert_eq!(buffer.live_mappings(), 0);
    let mut out = [0u8; 8];
    queue.read_buffer(&buffer, 0, &mut out).unwrap();
    assert_eq!(out, [0x5a; 8]);
}

#[test]
fn test_set_arg_past_declared_count() {
    let (context, _queue) = setup(vadd_library());
    let kernel = build(&context, VADD, "vadd");
    let buffer = context.create_buffer(AccessMode::ReadOnly, 16).unwrap();
    kernel.set_arg(0, &buffer).unwrap();

    let err = kernel.set_arg(4, 1u32).unwrap_err();
    assert!(matches!(err, Error::InvalidArgIndex { index: 4, count: 4, .. }));
    assert_eq!(err.category(), ErrorCategory::ArgumentBinding);
    assert!(kernel.is_arg_set(0));
    assert!(!kernel.is_arg_set(3));
}

#[test]
fn test_unset_argument_rejected_at_enqueue() {
    let (context, queue) = setup(vadd_library());
    let kernel = build(&context, VADD, "vadd");
    let buffer = context.create_buffer(AccessMode::ReadOnly, 16).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    kernel.set_arg(1, &buffer).unwrap();
    kernel.set_arg(3, 4u32).unwrap();
    let err = queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]).unwrap_err();
    assert!(matches!(err, Error::ArgNotSet { index: 2, .. }));
}

#[test]
fn test_channel_swap_image_filter() {
    let library = KernelLibrary::new();
    library.register_fn("swap_rb", |item, args| {
        let (x, y) = (item.global_id(0), item.global_id(1));
        let width = args.scalar::<u32>(2)? as usize;
        let height = args.scalar::<u32>(3)? as usize;
        if x >= width || y >= height {
            return Ok(());
        }
        let src = args.global::<u8>(0)?;
        let dst = args.global::<u8>(1)?;
        let p = (y * width + x) * 4;
        dst.set(p, src.get(p + 2)?)?;
        dst.set(p + 1, src.get(p + 1)?)?;
        dst.set(p + 2, src.get(p)?)?;
        dst.set(p + 3, src.get(p + 3)?)?;
        Ok(())
    });
    let (context, queue) = setup(library);
    let kernel = build(
        &context,
        "__kernel void swap_rb(__global const uchar* src, __global uchar* dst, uint width, uint height) {}",
        "swap_rb",
    );

    let (width, height) = (13usize, 7usize);
    let pixels: Vec<u8> = (0..width * height)
        .flat_map(|i| [i as u8, 100, 200, 255])
        .collect();
    let src = context.create_buffer_with_data(AccessMode::ReadOnly, &pixels).unwrap();
    let dst = context.create_buffer(AccessMode::WriteOnly, pixels.len()).unwrap();
    kernel.set_arg(0, &src).unwrap();
    kernel.set_arg(1, &dst).unwrap();
    kernel.set_arg(2, width as u32).unwrap();
    kernel.set_arg(3, height as u32).unwrap();

    let range = NdRange::new(&[width, height]).with_local(&[4, 4]);
    queue.enqueue_nd_range(&kernel, &range, &[]).unwrap();
    let mut out = vec![0u8; pixels.len()];
    queue.read_buffer(&dst, 0, &mut out).unwrap();

    for (i, px) in out.chunks(4).enumerate() {
        assert_eq!(px, [200, 100, i as u8, 255]);
    }
}

#[test]
fn test_sub_buffer_aliases_parent() {
    let library = KernelLibrary::new();
    library.register_fn("inc", |item, args| {
        let v = args.global::<u32>(0)?;
        let i = item.global_id(0);
        v.set(i, v.get(i)? + 1)
    });
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void inc(__global uint* v) {}", "inc");

    let parent = context.create_buffer_with_data(AccessMode::ReadWrite, &[10u32; 16]).unwrap();
    let sub = parent.create_sub_buffer(AccessMode::ReadWrite, 16, 32).unwrap();
    kernel.set_arg(0, &sub).unwrap();
    queue.enqueue_nd_range(&kernel, &NdRange::linear(8), &[]).unwrap();

    let mut host = vec![0u32; 16];
    queue.read_buffer(&parent, 0, &mut host).unwrap();
    assert_eq!(&host[..4], &[10; 4]);
    assert_eq!(&host[4..12], &[11; 8]);
    assert_eq!(&host[12..], &[10; 4]);

    let view = queue.enqueue_map_buffer(&sub, true, MapMode::Read, 0, 8, &[]).unwrap();
    assert!(matches!(
        queue.enqueue_write_buffer(&parent, true, 0, &[0u32; 8], &[]),
        Err(Error::ConcurrentAccessViolation { .. })
    ));
    drop(view);
}

#[test]
fn test_kernel_fault_surfaces_through_event_and_finish() {
    let library = KernelLibrary::new();
    library.register_fn("oob", |item, args| args.global::<i32>(0)?.set(item.global_id(0) + 1, 0));
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void oob(__global int* v) {}", "oob");
    let buffer = context.create_buffer(AccessMode::ReadWrite, 16 * 4).unwrap();
    kernel.set_arg(0, &buffer).unwrap();

    let event = queue.enqueue_nd_range(&kernel, &NdRange::linear(16), &[]).unwrap();
    let err = event.wait().unwrap_err();
    match &err {
        Error::KernelFault { kernel, message } => {
            assert_eq!(kernel, "oob");
            assert!(message.contains("out of bounds"), "{message}");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(event.status(), EventStatus::Failed(_)));
    assert_eq!(err.category(), ErrorCategory::Execution);
    assert!(matches!(queue.finish(), Err(Error::KernelFault { .. })));
    assert!(queue.finish().is_ok());
}

#[test]
fn test_read_only_buffer_write_faults() {
    let library = KernelLibrary::new();
    library.register_fn("poke", |item, args| args.global::<u8>(0)?.set(item.global_id(0), 1));
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void poke(__global const uchar* v) {}", "poke");
    let buffer = context.create_buffer(AccessMode::ReadOnly, 4).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]).unwrap();
    let err = queue.finish().unwrap_err();
    assert!(err.to_string().contains("read-only"));
}

#[test]
fn test_kernel_panic_becomes_fault() {
    let library = KernelLibrary::new();
    library.register_fn("boom", |item, _| {
        if item.global_id(0) == 3 {
            panic!("work-item 3 exploded");
        }
        Ok(())
    });
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void boom() {}", "boom");
    let err = queue
        .enqueue_nd_range(&kernel, &NdRange::linear(8), &[])
        .unwrap()
        .wait()
        .unwrap_err();
    assert!(err.to_string().contains("exploded"));

    // the pool survives
    queue.enqueue_nd_range(&kernel, &NdRange::linear(2), &[]).unwrap();
    queue.finish().unwrap();
}

#[test]
fn test_local_memory_group_reduction() {
    let library = KernelLibrary::new();
    library.register_group_fn("group_sum", |group, args| {
        let input = args.global::<u32>(0)?;
        let out = args.global::<u32>(1)?;
        let tile = args.local::<u32>(2)?;
        assert_eq!(tile.get(0)?, 0);
        group.for_each_item(|item| tile.set(item.local_id(0), input.get(item.global_id(0))?))?;
        let mut sum = 0;
        for i in 0..group.local_size(0) {
            sum += tile.get(i)?;
        }
        out.set(group.group_id(0), sum)
    });
    let (context, queue) = setup(library);
    let kernel = build(
        &context,
        "__kernel void group_sum(__global const uint* input, __global uint* out, __local uint* tile) {}",
        "group_sum",
    );

    let input: Vec<u32> = (1..=64).collect();
    let src = context.create_buffer_with_data(AccessMode::ReadOnly, &input).unwrap();
    let out = context.create_buffer(AccessMode::WriteOnly, 4 * 4).unwrap();
    kernel.set_arg(0, &src).unwrap();
    kernel.set_arg(1, &out).unwrap();
    kernel.set_arg(2, ArgValue::local::<u32>(16)).unwrap();
    queue
        .enqueue_nd_range(&kernel, &NdRange::linear(64).with_local(&[16]), &[])
        .unwrap();

    let mut sums = vec![0u32; 4];
    queue.read_buffer(&out, 0, &mut sums).unwrap();
    let expected: Vec<u32> = input.chunks(16).map(|c| c.iter().sum()).collect();
    assert_eq!(sums, expected);

    kernel.set_arg(2, ArgValue::Local(1 << 30)).unwrap();
    assert!(matches!(
        queue.enqueue_nd_range(&kernel, &NdRange::linear(64).with_local(&[16]), &[]),
        Err(Error::OutOfResources(_))
    ));
}

#[test]
fn test_snapshot_isolates_later_set_arg() {
    let library = KernelLibrary::new();
    library.register_fn("store", |item, args| {
        let value = args.scalar::<i32>(1)?;
        args.global::<i32>(0)?.set(item.global_id(0), value)
    });
    let (context, queue) = setup(library);
    let kernel = build(&context, "__kernel void store(__global int* out, int value) {}", "store");
    let out = context.create_buffer(AccessMode::ReadWrite, 4 * 4).unwrap();
    let gate = context.create_user_event().unwrap();

    kernel.set_arg(0, &out).unwrap();
    kernel.set_arg(1, 1i32).unwrap();
    queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[gate.event()]).unwrap();
    kernel.set_arg(1, 2i32).unwrap();
    gate.complete().unwrap();

    let mut host = vec![0i32; 4];
    queue.read_buffer(&out, 0, &mut host).unwrap();
    assert_eq!(host, vec![1; 4]);
}

#[test]
fn test_fill_and_copy() {
    let (context, queue) = setup(KernelLibrary::new());
    let a = context.create_buffer(AccessMode::ReadWrite, 64).unwrap();
    let b = context.create_buffer(AccessMode::ReadWrite, 64).unwrap();

    queue.enqueue_fill_buffer(&a, 0xdead_beefu32, 0, 64, &[]).unwrap();
    queue.enqueue_copy_buffer(&a, &b, 8, 0, 16, &[]).unwrap();
    let host = queue.enqueue_read_buffer::<u32>(&b, 0, 16, &[]).unwrap().wait().unwrap();
    assert_eq!(&host[..4], &[0xdead_beef; 4]);
    assert_eq!(&host[4..], &[0; 12]);

    assert!(queue.enqueue_fill_buffer(&a, 1u32, 2, 8, &[]).is_err());
    assert!(queue.enqueue_copy_buffer(&a, &a, 0, 8, 16, &[]).is_err());
    assert!(queue.enqueue_copy_buffer(&a, &a, 0, 32, 16, &[]).is_ok());
    queue.finish().unwrap();
}

#[test]
fn test_cross_queue_ordering_through_wait_lists() {
    let (context, first) = setup(KernelLibrary::new());
    let second = context
        .create_queue(&context.devices()[0], QueueOrdering::InOrder)
        .unwrap();
    let buffer = context.create_buffer(AccessMode::ReadWrite, 4).unwrap();
    let gate = context.create_user_event().unwrap();

    let write = first
        .enqueue_write_buffer(&buffer, false, 0, &[42u32], &[gate.event()])
        .unwrap();
    let read = second.enqueue_read_buffer::<u32>(&buffer, 0, 1, &[write.clone()]).unwrap();
    assert!(!read.is_ready());
    gate.complete().unwrap();
    assert_eq!(read.wait().unwrap(), vec![42]);
    assert!(write.is_complete());
}

#[test]
fn test_context_release_aborts_pending_commands() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadWrite, 4).unwrap();
    let gate = context.create_user_event().unwrap();
    let pending = queue
        .enqueue_write_buffer(&buffer, false, 0, &[1u32], &[gate.event()])
        .unwrap();

    context.release();
    assert!(matches!(pending.wait(), Err(Error::Aborted)));
    assert!(matches!(
        queue.enqueue_write_buffer(&buffer, true, 0, &[1u32], &[]),
        Err(Error::ObjectReleased(_))
    ));
    assert!(context.create_program("").is_err());
}

#[test]
fn test_events_record_profiling_and_callbacks() {
    let (context, queue) = setup(KernelLibrary::new());
    let buffer = context.create_buffer(AccessMode::ReadWrite, 1024).unwrap();
    let event = queue
        .enqueue_write_buffer(&buffer, true, 0, &[0u8; 1024], &[])
        .unwrap();
    assert_eq!(event.command_kind(), CommandKind::WriteBuffer);
    let times = event.profiling();
    assert!(times.queued.is_some() && times.started.is_some() && times.ended.is_some());

    let (tx, rx) = std::sync::mpsc::channel();
    event.on_complete(move |status| {
        tx.send(status.clone()).unwrap();
    });
    assert_eq!(rx.recv().unwrap(), EventStatus::Complete);

    let marker = queue.enqueue_marker(&[]).unwrap();
    wait_for_events(&[event, marker]).unwrap();
}

#[cfg(feature = "telemetry")]
#[test]
fn test_metrics_count_commands_and_bytes() {
    let (context, queue) = setup(vadd_library());
    let kernel = build(&context, VADD, "vadd");
    let buffers: Vec<Buffer> = (0..3)
        .map(|_| context.create_buffer(AccessMode::ReadWrite, 64).unwrap())
        .collect();
    for (i, b) in buffers.iter().enumerate() {
        kernel.set_arg(i, b).unwrap();
    }
    kernel.set_arg(3, 16u32).unwrap();

    queue.enqueue_write_buffer(&buffers[0], false, 0, &[1u32; 16], &[]).unwrap();
    queue
        .enqueue_nd_range(&kernel, &NdRange::linear(16).with_local(&[4]), &[])
        .unwrap();
    let mut out = [0u32; 16];
    queue.read_buffer(&buffers[2], 0, &mut out).unwrap();
    queue.finish().unwrap();

    let snapshot = context.metrics().snapshot();
    assert_eq!(snapshot.kernels_launched, 1);
    assert_eq!(snapshot.work_groups_executed, 4);
    assert_eq!(snapshot.commands_enqueued, 3);
    assert_eq!(snapshot.commands_completed, 3);
    assert_eq!(snapshot.bytes_written, 64);
    assert_eq!(snapshot.bytes_read, 64);
    assert_eq!(snapshot.memory_allocated, 3 * 64);
    assert_eq!(context.memory_in_use(), 3 * 64);
}

#[test]
fn test_per_device_build_failure_leaves_other_device_usable() {
    use cldispatch::platform::{DeviceCapabilities, DeviceDescriptor, HostDriver};

    let library = KernelLibrary::new();
    library.register_fn("halve", |item, args| {
        let v = args.global::<f64>(0)?;
        let i = item.global_id(0);
        v.set(i, v.get(i)? / 2.0)
    });
    let config = Config::default();
    let no_fp64 = DeviceDescriptor {
        name: "Simulated GPU".into(),
        vendor: "test".into(),
        device_type: DeviceType::Gpu,
        capabilities: DeviceCapabilities::default(),
        is_default: false,
    };
    let mut enumerator = Enumerator::empty();
    let platform = enumerator.register(Arc::new(HostDriver::new(library, &config).with_device(no_fp64)));
    let context = Context::from_type(&platform, DeviceTypeFilter::ALL, &config).unwrap();
    let cpu = enumerator.list_devices(&platform, DeviceTypeFilter::CPU).unwrap().remove(0);
    let gpu = enumerator.list_devices(&platform, DeviceTypeFilter::GPU).unwrap().remove(0);

    let program = context
        .create_program("__kernel void halve(__global double* v) { v[get_global_id(0)] /= 2.0; }")
        .unwrap();
    let err = program.build(&[], "").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Compilation);
    let report = err.build_report().unwrap();
    assert_eq!(report.failed().count(), 1);
    assert_eq!(program.build_status(&cpu), BuildStatus::Success);
    assert_eq!(program.build_status(&gpu), BuildStatus::Failed);

    let kernel = program.create_kernel("halve").unwrap();
    let buffer = context.create_buffer_with_data(AccessMode::ReadWrite, &[8.0f64; 4]).unwrap();
    kernel.set_arg(0, &buffer).unwrap();

    let gpu_queue = context.create_queue(&gpu, QueueOrdering::InOrder).unwrap();
    assert!(matches!(
        gpu_queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]),
        Err(Error::ProgramNotBuilt(_))
    ));

    let cpu_queue = context.create_queue(&cpu, QueueOrdering::InOrder).unwrap();
    cpu_queue.enqueue_nd_range(&kernel, &NdRange::linear(4), &[]).unwrap();
    let mut host = [0f64; 4];
    cpu_queue.read_buffer(&buffer, 0, &mut host).unwrap();
    assert_eq!(host, [4.0; 4]);
}

#[test]
fn test_out_of_order_barrier_orders_later_commands() {
    let config = Config::builder()
        .default_ordering(QueueOrdering::OutOfOrder)
        .build()
        .unwrap();
    let device = Enumerator::with_config(&config)
        .unwrap()
        .first_device(DeviceTypeFilter::ALL)
        .unwrap();
    let context = Context::new(&[device], &config).unwrap();
    let queue = context.create_default_queue().unwrap();
    assert_eq!(queue.ordering(), QueueOrdering::OutOfOrder);

    let buffer = context.create_buffer(AccessMode::ReadWrite, 4).unwrap();
    let gate = context.create_user_event().unwrap();
    let gated = queue
        .enqueue_write_buffer(&buffer, false, 0, &[1u32], &[gate.event()])
        .unwrap();
    queue.enqueue_barrier(&[]).unwrap();
    let after = queue.enqueue_write_buffer(&buffer, false, 0, &[2u32], &[]).unwrap();

    assert!(after.wait_timeout(std::time::Duration::from_millis(30)).is_none());
    gate.complete().unwrap();
    after.wait().unwrap();
    assert!(gated.is_complete());

    let mut host = [0u32];
    queue.read_buffer(&buffer, 0, &mut host).unwrap();
    assert_eq!(host, [2]);
}
