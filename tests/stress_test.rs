//! Stress tests for queues, compute pools and device memory

use cldispatch::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

fn context_with(library: KernelLibrary) -> Context {
    let config = Config::builder().compute_units(4).build().unwrap();
    let device = Enumerator::with_library(library, &config)
        .unwrap()
        .first_device(DeviceTypeFilter::ALL)
        .unwrap();
    Context::new(&[device], &config).unwrap()
}

fn add_one_library() -> KernelLibrary {
    let library = KernelLibrary::new();
    library.register_fn("add_one", |item, args| {
        let v = args.global::<u32>(0)?;
        let i = item.global_id(0);
        v.set(i, v.get(i)? + 1)
    });
    library
}

const ADD_ONE: &str = "__kernel void add_one(__global uint* v) {}";

#[test]
#[ignore] // Run with --ignored flag
fn stress_test_many_small_commands() {
    let context = context_with(KernelLibrary::new());
    let queue = context.create_default_queue().unwrap();
    let buffer = context.create_buffer(AccessMode::ReadWrite, 4).unwrap();

    for i in 0..10_000u32 {
        queue.enqueue_write_buffer(&buffer, false, 0, &[i], &[]).unwrap();
    }
    queue.finish().unwrap();

    let mut last = [0u32];
    queue.read_buffer(&buffer, 0, &mut last).unwrap();
    assert_eq!(last, [9_999]);
}

#[test]
#[ignore]
fn stress_test_repeated_launches() {
    let context = context_with(add_one_library());
    let queue = context.create_default_queue().unwrap();
    let program = context.create_program(ADD_ONE).unwrap();
    program.build(&[], "").unwrap();
    let kernel = program.create_kernel("add_one").unwrap();

    let buffer = context.create_buffer(AccessMode::ReadWrite, 1024 * 4).unwrap();
    kernel.set_arg(0, &buffer).unwrap();
    for _ in 0..1000 {
        queue
            .enqueue_nd_range(&kernel, &NdRange::linear(1024).with_local(&[64]), &[])
            .unwrap();
    }

    let mut out = vec![0u32; 1024];
    queue.read_buffer(&buffer, 0, &mut out).unwrap();
    assert!(out.iter().all(|&x| x == 1000));
}

#[test]
#[ignore]
fn stress_test_queues_from_many_threads() {
    let context = context_with(add_one_library());
    let program = context.create_program(ADD_ONE).unwrap();
    program.build(&[], "").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let context = context.clone();
            let kernel = program.create_kernel("add_one").unwrap();
            thread::spawn(move || {
                let queue = context
                    .create_queue(&context.devices()[0], QueueOrdering::OutOfOrder)
                    .unwrap();
                let buffer = context.create_buffer(AccessMode::ReadWrite, 256 * 4).unwrap();
                kernel.set_arg(0, &buffer).unwrap();
                let mut last = None;
                for _ in 0..100 {
                    let deps: Vec<Event> = last.take().into_iter().collect();
                    last = Some(queue.enqueue_nd_range(&kernel, &NdRange::linear(256), &deps).unwrap());
                }
                let mut out = vec![0u32; 256];
                let read = queue
                    .enqueue_read_buffer::<u32>(&buffer, 0, 256, &[last.unwrap()])
                    .unwrap();
                out.copy_from_slice(&read.wait().unwrap());
                out
            })
        })
        .collect();

    for handle in handles {
        let out = handle.join().unwrap();
        assert!(out.iter().all(|&x| x == 100));
    }
}

#[test]
#[ignore]
fn stress_test_panic_recovery() {
    let library = KernelLibrary::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    library.register_fn("flaky", move |item, _| {
        counter.fetch_add(1, Ordering::Relaxed);
        if item.global_id(0) % 10 == 0 {
            panic!("Intentional panic");
        }
        Ok(())
    });
    let context = context_with(library);
    let queue = context.create_default_queue().unwrap();
    let program = context.create_program("__kernel void flaky() {}").unwrap();
    program.build(&[], "").unwrap();
    let kernel = program.create_kernel("flaky").unwrap();

    for _ in 0..100 {
        let event = queue
            .enqueue_nd_range(&kernel, &NdRange::linear(100).with_local(&[10]), &[])
            .unwrap();
        assert!(matches!(event.wait(), Err(Error::KernelFault { .. })));
    }

    // pool still works after the panics
    queue.enqueue_marker(&[]).unwrap().wait().unwrap();
    assert!(ran.load(Ordering::Relaxed) >= 100);
}

#[test]
#[ignore]
fn stress_test_memory_pressure() {
    let config = Config::builder()
        .host_global_mem_size(64 * 1024 * 1024)
        .host_max_alloc_size(16 * 1024 * 1024)
        .build()
        .unwrap();
    let device = Enumerator::with_config(&config)
        .unwrap()
        .first_device(DeviceTypeFilter::ALL)
        .unwrap();
    let context = Context::new(&[device], &config).unwrap();

    for _ in 0..20 {
        let buffers: Vec<Buffer> = (0..4)
            .map(|_| context.create_buffer(AccessMode::ReadWrite, 16 * 1024 * 1024).unwrap())
            .collect();
        assert!(matches!(
            context.create_buffer(AccessMode::ReadWrite, 1),
            Err(Error::OutOfDeviceMemory { .. })
        ));
        drop(buffers);
        assert_eq!(context.memory_in_use(), 0);
    }
}
