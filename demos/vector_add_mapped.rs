//! Vector addition with inputs filled and results read through host mappings.

use cldispatch::prelude::*;

const SOURCE: &str = "__kernel void vadd(__global const float* a, __global const float* b, __global float* c) {}";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Mapped Vector Add Example ===\n");

    let library = KernelLibrary::new();
    library.register_fn("vadd", |item, args| {
        let i = item.global_id(0);
        let (a, b, c) = (args.global::<f32>(0)?, args.global::<f32>(1)?, args.global::<f32>(2)?);
        if i < c.len() {
            c.set(i, a.get(i)? + b.get(i)?)?;
        }
        Ok(())
    });

    let config = Config::default();
    let device = Enumerator::with_library(library, &config)?.first_device(DeviceTypeFilter::ALL)?;
    let context = Context::new(&[device], &config)?;
    let queue = context.create_default_queue()?;

    const N: usize = 1000;
    let bytes = N * std::mem::size_of::<f32>();
    let buf_a = context.create_buffer(AccessMode::ReadOnly, bytes)?;
    let buf_b = context.create_buffer(AccessMode::ReadOnly, bytes)?;
    let buf_c = context.create_buffer(AccessMode::WriteOnly, bytes)?;

    // Read-only buffers cannot be mapped for writing; fill them with a write instead.
    let a: Vec<f32> = (0..N).map(|i| i as f32).collect();
    queue.enqueue_write_buffer(&buf_a, false, 0, &a, &[])?;

    let staging = context.create_buffer(AccessMode::ReadWrite, bytes)?;
    let mut view = queue.enqueue_map_buffer(&staging, true, MapMode::Write, 0, bytes, &[])?;
    for (i, x) in view.as_mut_slice::<f32>()?.iter_mut().enumerate() {
        *x = 0.5 * i as f32;
    }
    let unmapped = view.unmap(&[])?;
    queue.enqueue_copy_buffer(&staging, &buf_b, 0, 0, bytes, &[unmapped])?;

    let program = context.create_program(SOURCE)?;
    program.build(&[], "")?;
    let kernel = program.create_kernel("vadd")?;
    kernel.set_arg(0, &buf_a)?;
    kernel.set_arg(1, &buf_b)?;
    kernel.set_arg(2, &buf_c)?;
    let launched = queue.enqueue_nd_range(&kernel, &NdRange::linear(N).with_local(&[64]), &[])?;

    let result = context.create_buffer(AccessMode::ReadWrite, bytes)?;
    let copied = queue.enqueue_copy_buffer(&buf_c, &result, 0, 0, bytes, &[launched])?;
    let view = queue.enqueue_map_buffer(&result, true, MapMode::Read, 0, bytes, &[copied])?;
    let c = view.as_slice::<f32>()?;
    println!("C[0..5]   = {:?}", &c[..5]);
    println!("C[995..]  = {:?}", &c[995..]);
    let ok = c.iter().enumerate().all(|(i, &v)| v == 1.5 * i as f32);
    view.unmap(&[])?.wait()?;

    println!("\nResult {}", if ok { "verified" } else { "MISMATCH" });
    println!("=== Example Complete ===");
    Ok(())
}
