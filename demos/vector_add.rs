//! Vector addition on the first available device.
//!
//! Run with `RUST_LOG=debug` to see queue and pool activity.

use cldispatch::prelude::*;

const SOURCE: &str = r#"
__kernel void vadd(__global const int* a, __global const int* b, __global int* c, uint n) {
    size_t i = get_global_id(0);
    if (i < n) c[i] = a[i] + b[i];
}
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Vector Add Example ===\n");

    let library = KernelLibrary::new();
    library.register_fn("vadd", |item, args| {
        let i = item.global_id(0);
        if i < args.scalar::<u32>(3)? as usize {
            let (a, b, c) = (args.global::<i32>(0)?, args.global::<i32>(1)?, args.global::<i32>(2)?);
            c.set(i, a.get(i)? + b.get(i)?)?;
        }
        Ok(())
    });

    let config = Config::default();
    let enumerator = Enumerator::with_library(library, &config)?;
    for platform in enumerator.list_platforms()? {
        println!("Platform: {} ({})", platform.name(), platform.vendor());
    }
    let device = enumerator.first_device(DeviceTypeFilter::ALL)?;
    println!("Device: {} ({:?})\n", device.name(), device.device_type());

    let context = Context::new(&[device], &config)?;
    let queue = context.create_default_queue()?;
    let program = context.create_program(SOURCE)?;
    let report = program.build(&[], "")?;
    println!("{report}");
    let kernel = program.create_kernel("vadd")?;

    const N: usize = 10;
    let a: Vec<i32> = (0..N as i32).collect();
    let b: Vec<i32> = (0..N as i32).map(|x| 2 * x).collect();
    let buf_a = context.create_buffer_with_data(AccessMode::ReadOnly, &a)?;
    let buf_b = context.create_buffer_with_data(AccessMode::ReadOnly, &b)?;
    let buf_c = context.create_buffer(AccessMode::WriteOnly, N * std::mem::size_of::<i32>())?;

    kernel.set_arg(0, &buf_a)?;
    kernel.set_arg(1, &buf_b)?;
    kernel.set_arg(2, &buf_c)?;
    kernel.set_arg(3, N as u32)?;

    let event = queue.enqueue_nd_range(&kernel, &NdRange::linear(N).with_local(&[5]), &[])?;
    let mut c = vec![0i32; N];
    queue.read_buffer(&buf_c, 0, &mut c)?;

    println!("A: {a:?}");
    println!("B: {b:?}");
    println!("C: {c:?}");
    if let Some(time) = event.profiling().execution_time() {
        println!("Kernel time: {time:?}");
    }

    queue.finish()?;
    println!("\n=== Example Complete ===");
    Ok(())
}
