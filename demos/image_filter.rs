//! Swap the red and blue channels of an RGBA image over a 2-D range.

use cldispatch::prelude::*;

const SOURCE: &str = r#"
__kernel void swap_rb(__global const uchar4* src, __global uchar4* dst, uint width, uint height) {
    int x = get_global_id(0);
    int y = get_global_id(1);
    if (x < width && y < height) {
        uchar4 p = src[y * width + x];
        dst[y * width + x] = (uchar4)(p.z, p.y, p.x, p.w);
    }
}
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Image Filter Example ===\n");

    let library = KernelLibrary::new();
    library.register_fn("swap_rb", |item, args| {
        let (x, y) = (item.global_id(0), item.global_id(1));
        let width = args.scalar::<u32>(2)? as usize;
        let height = args.scalar::<u32>(3)? as usize;
        if x < width && y < height {
            let (src, dst) = (args.global::<[u8; 4]>(0)?, args.global::<[u8; 4]>(1)?);
            let [r, g, b, a] = src.get(y * width + x)?;
            dst.set(y * width + x, [b, g, r, a])?;
        }
        Ok(())
    });

    let config = Config::default();
    let device = Enumerator::with_library(library, &config)?.first_device(DeviceTypeFilter::ALL)?;
    let context = Context::new(&[device], &config)?;
    let queue = context.create_default_queue()?;

    let (width, height) = (641usize, 480usize);
    let image: Vec<[u8; 4]> = (0..width * height)
        .map(|i| [(i % 256) as u8, ((i / width) % 256) as u8, 255 - (i % 256) as u8, 255])
        .collect();
    let src = context.create_buffer_with_data(AccessMode::ReadOnly, &image)?;
    let dst = context.create_buffer(AccessMode::WriteOnly, image.len() * 4)?;

    let program = context.create_program(SOURCE)?;
    program.build(&[], "")?;
    let kernel = program.create_kernel("swap_rb")?;
    kernel.set_arg(0, &src)?;
    kernel.set_arg(1, &dst)?;
    kernel.set_arg(2, width as u32)?;
    kernel.set_arg(3, height as u32)?;

    // 641 is prime, so a 16x16 group pads the first dimension to 656.
    let range = NdRange::new(&[width, height]).with_local(&[16, 16]);
    let event = queue.enqueue_nd_range(&kernel, &range, &[])?;

    let mut out = vec![[0u8; 4]; image.len()];
    queue.read_buffer(&dst, 0, &mut out)?;
    let ok = image
        .iter()
        .zip(&out)
        .all(|(p, q)| q == &[p[2], p[1], p[0], p[3]]);

    println!("{width}x{height} pixels, first pixel {:?} -> {:?}", image[1], out[1]);
    if let Some(time) = event.profiling().execution_time() {
        println!("Kernel time: {time:?}");
    }
    println!("Result {}", if ok { "verified" } else { "MISMATCH" });
    println!("\n=== Example Complete ===");
    Ok(())
}
