//! Property tests for launch partitioning and buffer transfers.

use cldispatch::dispatch::padded_extent;
use cldispatch::platform::DeviceCapabilities;
use cldispatch::prelude::*;
use proptest::prelude::*;

fn caps() -> DeviceCapabilities {
    DeviceCapabilities {
        max_work_group_size: 256,
        max_work_item_sizes: [256, 256, 64],
        ..DeviceCapabilities::default()
    }
}

fn host() -> (Context, CommandQueue) {
    let config = Config::builder().compute_units(2).build().unwrap();
    let enumerator = Enumerator::with_config(&config).unwrap();
    let device = enumerator.first_device(DeviceTypeFilter::ALL).unwrap();
    let context = Context::new(&[device], &config).unwrap();
    let queue = context.create_default_queue().unwrap();
    (context, queue)
}

proptest! {
    #[test]
    fn padded_extent_is_smallest_multiple(global in 1usize..100_000, local in 1usize..512) {
        let padded = padded_extent(global, local).unwrap();
        prop_assert!(padded >= global);
        prop_assert_eq!(padded % local, 0);
        prop_assert!(padded - global < local);
    }

    #[test]
    fn explicit_local_covers_global(
        global in prop::collection::vec(1usize..2000, 1..=3),
        local_seed in prop::collection::vec(1usize..16, 3),
    ) {
        let local: Vec<usize> = local_seed[..global.len()].to_vec();
        let partition = NdRange::new(&global).with_local(&local).partition(&caps()).unwrap();
        for d in 0..global.len() {
            prop_assert_eq!(partition.logical[d], global[d]);
            prop_assert_eq!(partition.padded[d], partition.groups[d] * partition.local[d]);
            prop_assert_eq!(Some(partition.padded[d]), padded_extent(global[d], local[d]));
        }
        prop_assert!(partition.group_size() <= caps().max_work_group_size);
    }

    #[test]
    fn implicit_local_never_pads(global in prop::collection::vec(1usize..5000, 1..=3)) {
        let partition = NdRange::new(&global).partition(&caps()).unwrap();
        prop_assert!(!partition.is_padded());
        prop_assert!(partition.group_size() <= caps().max_work_group_size);
        for d in 0..global.len() {
            prop_assert!(partition.local[d] <= caps().max_work_item_sizes[d]);
        }
    }

    #[test]
    fn work_groups_enumerate_each_id_once(gx in 1usize..6, gy in 1usize..6, gz in 1usize..4) {
        let partition = NdRange::new(&[gx * 2, gy * 3, gz]).with_local(&[2, 3, 1]).partition(&caps()).unwrap();
        let mut seen = std::collections::HashSet::new();
        for linear in 0..partition.group_count() {
            let group = partition.work_group(linear);
            prop_assert!(seen.insert((group.group_id(0), group.group_id(1), group.group_id(2))));
        }
        prop_assert_eq!(seen.len(), gx * gy * gz);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn write_then_read_returns_written_words(
        data in prop::collection::vec(any::<u32>(), 1..256),
        lead in 0usize..64,
    ) {
        let (context, queue) = host();
        let size = (lead + data.len()) * 4;
        let buffer = context.create_buffer(AccessMode::ReadWrite, size).unwrap();

        queue.enqueue_write_buffer(&buffer, false, lead * 4, &data, &[]).unwrap();
        let back = queue
            .enqueue_read_buffer::<u32>(&buffer, lead * 4, data.len(), &[])
            .unwrap()
            .wait()
            .unwrap();
        prop_assert_eq!(back, data);

        let head = queue.enqueue_read_buffer::<u32>(&buffer, 0, lead, &[]).unwrap().wait().unwrap();
        prop_assert!(head.iter().all(|&w| w == 0));
    }

    #[test]
    fn read_past_end_is_rejected(size in 1usize..512, offset in 0usize..600, len in 1usize..600) {
        let (context, queue) = host();
        let buffer = context.create_buffer(AccessMode::ReadWrite, size).unwrap();
        let result = queue.enqueue_read_buffer::<u8>(&buffer, offset, len, &[]);
        if offset + len > size {
            let is_out_of_bounds = matches!(result, Err(Error::OutOfBounds { .. }));
            prop_assert!(is_out_of_bounds);
        } else {
            prop_assert_eq!(result.unwrap().wait().unwrap().len(), len);
        }
    }

    #[test]
    fn read_only_map_round_trip_preserves_contents(
        data in prop::collection::vec(any::<u8>(), 1..512),
        start_frac in 0.0f64..1.0,
    ) {
        let (context, queue) = host();
        let buffer = context.create_buffer_with_data(AccessMode::ReadWrite, &data).unwrap();
        let offset = ((data.len() - 1) as f64 * start_frac) as usize;
        let len = data.len() - offset;

        let view = queue.enqueue_map_buffer(&buffer, true, MapMode::ReadWrite, offset, len, &[]).unwrap();
        prop_assert_eq!(view.bytes().unwrap(), &data[offset..]);
        queue.enqueue_unmap(&buffer, view, &[]).unwrap();

        let mut after = vec![0u8; data.len()];
        queue.read_buffer(&buffer, 0, &mut after).unwrap();
        prop_assert_eq!(after, data);
    }
}
