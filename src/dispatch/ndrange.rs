//! Index space descriptions and their partitioning into work-groups.

use super::work_item::WorkGroup;
use crate::error::{Error, Result};
use crate::platform::DeviceCapabilities;

/// Global extent with optional local extent and global offset, 1 to 3
/// dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdRange {
    global: Vec<usize>,
    local: Option<Vec<usize>>,
    offset: Option<Vec<usize>>,
}

impl NdRange {
    pub fn new(global: &[usize]) -> Self {
        Self {
            global: global.to_vec(),
            local: None,
            offset: None,
        }
    }

    pub fn linear(size: usize) -> Self {
        Self::new(&[size])
    }

    pub fn with_local(mut self, local: &[usize]) -> Self {
        self.local = Some(local.to_vec());
        self
    }

    pub fn with_offset(mut self, offset: &[usize]) -> Self {
        self.offset = Some(offset.to_vec());
        self
    }

    pub fn work_dim(&self) -> usize {
        self.global.len()
    }

    pub fn global(&self) -> &[usize] {
        &self.global
    }

    pub fn local(&self) -> Option<&[usize]> {
        self.local.as_deref()
    }

    /// Resolve work-group shape against a device's limits.
    pub fn partition(&self, caps: &DeviceCapabilities) -> Result<Partition> {
        let dims = self.global.len();
        if dims == 0 || dims > 3 || dims > caps.max_work_item_dimensions {
            return Err(Error::work_size(format!(
                "work_dim {dims} not in 1..={}",
                caps.max_work_item_dimensions.min(3)
            )));
        }
        if let Some(d) = self.global.iter().position(|&g| g == 0) {
            return Err(Error::work_size(format!("global size is zero in dimension {d}")));
        }

        let mut logical = [1; 3];
        logical[..dims].copy_from_slice(&self.global);

        let mut offset = [0; 3];
        if let Some(o) = &self.offset {
            if o.len() != dims {
                return Err(Error::work_size(format!(
                    "offset has {} dimension(s), global has {dims}",
                    o.len()
                )));
            }
            offset[..dims].copy_from_slice(o);
        }

        let local = match &self.local {
            Some(l) => explicit_local(l, dims, caps)?,
            None => pick_local(&logical, dims, caps),
        };

        let mut padded = [1; 3];
        let mut groups = [1; 3];
        for d in 0..dims {
            padded[d] = padded_extent(logical[d], local[d])
                .ok_or_else(|| Error::work_size(format!("padded size overflows in dimension {d}")))?;
            groups[d] = padded[d] / local[d];
            if padded[d].checked_add(offset[d]).is_none() {
                return Err(Error::work_size(format!("offset overflows in dimension {d}")));
            }
        }
        groups
            .iter()
            .try_fold(1usize, |acc, &g| acc.checked_mul(g))
            .ok_or_else(|| Error::work_size("work-group count overflows"))?;

        Ok(Partition {
            work_dim: dims,
            logical,
            padded,
            local,
            groups,
            offset,
        })
    }
}

fn explicit_local(local: &[usize], dims: usize, caps: &DeviceCapabilities) -> Result<[usize; 3]> {
    if local.len() != dims {
        return Err(Error::work_size(format!(
            "local size has {} dimension(s), global has {dims}",
            local.len()
        )));
    }
    let mut out = [1; 3];
    for (d, &l) in local.iter().enumerate() {
        if l == 0 {
            return Err(Error::work_size(format!("local size is zero in dimension {d}")));
        }
        if l > caps.max_work_item_sizes[d] {
            return Err(Error::work_size(format!(
                "local size {l} exceeds device limit {} in dimension {d}",
                caps.max_work_item_sizes[d]
            )));
        }
        out[d] = l;
    }
    let total = out.iter().try_fold(1usize, |acc, &l| acc.checked_mul(l));
    match total {
        Some(t) if t <= caps.max_work_group_size => Ok(out),
        _ => Err(Error::work_size(format!(
            "work-group of {:?} exceeds device limit of {} work-items",
            &out[..dims],
            caps.max_work_group_size
        ))),
    }
}

/// Largest divisor of each global extent within the device limits, so no
/// padding is introduced.
fn pick_local(global: &[usize; 3], dims: usize, caps: &DeviceCapabilities) -> [usize; 3] {
    let mut budget = caps.max_work_group_size.max(1);
    let mut local = [1; 3];
    for d in 0..dims {
        let cap = caps.max_work_item_sizes[d].min(budget).min(global[d]);
        local[d] = largest_divisor_within(global[d], cap);
        budget /= local[d];
    }
    local
}

fn largest_divisor_within(n: usize, cap: usize) -> usize {
    (1..=cap.max(1)).rev().find(|d| n % d == 0).unwrap_or(1)
}

/// `global` rounded up to a multiple of `local`.
pub fn padded_extent(global: usize, local: usize) -> Option<usize> {
    if local == 0 {
        return None;
    }
    global.div_ceil(local).checked_mul(local)
}

/// A resolved launch shape. Dimensions beyond `work_dim` are 1 (extent) or
/// 0 (offset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub work_dim: usize,
    /// Extent as requested.
    pub logical: [usize; 3],
    /// Extent after rounding up to whole work-groups; what kernels observe.
    pub padded: [usize; 3],
    pub local: [usize; 3],
    pub groups: [usize; 3],
    pub offset: [usize; 3],
}

impl Partition {
    pub fn group_count(&self) -> usize {
        self.groups.iter().product()
    }

    pub fn group_size(&self) -> usize {
        self.local.iter().product()
    }

    pub fn is_padded(&self) -> bool {
        self.padded != self.logical
    }

    /// Work-group with row-major linear index `linear`, dimension 0 fastest.
    pub fn work_group(&self, linear: usize) -> WorkGroup {
        let gx = self.groups[0];
        let gy = self.groups[1];
        let id = [linear % gx, (linear / gx) % gy, linear / (gx * gy)];
        WorkGroup::new(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities {
            max_work_group_size: 64,
            max_work_item_sizes: [64, 64, 8],
            ..DeviceCapabilities::default()
        }
    }

    #[test]
    fn padded_extent_rounds_up() {
        assert_eq!(padded_extent(10, 5), Some(10));
        assert_eq!(padded_extent(11, 5), Some(15));
        assert_eq!(padded_extent(1, 64), Some(64));
        assert_eq!(padded_extent(usize::MAX, 2), None);
    }

    #[test]
    fn explicit_local_pads_global() {
        let p = NdRange::linear(11).with_local(&[5]).partition(&caps()).unwrap();
        assert_eq!(p.logical[0], 11);
        assert_eq!(p.padded[0], 15);
        assert_eq!(p.groups[0], 3);
        assert!(p.is_padded());
    }

    #[test]
    fn omitted_local_divides_evenly() {
        let p = NdRange::new(&[100, 30]).partition(&caps()).unwrap();
        assert_eq!(p.local, [50, 1, 1]);
        assert_eq!(p.padded, [100, 30, 1]);
        assert!(!p.is_padded());

        let prime = NdRange::linear(97).partition(&caps()).unwrap();
        assert_eq!(prime.local[0], 1);
        assert_eq!(prime.group_count(), 97);
    }

    #[test]
    fn invalid_shapes_rejected() {
        let c = caps();
        assert!(NdRange::new(&[]).partition(&c).is_err());
        assert!(NdRange::new(&[1, 1, 1, 1]).partition(&c).is_err());
        assert!(NdRange::linear(0).partition(&c).is_err());
        assert!(NdRange::linear(8).with_local(&[0]).partition(&c).is_err());
        assert!(NdRange::linear(128).with_local(&[128]).partition(&c).is_err());
        assert!(NdRange::new(&[16, 16]).with_local(&[16, 16]).partition(&c).is_err());
        assert!(NdRange::new(&[16, 16]).with_local(&[16]).partition(&c).is_err());

        let err = NdRange::linear(0).partition(&c).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::ArgumentBinding);
    }

    #[test]
    fn work_group_layout_is_row_major() {
        let p = NdRange::new(&[4, 6]).with_local(&[2, 3]).partition(&caps()).unwrap();
        assert_eq!(p.groups, [2, 2, 1]);
        let g = p.work_group(3);
        assert_eq!((g.group_id(0), g.group_id(1)), (1, 1));
    }
}
