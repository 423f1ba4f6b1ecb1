// SPDX-License-Identifier: CEPL-1.0
//! Per-frame descriptor pools.
//!
//! Each frame slot owns one pool. Sets handed out during a frame live only
//! until that slot comes around again, at which point the whole pool is reset
//! in one call instead of freeing sets one by one. That is only sound because
//! the slot's fence has been waited on (inside `begin_frame`) before the reset.

use anyhow::Result;

use crate::MAX_FRAMES_IN_FLIGHT;

/// A descriptor pool as far as the frame ring is concerned.
pub trait DescriptorAllocator {
    type Set: Copy;
    type Layout: Copy;

    fn allocate(&self, layout: Self::Layout) -> Result<Self::Set>;
    fn free(&self, sets: &[Self::Set]) -> Result<()>;
    /// Returns every set allocated from the pool at once.
    fn reset(&mut self) -> Result<()>;
}

pub struct FramePools<P> {
    pools: Vec<P>,
}

impl<P: DescriptorAllocator> FramePools<P> {
    /// Builds one pool per frame slot.
    pub fn new(mut make: impl FnMut(usize) -> Result<P>) -> Result<Self> {
        let pools = (0..MAX_FRAMES_IN_FLIGHT)
            .map(&mut make)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { pools })
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Resets `slot`'s pool wholesale and returns it for this frame's allocations.
    ///
    /// Call only after `begin_frame` returned a command buffer for `slot`.
    pub fn begin_slot(&mut self, slot: usize) -> Result<&P> {
        let pool = &mut self.pools[slot];
        pool.reset()?;
        Ok(pool)
    }

    pub fn get(&self, slot: usize) -> &P {
        &self.pools[slot]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingPool {
        capacity: u32,
        live: Cell<u32>,
        resets: u32,
    }

    impl DescriptorAllocator for CountingPool {
        type Set = u32;
        type Layout = ();

        fn allocate(&self, _layout: ()) -> Result<u32> {
            let n = self.live.get();
            anyhow::ensure!(n < self.capacity, crate::RenderError::PoolExhausted);
            self.live.set(n + 1);
            Ok(n)
        }

        fn free(&self, sets: &[u32]) -> Result<()> {
            self.live.set(self.live.get() - sets.len() as u32);
            Ok(())
        }

        fn reset(&mut self) -> Result<()> {
            self.live.set(0);
            self.resets += 1;
            Ok(())
        }
    }

    fn ring(capacity: u32) -> FramePools<CountingPool> {
        FramePools::new(|_| {
            Ok(CountingPool {
                capacity,
                live: Cell::new(0),
                resets: 0,
            })
        })
        .unwrap()
    }

    #[test]
    fn one_pool_per_frame_slot() {
        assert_eq!(ring(4).len(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn begin_slot_resets_only_that_slot() {
        let mut pools = ring(8);
        pools.begin_slot(0).unwrap().allocate(()).unwrap();
        pools.begin_slot(1).unwrap().allocate(()).unwrap();
        pools.get(1).allocate(()).unwrap();

        pools.begin_slot(0).unwrap();
        assert_eq!(pools.get(0).live.get(), 0);
        assert_eq!(pools.get(1).live.get(), 2);
        assert_eq!(pools.get(0).resets, 2);
        assert_eq!(pools.get(1).resets, 1);
    }

    #[test]
    fn reset_reclaims_an_exhausted_pool() {
        let mut pools = ring(2);
        let p = pools.begin_slot(0).unwrap();
        p.allocate(()).unwrap();
        p.allocate(()).unwrap();
        assert!(p.allocate(()).is_err());

        let p = pools.begin_slot(0).unwrap();
        assert!(p.allocate(()).is_ok());
    }

    #[test]
    fn individual_free_still_works() {
        let mut pools = ring(2);
        let p = pools.begin_slot(1).unwrap();
        let a = p.allocate(()).unwrap();
        p.free(&[a]).unwrap();
        assert_eq!(p.live.get(), 0);
    }
}
