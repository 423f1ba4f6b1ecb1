// SPDX-License-Identifier: CEPL-1.0

/// Which frame slot last submitted work targeting each chain image.
///
/// The chain may hand back an image whose previous frame is still executing
/// (image count and frame-slot count are independent). Before submitting
/// against such an image the caller waits on the owning slot's fence.
#[derive(Debug, Clone)]
pub struct ImageOwners {
    owners: Vec<Option<usize>>,
}

impl ImageOwners {
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn owner(&self, image: usize) -> Option<usize> {
        self.owners[image]
    }

    /// Records `slot` as the new owner of `image`.
    ///
    /// Returns the slot whose fence must be waited on first, if a different
    /// slot still owns the image. The caller's own slot fence has already been
    /// waited on at acquisition.
    pub fn claim(&mut self, image: usize, slot: usize) -> Option<usize> {
        let previous = self.owners[image].replace(slot);
        previous.filter(|&prev| prev != slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_needs_no_wait() {
        let mut t = ImageOwners::new(3);
        assert_eq!(t.claim(0, 0), None);
        assert_eq!(t.owner(0), Some(0));
    }

    #[test]
    fn image_reused_by_other_slot_waits_on_previous_owner() {
        let mut t = ImageOwners::new(3);
        t.claim(2, 0);
        assert_eq!(t.claim(2, 1), Some(0));
        assert_eq!(t.owner(2), Some(1));
    }

    #[test]
    fn same_slot_reclaiming_is_free() {
        let mut t = ImageOwners::new(2);
        t.claim(1, 1);
        assert_eq!(t.claim(1, 1), None);
    }
}
