//! Address decoding: mapping a physical address to the slave that serves it.

use std::fmt;
use thiserror::Error;

/// One decoded memory region: all addresses matching `(base, mask)` are
/// served by slave `slave_index`.
///
/// The match rule is the AHB bank-address-register convention:
/// an address matches iff `(address & mask) == (base & mask)`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SlaveRegion {
    pub slave_index: u32,
    pub base: u32,
    pub mask: u32,
}

impl SlaveRegion {
    /// Returns `true` if `address` decodes to this region.
    pub fn matches(&self, address: u32) -> bool {
        (address & self.mask) == (self.base & self.mask)
    }

    /// Returns `true` if some address decodes to both `self` and `other`.
    ///
    /// Two masked regions intersect iff their bases agree on every bit that
    /// both masks constrain; bits constrained by only one mask can always be
    /// chosen to satisfy that region alone.
    pub fn overlaps(&self, other: &SlaveRegion) -> bool {
        let both = self.mask & other.mask;
        (self.base & both) == (other.base & both)
    }
}

impl fmt::Display for SlaveRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slave {} at {:#010x}/{:#010x}",
            self.slave_index, self.base, self.mask
        )
    }
}

/// Two configured regions intersect. Fatal: raised at elaboration, before
/// any transaction traffic is processed.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("memory map overlap: {first} intersects {second}")]
pub struct OverlapError {
    pub first: SlaveRegion,
    pub second: SlaveRegion,
}

/// The address decoder: an ordered table of [`SlaveRegion`]s.
///
/// Built once at elaboration from the bound slave set; immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct AddressDecoder {
    regions: Vec<SlaveRegion>,
}

impl AddressDecoder {
    /// Build a decoder from `regions`.
    ///
    /// When `check_overlap` is set, any intersecting pair of regions fails
    /// construction with an [`OverlapError`] naming both offenders. Two
    /// banks of the same slave are checked like everything else: the decode
    /// result must be unique.
    pub fn new(regions: Vec<SlaveRegion>, check_overlap: bool) -> Result<Self, OverlapError> {
        if check_overlap {
            for (i, first) in regions.iter().enumerate() {
                for second in &regions[i + 1..] {
                    if first.overlaps(second) {
                        return Err(OverlapError {
                            first: *first,
                            second: *second,
                        });
                    }
                }
            }
        }
        Ok(Self { regions })
    }

    /// Returns the index of the slave serving `address`, or `None` if no
    /// region matches.
    ///
    /// The caller must synthesize a decode-error response on `None` rather
    /// than forwarding the access anywhere.
    pub fn decode(&self, address: u32) -> Option<u32> {
        self.regions
            .iter()
            .find(|region| region.matches(address))
            .map(|region| region.slave_index)
    }

    /// The configured regions, in table order.
    pub fn regions(&self) -> &[SlaveRegion] {
        &self.regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(slave_index: u32, base: u32, mask: u32) -> SlaveRegion {
        SlaveRegion {
            slave_index,
            base,
            mask,
        }
    }

    #[test]
    fn decode_picks_unique_region() {
        let decoder = AddressDecoder::new(
            vec![region(0, 0x000, 0xF00), region(1, 0x100, 0xF00)],
            true,
        )
        .unwrap();
        assert_eq!(decoder.decode(0x050), Some(0));
        assert_eq!(decoder.decode(0x150), Some(1));
        assert_eq!(decoder.decode(0x250), None);
    }

    #[test]
    fn decode_over_msb_banks() {
        // Typical 12-MSB bank setup: 16 MiB banks at 0x40000000 and 0x50000000.
        let decoder = AddressDecoder::new(
            vec![
                region(0, 0x400 << 20, 0xFF0 << 20),
                region(1, 0x500 << 20, 0xFF0 << 20),
            ],
            true,
        )
        .unwrap();
        assert_eq!(decoder.decode(0x4000_1234), Some(0));
        assert_eq!(decoder.decode(0x50FF_FFFF), Some(1));
        assert_eq!(decoder.decode(0x6000_0000), None);
    }

    #[test]
    fn catch_all_region_overlaps_everything() {
        // mask == 0 matches every address, so any second region must clash.
        let err = AddressDecoder::new(
            vec![region(0, 0x000, 0x000), region(1, 0x100, 0xF00)],
            true,
        )
        .unwrap_err();
        assert_eq!(err.first.slave_index, 0);
        assert_eq!(err.second.slave_index, 1);
    }

    #[test]
    fn nested_masks_overlap() {
        // The wider region (mask 0xE00) contains addresses of the narrower one.
        assert!(region(0, 0x000, 0xE00).overlaps(&region(1, 0x000, 0xF00)));
        let result = AddressDecoder::new(
            vec![region(0, 0x000, 0xE00), region(1, 0x000, 0xF00)],
            true,
        );
        assert!(result.is_err());
    }

    #[test]
    fn disjoint_masks_constrain_independently() {
        // mask_a & mask_b == 0: an address satisfying both always exists.
        assert!(region(0, 0x0F0, 0x0F0).overlaps(&region(1, 0xF00, 0xF00)));
    }

    #[test]
    fn overlap_check_can_be_disabled() {
        let decoder = AddressDecoder::new(
            vec![region(0, 0x000, 0x000), region(1, 0x100, 0xF00)],
            false,
        )
        .unwrap();
        // First match wins when the invariant is not enforced.
        assert_eq!(decoder.decode(0x150), Some(0));
    }
}
