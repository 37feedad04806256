use crate::{BoundaryEngine, CdcBounds, ChunkerResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The gear table, one pseudo-random word per byte value.
///
/// Generated with splitmix64 so boundaries are stable across builds and platforms.
static GEAR: [u64; 256] = gear_table(0x5a45_524f_5554_494c);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A boundary engine driven by a gear rolling hash.
///
/// The hash is rolled from `min` bytes into the window. Before the window reaches `avg` bytes a
/// cut needs one more zero bit than the average calls for, after it one bit less, which pulls
/// chunk sizes towards `avg`. With no cut by `max` bytes the chunk is cut at `max`.
#[derive(Debug, Clone)]
pub struct GearEngine {
    min: usize,
    avg: usize,
    max: usize,
    mask_small: u64,
    mask_large: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GearEngine {
    /// Creates an engine for the given bounds.
    pub fn new(bounds: CdcBounds) -> ChunkerResult<Self> {
        bounds.validate()?;

        let bits = bounds.avg.ilog2();
        Ok(Self {
            min: bounds.min as usize,
            avg: bounds.avg as usize,
            max: bounds.max as usize,
            mask_small: high_bits(bits + 1),
            mask_large: high_bits(bits.saturating_sub(1)),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

const fn gear_table(seed: u64) -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state = seed;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// A mask of the `bits` most significant bits.
fn high_bits(bits: u32) -> u64 {
    match bits {
        0 => 0,
        64.. => u64::MAX,
        bits => u64::MAX << (64 - bits),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl BoundaryEngine for GearEngine {
    fn min_size(&self) -> usize {
        self.min
    }

    fn avg_size(&self) -> usize {
        self.avg
    }

    fn max_size(&self) -> usize {
        self.max
    }

    fn cut(&mut self, window: &[u8]) -> usize {
        if window.len() <= self.min {
            return window.len();
        }

        let end = window.len().min(self.max);
        let mut hash = 0u64;
        for (i, byte) in window.iter().enumerate().take(end).skip(self.min) {
            hash = (hash << 1).wrapping_add(GEAR[*byte as usize]);

            let mask = if i < self.avg {
                self.mask_small
            } else {
                self.mask_large
            };

            if hash & mask == 0 {
                return i + 1;
            }
        }

        end
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gear_table_is_distinct() {
        let mut values = GEAR.to_vec();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 256);
    }

    #[test]
    fn test_high_bits() {
        assert_eq!(high_bits(0), 0);
        assert_eq!(high_bits(1), 1 << 63);
        assert_eq!(high_bits(4), 0xf000_0000_0000_0000);
        assert_eq!(high_bits(64), u64::MAX);
    }

    #[test]
    fn test_gear_engine_cut_stays_in_bounds() -> anyhow::Result<()> {
        let mut engine = GearEngine::new(CdcBounds::new(64, 256, 1024))?;

        assert_eq!(engine.cut(&[7; 10]), 10);
        assert_eq!(engine.cut(&[7; 64]), 64);

        let window: Vec<u8> = (0..1024u32).map(|i| (i * 31 % 251) as u8).collect();
        let cut = engine.cut(&window);
        assert!((65..=1024).contains(&cut));
        assert_eq!(engine.cut(&window), cut);

        // Windows longer than `max` are never cut past it.
        let long: Vec<u8> = window.iter().chain(window.iter()).copied().collect();
        assert!(engine.cut(&long) <= 1024);

        Ok(())
    }
}
