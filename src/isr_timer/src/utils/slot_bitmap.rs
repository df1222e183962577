//! Provides `SlotBitmap`, a bit array supporting constant-time search for the
//! lowest set bit.
use core::fmt;

use super::Init;

type Word = usize;
const WORD_LEN: usize = Word::BITS as usize;

/// The number of bits a [`SlotBitmap`] can store.
pub const SLOT_BITMAP_LEN: usize = 128;

const NUM_GROUPS: usize = (SLOT_BITMAP_LEN + WORD_LEN - 1) / WORD_LEN;

// The first level must be able to summarize every group
const _: () = assert!(NUM_GROUPS <= WORD_LEN);

/// A two-level bit array storing [`SLOT_BITMAP_LEN`] bits.
///
/// All methods panic when the given bit position is out of range.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SlotBitmap {
    // Invariant: `first` bit `i` is set iff `second[i] != 0`
    first: Word,
    second: [Word; NUM_GROUPS],
}

impl Init for SlotBitmap {
    const INIT: Self = Self {
        first: 0,
        second: [0; NUM_GROUPS],
    };
}

impl fmt::Debug for SlotBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list()
            .entries((0..SLOT_BITMAP_LEN).filter(|&i| self.get(i)))
            .finish()
    }
}

impl SlotBitmap {
    /// Construct a `SlotBitmap` with bits `0..len` set.
    pub const fn with_leading_ones(len: usize) -> Self {
        assert!(len <= SLOT_BITMAP_LEN);

        let mut this = Self::INIT;
        let mut group_i = 0;
        // `Iterator` is unusable in `const fn`
        while group_i < NUM_GROUPS {
            let start = group_i * WORD_LEN;
            if len > start {
                let count = len - start;
                this.second[group_i] = if count >= WORD_LEN {
                    Word::MAX
                } else {
                    (1 << count) - 1
                };
                this.first |= 1 << group_i;
            }
            group_i += 1;
        }
        this
    }

    /// Get the bit at the specified position.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        assert!(i < SLOT_BITMAP_LEN);
        self.second[i / WORD_LEN] & (1 << (i % WORD_LEN)) != 0
    }

    /// Clear the bit at the specified position.
    #[inline]
    pub fn clear(&mut self, i: usize) {
        assert!(i < SLOT_BITMAP_LEN);
        let group = &mut self.second[i / WORD_LEN];
        *group &= !(1 << (i % WORD_LEN));
        if *group == 0 {
            self.first &= !(1 << (i / WORD_LEN));
        }
    }

    /// Set the bit at the specified position.
    #[inline]
    pub fn set(&mut self, i: usize) {
        assert!(i < SLOT_BITMAP_LEN);
        self.second[i / WORD_LEN] |= 1 << (i % WORD_LEN);
        self.first |= 1 << (i / WORD_LEN);
    }

    /// Get the position of the first set bit.
    #[inline]
    pub fn find_set(&self) -> Option<usize> {
        if self.first == 0 {
            return None;
        }

        let group_i = self.first.trailing_zeros() as usize;
        let group = self.second[group_i];
        debug_assert_ne!(group, 0);
        Some(group.trailing_zeros() as usize + group_i * WORD_LEN)
    }

    /// Count the set bits.
    #[inline]
    pub fn count(&self) -> usize {
        self.second.iter().map(|group| group.count_ones() as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::collections::BTreeSet;

    struct BTreeSlotBitmap(BTreeSet<usize>);

    impl BTreeSlotBitmap {
        fn new() -> Self {
            Self(BTreeSet::new())
        }

        fn enum_set_bits(&self) -> Vec<usize> {
            self.0.iter().cloned().collect()
        }

        fn clear(&mut self, i: usize) {
            self.0.remove(&i);
        }

        fn set(&mut self, i: usize) {
            self.0.insert(i);
        }

        fn find_set(&self) -> Option<usize> {
            self.0.iter().next().cloned()
        }
    }

    /// A modifying operation on `SlotBitmap`.
    #[derive(Debug)]
    enum Cmd {
        Insert(usize),
        Remove(usize),
    }

    /// Map random bytes to operations on `SlotBitmap`.
    fn interpret(bytecode: &[u8]) -> impl Iterator<Item = Cmd> + '_ {
        let mut i = 0;
        let mut known_set_bits = Vec::new();
        std::iter::from_fn(move || {
            if let Some(instr) = bytecode.get(i..i + 2) {
                i += 2;

                let value = instr[1] as usize;

                if instr[0] % 2 == 0 || known_set_bits.is_empty() {
                    let bit = value % SLOT_BITMAP_LEN;
                    known_set_bits.push(bit);
                    Some(Cmd::Insert(bit))
                } else {
                    let i = value % known_set_bits.len();
                    let bit = known_set_bits.swap_remove(i);
                    Some(Cmd::Remove(bit))
                }
            } else {
                None
            }
        })
    }

    fn enum_set_bits(bitmap: &SlotBitmap) -> Vec<usize> {
        (0..SLOT_BITMAP_LEN).filter(|&i| bitmap.get(i)).collect()
    }

    #[quickcheck]
    fn matches_reference(bytecode: Vec<u8>) {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut subject = SlotBitmap::INIT;
        let mut reference = BTreeSlotBitmap::new();

        for cmd in interpret(&bytecode) {
            log::trace!("    {cmd:?}");
            match cmd {
                Cmd::Insert(bit) => {
                    subject.set(bit);
                    reference.set(bit);
                }
                Cmd::Remove(bit) => {
                    subject.clear(bit);
                    reference.clear(bit);
                }
            }

            assert_eq!(subject.find_set(), reference.find_set());
        }

        assert_eq!(subject.find_set(), reference.find_set());
        assert_eq!(enum_set_bits(&subject), reference.enum_set_bits());
        assert_eq!(subject.count(), reference.0.len());
    }

    #[test]
    fn leading_ones() {
        for len in [0, 1, 15, 16, 63, 64, 65, 127, 128] {
            let bitmap = SlotBitmap::with_leading_ones(len);
            assert_eq!(enum_set_bits(&bitmap), (0..len).collect::<Vec<_>>());
            assert_eq!(bitmap.count(), len);
            assert_eq!(bitmap.find_set(), (len > 0).then_some(0));
        }
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        SlotBitmap::INIT.get(SLOT_BITMAP_LEN);
    }
}
