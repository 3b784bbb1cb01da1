//! Fixed size leaf bitset

const SHIFT: usize = 5;
const MASK: usize = (1 << SHIFT) - 1;

/// Set of leaf (or cluster) numbers stored in `u32` blocks
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafBits {
    len: usize,
    blocks: Vec<u32>,
}

impl LeafBits {
    pub fn new(len: usize) -> Self {
        Self { len, blocks: vec![0; (len + MASK) >> SHIFT] }
    }

    /// Number of leaves the set can hold
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        self.blocks[index >> SHIFT] & (1 << (index & MASK)) != 0
    }

    pub fn set(&mut self, index: usize, value: bool) {
        let bit = 1 << (index & MASK);

        if value {
            self.blocks[index >> SHIFT] |= bit;
        } else {
            self.blocks[index >> SHIFT] &= !bit;
        }
    }

    pub fn clear(&mut self) {
        self.blocks.fill(0);
    }

    pub fn count(&self) -> usize {
        self.blocks.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn blocks(&self) -> &[u32] {
        &self.blocks
    }

    /// Set bits in order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.blocks.iter().enumerate().flat_map(|(index, block)| {
            let mut block = *block;

            std::iter::from_fn(move || {
                if block == 0 {
                    return None;
                }
                let bit = block.trailing_zeros() as usize;
                block &= block - 1;
                Some((index << SHIFT) + bit)
            })
        })
    }

    pub fn union_with(&mut self, other: &LeafBits) {
        for (dst, src) in self.blocks.iter_mut().zip(&other.blocks) {
            *dst |= *src;
        }
    }

    /// Set to `a & b`, returns true if result has bits missing in `known`
    pub fn assign_and(&mut self, a: &LeafBits, b: &LeafBits, known: &LeafBits) -> bool {
        let mut more = 0;

        for (((dst, a), b), known) in self.blocks.iter_mut().zip(&a.blocks).zip(&b.blocks).zip(&known.blocks) {
            *dst = a & b;
            more |= *dst & !known;
        }

        more != 0
    }

    /// Byte `index` of the little endian bit string
    pub fn byte(&self, index: usize) -> u8 {
        (self.blocks[index >> 2] >> ((index & 3) << 3)) as u8
    }

    /// OR byte `value` into byte `index` of the bit string
    pub fn or_byte(&mut self, index: usize, value: u8) {
        self.blocks[index >> 2] |= (value as u32) << ((index & 3) << 3);
    }

    /// Length of the bit string in bytes
    pub fn byte_len(&self) -> usize {
        (self.len + 7) >> 3
    }

    /// Little endian bit string, one bit per leaf
    pub fn to_bytes(&self) -> Vec<u8> {
        (0..self.byte_len()).map(|i| self.byte(i)).collect()
    }
}
