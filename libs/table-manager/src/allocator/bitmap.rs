// Copyright 2025 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;

/// Number of table ids tracked by one bitmap word.
pub const WORD_BITS: u32 = u64::BITS;

/// A fixed range of table ids tracked as a bitmap.
// Impl Note:
// Bit `b` of word `i` represents table `offset + i * WORD_BITS + b`. A set bit means the table is
// free. Bits past `count` in the last word are never set.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TableBitmap {
    offset: u32,
    count: u32,
    words: Vec<u64>,
}

impl TableBitmap {
    /// Creates a bitmap of `count` free tables starting at `offset`.
    pub fn new(offset: u32, count: u32) -> Self {
        let full_words = (count / WORD_BITS) as usize;
        let rest = count % WORD_BITS;

        let mut words = vec![u64::MAX; full_words];
        if rest > 0 {
            words.push((1u64 << rest) - 1);
        }

        Self {
            offset,
            count,
            words,
        }
    }

    /// Smallest table id of the range.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Number of table ids in the range.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Takes the lowest free table.
    ///
    /// Returns `None` if every table is busy.
    pub fn allocate(&mut self) -> Option<u32> {
        let (index, word) = self
            .words
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != 0)?;

        let bit = word.trailing_zeros();
        let position = index as u32 * WORD_BITS + bit;
        if position >= self.count {
            return None;
        }

        *word &= !(1u64 << bit);
        Some(self.offset + position)
    }

    /// Marks `table` as free.
    ///
    /// Returns `true` if the table was busy before. Ids outside the range are ignored.
    pub fn release(&mut self, table: u32) -> bool {
        let Some((index, mask)) = self.locate(table) else {
            return false;
        };
        let was_busy = self.words[index] & mask == 0;
        self.words[index] |= mask;
        was_busy
    }

    /// Marks `table` as busy without going through [Self::allocate].
    ///
    /// Returns `true` if the table was free before. Ids outside the range are ignored.
    pub fn set(&mut self, table: u32) -> bool {
        let Some((index, mask)) = self.locate(table) else {
            return false;
        };
        let was_free = self.words[index] & mask != 0;
        self.words[index] &= !mask;
        was_free
    }

    /// Returns `true` if `table` is in range and free.
    pub fn is_free(&self, table: u32) -> bool {
        self.locate(table)
            .is_some_and(|(index, mask)| self.words[index] & mask != 0)
    }

    /// Returns `true` if `table` lies within the range of this bitmap.
    pub fn contains(&self, table: u32) -> bool {
        self.locate(table).is_some()
    }

    /// Number of free tables.
    pub fn free_count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    /// Iterates over all busy tables in ascending order.
    pub fn busy(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.count)
            .filter(|position| {
                let word = self.words[(position / WORD_BITS) as usize];
                word & (1u64 << (position % WORD_BITS)) == 0
            })
            .map(|position| self.offset + position)
    }

    fn locate(&self, table: u32) -> Option<(usize, u64)> {
        let position = table.checked_sub(self.offset)?;
        if position >= self.count {
            return None;
        }
        Some((
            (position / WORD_BITS) as usize,
            1u64 << (position % WORD_BITS),
        ))
    }
}

impl fmt::Display for TableBitmap {
    // Format the busy tables as [a, b, ...] to keep log lines short for sparse pools.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, table) in self.busy().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{table}")?;
        }
        write!(f, "]")
    }
}
