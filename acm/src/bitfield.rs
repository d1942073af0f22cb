// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Named bit ranges inside 32-bit hardware words.

use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;

/// An inclusive range of bits `lo..=hi` inside a 32-bit word.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Field {
    pub lo: usize,
    pub hi: usize,
}

impl Field {
    pub const fn new(lo: usize, hi: usize) -> Self {
        Self { lo, hi }
    }

    pub const fn bit(at: usize) -> Self {
        Self { lo: at, hi: at }
    }

    pub const fn width(&self) -> usize {
        self.hi - self.lo + 1
    }

    /// Largest value the field can carry.
    pub const fn max(&self) -> u32 {
        if self.width() >= 32 {
            u32::MAX
        } else {
            (1 << self.width()) - 1
        }
    }

    pub fn load(&self, word: u32) -> u32 {
        word.view_bits::<Lsb0>()[self.lo..=self.hi].load_le::<u32>()
    }

    /// Stores `value` truncated to the field width; other bits are kept.
    pub fn store(&self, word: &mut u32, value: u32) {
        word.view_bits_mut::<Lsb0>()[self.lo..=self.hi].store_le(value & self.max());
    }

    pub fn flag(&self, word: u32) -> bool {
        self.load(word) != 0
    }

    pub fn set_flag(&self, word: &mut u32, value: bool) {
        self.store(word, value as u32);
    }
}

/// A structured hardware word with a single encode/decode pair.
pub trait Word: Sized {
    fn pack(&self) -> u32;
    fn unpack(word: u32) -> Self;

    fn to_le_bytes(&self) -> [u8; 4] {
        self.pack().to_le_bytes()
    }
}
