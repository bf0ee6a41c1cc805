//! Dense per (chip group, time bin) result storage
//!
//! Each chip group owns a list of fixed-size chunks. Writing a time bin
//! past the end allocates whole chunks, so a long readout grows in a few
//! steps instead of one reallocation per time bin.

use tpc_core::ChipGroup;

/// Default time bins per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 512;

struct Chunk<T> {
    cells: Box<[T]>,
    filled: Box<[bool]>,
}

impl<T: Default + Clone> Chunk<T> {
    fn new(size: usize) -> Self {
        Self {
            cells: vec![T::default(); size].into_boxed_slice(),
            filled: vec![false; size].into_boxed_slice(),
        }
    }
}

struct GroupRow<T> {
    chunks: Vec<Chunk<T>>,
    max_time_bin: Option<u32>,
}

impl<T> Default for GroupRow<T> {
    fn default() -> Self {
        Self {
            chunks: Vec::new(),
            max_time_bin: None,
        }
    }
}

/// Chunked 2D table indexed by [chip group][time bin]
pub struct CmTable<T> {
    chunk_size: usize,
    groups: Vec<GroupRow<T>>,
}

impl<T> std::fmt::Debug for CmTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmTable")
            .field("chunk_size", &self.chunk_size)
            .field("groups", &self.groups.iter().filter(|g| !g.chunks.is_empty()).count())
            .finish()
    }
}

impl<T: Default + Clone> Default for CmTable<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl<T: Default + Clone> CmTable<T> {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            groups: Vec::new(),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    fn locate(&self, time_bin: u32) -> (usize, usize) {
        let tb = time_bin as usize;
        (tb / self.chunk_size, tb % self.chunk_size)
    }

    /// Store a value, returning the previous one if the cell was filled
    pub fn insert(&mut self, group: ChipGroup, time_bin: u32, value: T) -> Option<T> {
        let (chunk, slot) = self.locate(time_bin);
        let index = group.index();
        if self.groups.len() <= index {
            self.groups.resize_with(index + 1, GroupRow::default);
        }
        let chunk_size = self.chunk_size;
        let row = &mut self.groups[index];
        while row.chunks.len() <= chunk {
            row.chunks.push(Chunk::new(chunk_size));
        }
        row.max_time_bin = Some(row.max_time_bin.map_or(time_bin, |m| m.max(time_bin)));

        let target = &mut row.chunks[chunk];
        let previous = std::mem::replace(&mut target.cells[slot], value);
        let was_filled = std::mem::replace(&mut target.filled[slot], true);
        was_filled.then_some(previous)
    }

    #[inline]
    pub fn get(&self, group: ChipGroup, time_bin: u32) -> Option<&T> {
        let (chunk, slot) = self.locate(time_bin);
        let chunk = self.groups.get(group.index())?.chunks.get(chunk)?;
        chunk.filled[slot].then(|| &chunk.cells[slot])
    }

    /// Largest time bin stored for a chip group
    pub fn max_time_bin(&self, group: ChipGroup) -> Option<u32> {
        self.groups.get(group.index())?.max_time_bin
    }

    /// Number of allocated chunks of a chip group
    pub fn chunks(&self, group: ChipGroup) -> usize {
        self.groups.get(group.index()).map_or(0, |g| g.chunks.len())
    }

    /// Chip groups with at least one stored cell
    pub fn groups(&self) -> impl Iterator<Item = ChipGroup> + '_ {
        self.groups
            .iter()
            .enumerate()
            .filter(|(_, row)| row.max_time_bin.is_some())
            .map(|(index, _)| ChipGroup::new(index as u16))
    }

    /// Move the rows of `other` into this table
    ///
    /// Rows of chip groups present in both tables are replaced.
    pub fn merge(&mut self, other: CmTable<T>) {
        if other.chunk_size != self.chunk_size {
            for (group, time_bin, value) in other.iter() {
                self.insert(group, time_bin, value.clone());
            }
            return;
        }
        if self.groups.len() < other.groups.len() {
            self.groups.resize_with(other.groups.len(), GroupRow::default);
        }
        for (index, row) in other.groups.into_iter().enumerate() {
            if row.max_time_bin.is_some() {
                self.groups[index] = row;
            }
        }
    }

    /// Filled cells as (chip group, time bin, value), ordered by group then time
    pub fn iter(&self) -> impl Iterator<Item = (ChipGroup, u32, &T)> + '_ {
        let chunk_size = self.chunk_size;
        self.groups.iter().enumerate().flat_map(move |(index, row)| {
            row.chunks.iter().enumerate().flat_map(move |(c, chunk)| {
                chunk
                    .cells
                    .iter()
                    .zip(chunk.filled.iter())
                    .enumerate()
                    .filter(|(_, (_, filled))| **filled)
                    .map(move |(slot, (value, _))| {
                        (ChipGroup::new(index as u16), (c * chunk_size + slot) as u32, value)
                    })
            })
        })
    }

    /// Number of filled cells
    pub fn len(&self) -> usize {
        self.groups
            .iter()
            .flat_map(|row| row.chunks.iter())
            .map(|chunk| chunk.filled.iter().filter(|&&f| f).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|row| row.max_time_bin.is_none())
    }
}
