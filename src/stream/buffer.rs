/*!
 * Stream Buffer
 * Fixed-capacity lossy ring of fixed-size records
 *
 * The producer never blocks on a full ring: the oldest unread record is
 * overwritten. Reads are destructive and return what is left in
 * chronological order, together with how many records were lost since the
 * previous read.
 */

use super::types::{IntegrityError, IntegrityResult, RecordShape, StreamConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Consumer-side transform applied to the records of a read
pub type RecordFilter = Arc<dyn Fn(Records) -> Records + Send + Sync>;

struct Ring {
    /// Records written since the last read or reset, never decremented by the producer
    index: u64,
    data: Vec<f64>,
    overwritten_total: u64,
}

/// Lock-guarded circular buffer of records
///
/// Writer and reader take the same lock; there is no reader/writer split.
pub struct StreamBuffer {
    shape: RecordShape,
    dim: usize,
    capacity: usize,
    ring: Mutex<Ring>,
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("shape", &self.shape)
            .field("capacity", &self.capacity)
            .field("index", &self.index())
            .finish()
    }
}

impl StreamBuffer {
    /// Create a ring holding `capacity` records of `shape`
    pub fn new(capacity: usize, shape: RecordShape) -> IntegrityResult<Self> {
        if capacity == 0 {
            return Err(IntegrityError::InvalidShape(
                "ring capacity must be at least one record".to_string(),
            ));
        }
        let dim = shape.size();
        Ok(Self {
            shape,
            dim,
            capacity,
            ring: Mutex::new(Ring {
                index: 0,
                data: vec![0.0; capacity * dim],
                overwritten_total: 0,
            }),
        })
    }

    /// Ring sized for `buffer_seconds` of samples at `update_freq`
    pub fn from_config(config: &StreamConfig) -> IntegrityResult<Self> {
        Self::new(config.capacity(), config.shape.clone())
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> &RecordShape {
        &self.shape
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Store one record at slot `index mod capacity`
    pub fn write(&self, record: &[f64]) -> IntegrityResult<()> {
        if record.len() != self.dim {
            return Err(IntegrityError::DimensionMismatch {
                expected: self.dim,
                actual: record.len(),
            });
        }
        let mut ring = self.ring.lock();
        self.store(&mut ring, record);
        Ok(())
    }

    /// Store every record of a flat run of values
    ///
    /// Rejected as a whole unless `flat` is a whole number of records.
    pub fn extend(&self, flat: &[f64]) -> IntegrityResult<()> {
        if flat.len() % self.dim != 0 {
            return Err(IntegrityError::RaggedRegion {
                len: flat.len(),
                dim: self.dim,
            });
        }
        let mut ring = self.ring.lock();
        for record in flat.chunks_exact(self.dim) {
            self.store(&mut ring, record);
        }
        Ok(())
    }

    fn store(&self, ring: &mut Ring, record: &[f64]) {
        if ring.index >= self.capacity as u64 {
            ring.overwritten_total += 1;
        }
        let slot = (ring.index % self.capacity as u64) as usize * self.dim;
        ring.data[slot..slot + self.dim].copy_from_slice(record);
        ring.index += 1;
    }

    /// Take every buffered record, oldest first, and empty the ring
    pub fn read_all(&self) -> IntegrityResult<Records> {
        let mut ring = self.ring.lock();
        let index = ring.index;
        let cap = self.capacity as u64;

        let (flat, overwritten) = if index <= cap {
            (ring.data[..index as usize * self.dim].to_vec(), 0)
        } else {
            let split = (index % cap) as usize * self.dim;
            let mut flat = Vec::with_capacity(ring.data.len());
            flat.extend_from_slice(&ring.data[split..]);
            flat.extend_from_slice(&ring.data[..split]);
            (flat, index - cap)
        };
        ring.index = 0;
        drop(ring);

        Records::from_flat(self.shape.clone(), flat, overwritten)
    }

    /// Run `f` while holding the ring lock, so no sample lands meanwhile
    pub fn with_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.ring.lock();
        f()
    }

    /// Drop everything buffered without reading it
    pub fn reset(&self) {
        self.ring.lock().index = 0;
    }

    /// Records written since the last read or reset
    #[must_use]
    pub fn index(&self) -> u64 {
        self.ring.lock().index
    }

    /// Records a read would return right now
    #[must_use]
    pub fn len(&self) -> usize {
        self.index().min(self.capacity as u64) as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index() == 0
    }

    /// Records overwritten before anyone read them, over the ring's lifetime
    #[must_use]
    pub fn overwritten_total(&self) -> u64 {
        self.ring.lock().overwritten_total
    }
}

/// Records returned by one read, in chronological order
///
/// Decoding from the wire goes through the same ragged check as `from_flat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordsFrame")]
pub struct Records {
    shape: RecordShape,
    data: Vec<f64>,
    overwritten: u64,
}

#[derive(Deserialize)]
struct RecordsFrame {
    shape: RecordShape,
    data: Vec<f64>,
    overwritten: u64,
}

impl TryFrom<RecordsFrame> for Records {
    type Error = IntegrityError;

    fn try_from(frame: RecordsFrame) -> IntegrityResult<Self> {
        Records::from_flat(frame.shape, frame.data, frame.overwritten)
    }
}

impl Records {
    /// Decode a flat region, refusing one that is not a whole number of records
    pub fn from_flat(shape: RecordShape, data: Vec<f64>, overwritten: u64) -> IntegrityResult<Self> {
        let dim = shape.size();
        if data.len() % dim != 0 {
            return Err(IntegrityError::RaggedRegion {
                len: data.len(),
                dim,
            });
        }
        Ok(Self {
            shape,
            data,
            overwritten,
        })
    }

    #[must_use]
    pub fn empty(shape: RecordShape) -> Self {
        Self {
            shape,
            data: Vec::new(),
            overwritten: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> &RecordShape {
        &self.shape
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.shape.size()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Records lost to overwriting since the previous read
    #[inline]
    #[must_use]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    pub fn iter(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.shape.size())
    }

    #[must_use]
    pub fn get(&self, i: usize) -> Option<&[f64]> {
        let dim = self.shape.size();
        self.data.get(i * dim..(i + 1) * dim)
    }

    #[must_use]
    pub fn as_flat(&self) -> &[f64] {
        &self.data
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Vec<f64>> {
        self.iter().map(<[f64]>::to_vec).collect()
    }

    /// Keep only records matching `keep`
    #[must_use]
    pub fn retain(self, mut keep: impl FnMut(&[f64]) -> bool) -> Self {
        let dim = self.shape.size();
        let data = self
            .data
            .chunks_exact(dim)
            .filter(|r| keep(*r))
            .flatten()
            .copied()
            .collect();
        Self { data, ..self }
    }
}

impl<'a> IntoIterator for &'a Records {
    type Item = &'a [f64];
    type IntoIter = std::slice::ChunksExact<'a, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
