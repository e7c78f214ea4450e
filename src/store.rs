use std::sync::{Arc, LockResult, PoisonError, RwLock, RwLockWriteGuard};

use crate::error::StoreError;

/// One reading across all seven channels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub epoch_time: f64,
    pub elapsed_time: f32,
    pub displacement: f32,
    pub engineering_strain: f32,
    pub true_strain: f32,
    pub strain_rate: f32,
    pub temperature: f32,
}

/// Append-only time series for one run.
///
/// `len()` is the number of valid samples, `capacity()` the allocated slots. Slots past
/// `len()` are never observable, so no sentinel values are needed.
#[derive(Debug)]
pub struct SampleStore {
    samples: Vec<Sample>,
    capacity: usize,
}

impl SampleStore {
    pub fn with_capacity(initial: usize) -> Result<Self, StoreError> {
        let capacity = initial.max(1);
        let mut samples = Vec::new();
        samples
            .try_reserve_exact(capacity)
            .map_err(|_| StoreError::Allocation {
                requested: capacity,
            })?;
        Ok(Self { samples, capacity })
    }
    pub fn len(&self) -> usize {
        self.samples.len()
    }
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Stores `sample` at index `len()` and returns that index.
    ///
    /// Capacity doubles when full; existing samples are moved untouched.
    pub fn append(&mut self, sample: Sample) -> Result<usize, StoreError> {
        if self.samples.len() == self.capacity {
            let doubled = self.capacity * 2;
            self.samples
                .try_reserve_exact(doubled - self.samples.len())
                .map_err(|_| StoreError::Allocation { requested: doubled })?;
            self.capacity = doubled;
            log::debug!("sample store grown to {} slots", doubled);
        }
        let index = self.samples.len();
        self.samples.push(sample);
        Ok(index)
    }
    /// Up to `n` most recent samples, oldest first.
    pub fn tail(&self, n: usize) -> &[Sample] {
        let start = self.samples.len().saturating_sub(n);
        &self.samples[start..]
    }
    /// Samples in `[from, to)`.
    pub fn slice(&self, from: usize, to: usize) -> Result<&[Sample], StoreError> {
        let count = self.samples.len();
        if from > to || to > count {
            return Err(StoreError::OutOfRange { from, to, count });
        }
        Ok(&self.samples[from..to])
    }
    pub fn last_index(&self) -> Result<usize, StoreError> {
        self.samples
            .len()
            .checked_sub(1)
            .ok_or(StoreError::NotStarted)
    }
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }
}

/// Read-only handle to a run's store, shared with the display side.
///
/// Every accessor copies out what it needs while holding the read lock, so callers see a
/// consistent snapshot and never hold up the acquisition thread for longer than the copy.
#[derive(Clone, Debug)]
pub struct StoreView {
    inner: Arc<RwLock<SampleStore>>,
}

impl StoreView {
    pub(crate) fn new(store: SampleStore) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }
    /// Write access, reserved for the acquisition loop.
    pub(crate) fn writer(&self) -> LockResult<RwLockWriteGuard<'_, SampleStore>> {
        self.inner.write()
    }
    fn read<T>(&self, f: impl FnOnce(&SampleStore) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
    pub fn len(&self) -> usize {
        self.read(SampleStore::len)
    }
    pub fn capacity(&self) -> usize {
        self.read(SampleStore::capacity)
    }
    pub fn tail(&self, n: usize) -> Vec<Sample> {
        self.read(|s| s.tail(n).to_vec())
    }
    pub fn slice(&self, from: usize, to: usize) -> Result<Vec<Sample>, StoreError> {
        self.read(|s| s.slice(from, to).map(<[Sample]>::to_vec))
    }
    pub fn latest(&self) -> Option<Sample> {
        self.read(|s| s.latest().copied())
    }
    pub fn last_index(&self) -> Result<usize, StoreError> {
        self.read(SampleStore::last_index)
    }
    /// Samples from `window_start` seconds onward, averaged over consecutive bins of
    /// `bin_size` samples (the last bin may be shorter).
    pub fn display_points(&self, window_start: f32, bin_size: usize) -> Vec<Sample> {
        let bin_size = bin_size.max(1);
        self.read(|s| {
            if s.is_empty() {
                return Vec::new();
            }
            let all = s.tail(s.len());
            let first = all.partition_point(|x| x.elapsed_time < window_start);
            all[first..].chunks(bin_size).map(mean_sample).collect()
        })
    }
}

fn mean_sample(bin: &[Sample]) -> Sample {
    let n = bin.len() as f32;
    let avg = |f: fn(&Sample) -> f32| bin.iter().map(f).sum::<f32>() / n;
    Sample {
        epoch_time: bin.iter().map(|x| x.epoch_time).sum::<f64>() / bin.len() as f64,
        elapsed_time: avg(|x| x.elapsed_time),
        displacement: avg(|x| x.displacement),
        engineering_strain: avg(|x| x.engineering_strain),
        true_strain: avg(|x| x.true_strain),
        strain_rate: avg(|x| x.strain_rate),
        temperature: avg(|x| x.temperature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn sample(i: usize) -> Sample {
        let f = i as f32;
        Sample {
            epoch_time: 1_700_000_000.0 + i as f64,
            elapsed_time: f,
            displacement: 0.5 + f * 1e-3,
            engineering_strain: f * 1e-4,
            true_strain: f * 1e-4,
            strain_rate: 1e-4,
            temperature: 400.0 + f,
        }
    }
    #[test]
    fn append_is_non_destructive_and_bounded_by_capacity() {
        let mut store = SampleStore::with_capacity(3).unwrap();
        for i in 0..50 {
            let before = store.tail(store.len()).to_vec();
            let index = store.append(sample(i)).unwrap();
            assert_eq!(index, i);
            assert_eq!(store.len(), before.len() + 1);
            assert!(store.len() <= store.capacity());
            assert_eq!(&store.tail(store.len())[..before.len()], &before[..]);
        }
    }
    #[test]
    fn doubling_preserves_every_channel_bit_for_bit() {
        let mut store = SampleStore::with_capacity(4).unwrap();
        for i in 0..4 {
            store.append(sample(i)).unwrap();
        }
        assert_eq!(store.capacity(), 4);
        let snapshot: Vec<Sample> = store.slice(0, 4).unwrap().to_vec();
        store.append(sample(4)).unwrap();
        assert_eq!(store.capacity(), 8);
        for (old, new) in snapshot.iter().zip(store.slice(0, 4).unwrap()) {
            assert_eq!(old.epoch_time.to_bits(), new.epoch_time.to_bits());
            assert_eq!(old.elapsed_time.to_bits(), new.elapsed_time.to_bits());
            assert_eq!(old.displacement.to_bits(), new.displacement.to_bits());
            assert_eq!(old.engineering_strain.to_bits(), new.engineering_strain.to_bits());
            assert_eq!(old.true_strain.to_bits(), new.true_strain.to_bits());
            assert_eq!(old.strain_rate.to_bits(), new.strain_rate.to_bits());
            assert_eq!(old.temperature.to_bits(), new.temperature.to_bits());
        }
    }
    #[test]
    fn tail_returns_what_exists() {
        let mut store = SampleStore::with_capacity(8).unwrap();
        assert!(store.tail(10).is_empty());
        for i in 0..3 {
            store.append(sample(i)).unwrap();
        }
        assert_eq!(store.tail(10).len(), 3);
        let last_two = store.tail(2);
        assert_eq!(last_two[0], sample(1));
        assert_eq!(last_two[1], sample(2));
    }
    #[test]
    fn slice_rejects_ranges_past_count() {
        let mut store = SampleStore::with_capacity(8).unwrap();
        for i in 0..3 {
            store.append(sample(i)).unwrap();
        }
        assert_eq!(store.slice(1, 3).unwrap().len(), 2);
        assert_eq!(store.slice(3, 3).unwrap().len(), 0);
        assert_eq!(
            store.slice(2, 5),
            Err(StoreError::OutOfRange {
                from: 2,
                to: 5,
                count: 3
            })
        );
        assert!(store.slice(2, 1).is_err());
    }
    #[test]
    fn last_index_before_first_sample() {
        let mut store = SampleStore::with_capacity(1).unwrap();
        assert_eq!(store.last_index(), Err(StoreError::NotStarted));
        store.append(sample(0)).unwrap();
        store.append(sample(1)).unwrap();
        assert_eq!(store.last_index(), Ok(1));
    }
    #[test]
    fn display_points_window_and_bins() {
        let mut store = SampleStore::with_capacity(4).unwrap();
        for i in 0..10 {
            store.append(sample(i)).unwrap();
        }
        let view = StoreView::new(store);
        let points = view.display_points(4.0, 2);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].elapsed_time, 4.5);
        assert_eq!(points[2].elapsed_time, 8.5);
        assert_eq!(view.display_points(0.0, 1).len(), 10);
        assert!(view.display_points(100.0, 3).is_empty());
    }
    #[test]
    fn readers_see_growing_prefix_while_writer_appends() {
        let view = StoreView::new(SampleStore::with_capacity(2).unwrap());
        let reader = view.clone();
        let handle = std::thread::spawn(move || {
            let mut last = 0;
            for _ in 0..200 {
                let tail = reader.tail(5);
                let len = reader.len();
                assert!(len >= last);
                assert!(tail.len() <= 5);
                for pair in tail.windows(2) {
                    assert!(pair[0].elapsed_time < pair[1].elapsed_time);
                }
                last = len;
            }
        });
        for i in 0..500 {
            view.writer().unwrap().append(sample(i)).unwrap();
        }
        handle.join().unwrap();
        assert_eq!(view.len(), 500);
        assert_eq!(view.latest(), Some(sample(499)));
        assert_eq!(view.last_index(), Ok(499));
        assert_eq!(view.capacity(), 512);
    }
    #[test]
    fn empty_view_has_no_index_or_points() {
        let view = StoreView::new(SampleStore::with_capacity(4).unwrap());
        assert_eq!(view.last_index(), Err(StoreError::NotStarted));
        assert!(view.display_points(0.0, 1).is_empty());
        assert_eq!(view.capacity(), 4);
    }
}
