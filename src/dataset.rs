use crate::result::Result;
use anyhow::ensure;
use ndarray::{Array1, ArrayBase, ArrayD, ArrayView1, ArrayViewD, Axis, Data, Dimension};
use rand::{seq::SliceRandom, Rng};
use std::ops::{Bound, Range, RangeBounds};

/// MNIST.
#[cfg(feature = "mnist")]
#[cfg_attr(doc_cfg, doc(cfg(feature = "mnist")))]
pub mod mnist;

/// A batch of samples and their classes.
///
/// The first axis of `inputs` is the batch axis. The remaining axes are flattened by the network.
#[derive(Clone, Debug)]
pub struct Batch {
    /// The inputs, with shape `[batch_size, ..]`.
    pub inputs: ArrayD<f32>,
    /// The class of each sample.
    pub classes: Array1<usize>,
}

impl Batch {
    /// Creates a new batch.
    ///
    /// **Errors**
    ///
    /// The first axis of `inputs` does not match the length of `classes`.
    pub fn new<S, D>(inputs: ArrayBase<S, D>, classes: Array1<usize>) -> Result<Self>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        ensure!(
            inputs.shape().first() == Some(&classes.len()),
            "Batch inputs {:?} do not match {} classes!",
            inputs.shape(),
            classes.len()
        );
        Ok(Self {
            inputs: inputs.into_owned().into_dyn(),
            classes,
        })
    }
    /// The number of samples.
    pub fn len(&self) -> usize {
        self.classes.len()
    }
    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// A provider of samples.
///
/// Training only consumes this contract: the number of samples, and sampling a batch by index.
/// [`.batches()`](Dataset::batches()) and [`.shuffled_batches()`](Dataset::shuffled_batches())
/// produce a lazy, one directional sequence of batches, restarted each epoch by calling them again.
pub trait Dataset {
    /// The number of samples.
    fn len(&self) -> usize;
    /// Whether there are no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Collects the samples at `indices` into a batch.
    ///
    /// # Panics
    /// An index is out of bounds.
    fn sample(&self, indices: &[usize]) -> Batch;
    /// Iterates over the samples in order, in batches of `batch_size`.
    ///
    /// The last batch may be smaller.
    ///
    /// # Panics
    /// `batch_size` is 0.
    fn batches(&self, batch_size: usize) -> Batches<'_, Self>
    where
        Self: Sized,
    {
        Batches::new(self, (0..self.len()).collect(), batch_size)
    }
    /// Like [`.batches()`](Dataset::batches()), but the samples are shuffled with `rng`.
    ///
    /// Samples are drawn without replacement, each sample appears exactly once.
    fn shuffled_batches<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Batches<'_, Self>
    where
        Self: Sized,
    {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        Batches::new(self, indices, batch_size)
    }
    /// A view of a contiguous range of samples.
    fn slice(&self, bounds: impl RangeBounds<usize>) -> Slice<'_, Self>
    where
        Self: Sized,
    {
        let start = match bounds.start_bound() {
            Bound::Included(start) => *start,
            Bound::Excluded(start) => *start + 1,
            Bound::Unbounded => 0,
        };
        let end = match bounds.end_bound() {
            Bound::Included(end) => *end + 1,
            Bound::Excluded(end) => *end,
            Bound::Unbounded => self.len(),
        }
        .min(self.len());
        Slice {
            dataset: self,
            range: start.min(end)..end,
        }
    }
}

/// Splits `dataset` into (train, test), where test is the last `test_ratio` of the samples.
pub fn train_test_split<A: Dataset>(dataset: &A, test_ratio: f32) -> (Slice<'_, A>, Slice<'_, A>) {
    let len = dataset.len();
    let test_len = ((test_ratio * len as f32).round() as usize).min(len);
    let test_offset = len - test_len;
    (dataset.slice(..test_offset), dataset.slice(test_offset..))
}

/// A range of samples of a dataset.
///
/// See [`Dataset::slice()`].
#[derive(Debug)]
pub struct Slice<'a, A> {
    dataset: &'a A,
    range: Range<usize>,
}

impl<A> Clone for Slice<'_, A> {
    fn clone(&self) -> Self {
        Self {
            dataset: self.dataset,
            range: self.range.clone(),
        }
    }
}

impl<A: Dataset> Dataset for Slice<'_, A> {
    fn len(&self) -> usize {
        self.range.len()
    }
    fn sample(&self, indices: &[usize]) -> Batch {
        let start = self.range.start;
        let indices: Vec<usize> = indices
            .iter()
            .map(|index| {
                assert!(
                    *index < self.range.len(),
                    "index {index} out of bounds for slice of length {}!",
                    self.range.len()
                );
                start + index
            })
            .collect();
        self.dataset.sample(&indices)
    }
}

/// Iterator over the batches of a dataset.
///
/// See [`Dataset::batches()`].
#[derive(Debug)]
pub struct Batches<'a, A> {
    dataset: &'a A,
    indices: Vec<usize>,
    offset: usize,
    batch_size: usize,
}

impl<'a, A: Dataset> Batches<'a, A> {
    fn new(dataset: &'a A, indices: Vec<usize>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive!");
        Self {
            dataset,
            indices,
            offset: 0,
            batch_size,
        }
    }
}

impl<A: Dataset> Iterator for Batches<'_, A> {
    type Item = Batch;
    fn next(&mut self) -> Option<Batch> {
        if self.offset >= self.indices.len() {
            return None;
        }
        let end = (self.offset + self.batch_size).min(self.indices.len());
        let batch = self.dataset.sample(&self.indices[self.offset..end]);
        self.offset = end;
        Some(batch)
    }
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.indices.len() - self.offset;
        let batches = (remaining + self.batch_size - 1) / self.batch_size;
        (batches, Some(batches))
    }
}

impl<A: Dataset> ExactSizeIterator for Batches<'_, A> {}

/// A dataset stored in memory.
#[derive(Clone, Debug)]
pub struct ArrayDataset {
    inputs: ArrayD<f32>,
    classes: Array1<usize>,
}

impl ArrayDataset {
    /// Creates a dataset from `inputs` with shape `[samples, ..]` and their `classes`.
    ///
    /// **Errors**
    ///
    /// The number of inputs and classes differ.
    pub fn new<S, D>(inputs: ArrayBase<S, D>, classes: Array1<usize>) -> Result<Self>
    where
        S: Data<Elem = f32>,
        D: Dimension,
    {
        let Batch { inputs, classes } = Batch::new(inputs, classes)?;
        Ok(Self { inputs, classes })
    }
    /// The inputs.
    pub fn inputs(&self) -> ArrayViewD<f32> {
        self.inputs.view()
    }
    /// The classes.
    pub fn classes(&self) -> ArrayView1<usize> {
        self.classes.view()
    }
}

impl Dataset for ArrayDataset {
    fn len(&self) -> usize {
        self.classes.len()
    }
    fn sample(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.inputs.select(Axis(0), indices),
            classes: indices.iter().map(|index| self.classes[*index]).collect(),
        }
    }
}
