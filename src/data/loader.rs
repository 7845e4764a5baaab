use rand::seq::{index, SliceRandom};

use crate::data::dataset::Dataset;
use crate::random::TensorRng;

pub trait DataLoader<D, Sample, Batch>
where
    D: Dataset<Sample>,
{
    fn get_dataset(&self) -> &D;
    fn get_batch_size(&self) -> usize;
    fn collate(&self, samples: Vec<Sample>) -> Batch;

    fn num_batches(&self) -> usize {
        let batch_size = self.get_batch_size();
        if batch_size == 0 {
            0
        } else {
            self.get_dataset().len().div_ceil(batch_size)
        }
    }
}

/// An iterator over batches from a DataLoader.
///
/// The final batch is smaller when the dataset size is not a multiple of the
/// batch size.
pub struct DataLoaderIterator<'a, D, Sample, Batch>
where
    D: Dataset<Sample>,
{
    loader: &'a dyn DataLoader<D, Sample, Batch>,
    indices: Vec<usize>,
    current_index: usize,
}

impl<D, Sample, Batch> Iterator for DataLoaderIterator<'_, D, Sample, Batch>
where
    D: Dataset<Sample>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let batch_size = self.loader.get_batch_size();
        if self.current_index >= self.indices.len() || batch_size == 0 {
            return None;
        }

        let end = (self.current_index + batch_size).min(self.indices.len());
        let batch: Vec<Sample> = self.indices[self.current_index..end]
            .iter()
            .map(|&idx| self.loader.get_dataset().get_sample(idx))
            .collect();

        self.current_index = end;

        Some(self.loader.collate(batch))
    }
}

pub trait DataLoaderExt<D, Sample, Batch>
where
    D: Dataset<Sample>,
{
    fn iter(&self) -> DataLoaderIterator<'_, D, Sample, Batch>;
    fn iter_shuffled(&self, rng: &mut TensorRng) -> DataLoaderIterator<'_, D, Sample, Batch>;
    /// First batch of a fresh shuffle: `batch_size` distinct samples drawn
    /// with `rng`, or `None` for an empty dataset.
    fn random_batch(&self, rng: &mut TensorRng) -> Option<Batch>;
}

impl<D, Sample, Batch, T: DataLoader<D, Sample, Batch>> DataLoaderExt<D, Sample, Batch> for T
where
    D: Dataset<Sample>,
{
    /// Creates an iterator over the dataset in sequential order
    fn iter(&self) -> DataLoaderIterator<'_, D, Sample, Batch> {
        DataLoaderIterator {
            loader: self,
            indices: (0..self.get_dataset().len()).collect(),
            current_index: 0,
        }
    }

    /// Creates an iterator over the dataset with shuffled indices
    fn iter_shuffled(&self, rng: &mut TensorRng) -> DataLoaderIterator<'_, D, Sample, Batch> {
        let mut shuffled_indices: Vec<usize> = (0..self.get_dataset().len()).collect();
        shuffled_indices.shuffle(rng);

        DataLoaderIterator {
            loader: self,
            indices: shuffled_indices,
            current_index: 0,
        }
    }

    fn random_batch(&self, rng: &mut TensorRng) -> Option<Batch> {
        let len = self.get_dataset().len();
        let amount = self.get_batch_size().min(len);
        if amount == 0 {
            return None;
        }
        let samples = index::sample(rng, len, amount)
            .into_iter()
            .map(|idx| self.get_dataset().get_sample(idx))
            .collect();
        Some(self.collate(samples))
    }
}
