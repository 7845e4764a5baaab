pub trait Dataset<Sample> {
    /// Returns the number of samples in the dataset.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retrieves a sample by its index.
    fn get_sample(&self, index: usize) -> Sample;
}

impl<T: Clone> Dataset<T> for Vec<T> {
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn get_sample(&self, index: usize) -> T {
        self[index].clone()
    }
}
