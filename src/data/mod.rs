pub mod dataset;
pub mod loader;
pub use dataset::Dataset;
pub use loader::{DataLoader, DataLoaderExt, DataLoaderIterator};
