pub mod bilinear;
pub mod encoder;
pub mod linear;

pub use bilinear::BilinearLayer;
pub use encoder::{EmbeddingBagEncoder, Encoder};
pub use linear::LinearLayer;
