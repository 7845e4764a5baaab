mod add;
mod mul;

pub use add::AddScalar;
pub use mul::MulScalar;
