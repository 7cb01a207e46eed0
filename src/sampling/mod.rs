pub mod gaussian;
pub mod uniform;

pub use gaussian::{read_and_add_lvl, sample_discrete_gaussian, sample_gaussian_poly};
pub use uniform::{sample_binary_poly, sample_ternary_poly, sample_uniform_poly};
