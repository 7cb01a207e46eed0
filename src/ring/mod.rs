pub mod extend;
pub mod modular;
pub mod ntt;
pub mod poly;

pub use extend::{BasisExtender, RnsScaler};
pub use modular::{barrett_reduce, mod_add, mod_mul, mod_neg, mod_sub, montgomery_reduce};
pub use ntt::NttTables;
pub use poly::{RnsContext, RnsPoly};
