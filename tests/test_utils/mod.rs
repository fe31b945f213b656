
pub use cluster::*;
pub use setup::*;
pub use validate::*;
