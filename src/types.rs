use std::sync::{Arc, RwLock};

use crate::error::DsmError;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

pub type DsmResult = Result<(), DsmError>;
