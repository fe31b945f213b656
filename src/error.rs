use std::{error::Error, fmt};

#[derive(Debug)]
pub struct DsmError {
    details: String,
}

impl DsmError {
    pub fn new(msg: &str) -> DsmError {
        DsmError {
            details: msg.to_string(),
        }
    }
}

impl fmt::Display for DsmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for DsmError {
    fn description(&self) -> &str {
        &self.details
    }
}
