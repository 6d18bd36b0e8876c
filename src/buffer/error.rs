use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid queue capacity: {capacity}")]
    InvalidCapacity { capacity: usize },
}
