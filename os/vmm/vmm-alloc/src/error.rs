use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
pub enum AllocError {
    /// No free block of the requested order or any larger one.
    #[error("out of memory (order {order})")]
    OutOfMemory { order: u8 },
}
