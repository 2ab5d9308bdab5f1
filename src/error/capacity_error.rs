use thiserror::Error;

/// Indicates the specific type/cause of a capacity error.
#[derive(Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum CapacityError {
    /// An inbound frame or reassembled message exceeded the configured limit.
    #[error("message too long: {size} > {max_size}")]
    MessageTooLong {
        /// The size observed (or announced by the frame header).
        size: usize,
        /// The configured maximum.
        max_size: usize,
    },
    /// An outbound payload exceeded the configured limit.
    #[error("outgoing payload too long: {size} > {max_size}")]
    SendPayloadTooLong {
        /// The size of the payload handed to the write pipeline.
        size: usize,
        /// The configured maximum.
        max_size: usize,
    },
}
