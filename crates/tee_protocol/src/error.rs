/// Reasons a job was refused at admission, before it ever reaches a handler.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("requester is not on the configured whitelist")]
    NotWhitelisted,

    #[error("job already executed")]
    DuplicateNonce,

    #[error("capability unhealthy: {0}")]
    CapabilityUnhealthy(String),

    #[error("queue full")]
    QueueFull,

    #[error("worker is shutting down")]
    QueueClosed,
}

/// Reasons a handler invocation failed to even run to completion.
/// Business-logic failures are reported through `JobResult::error`, not this type.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("handler exceeded its deadline")]
    Timeout,

    #[error("handler task panicked: {0}")]
    Panicked(String),
}
