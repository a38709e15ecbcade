use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error(transparent)]
    Store(#[from] harbor_store::StoreError),

    #[error("driver error while creating ship container: {0}")]
    Driver(#[from] harbor_driver::DriverError),

    #[error(transparent)]
    Scheduler(#[from] harbor_scheduler::SchedulerError),

    #[error("ship failed to become ready within the health check timeout")]
    HealthTimeout,

    #[error("at capacity ({running}/{max} running ships) and the wait for a free slot timed out")]
    CapacityWaitTimeout { running: usize, max: usize },

    #[error("at capacity ({running}/{max} running ships)")]
    CapacityExceeded { running: usize, max: usize },

    #[error("driver reported no address for the newly created container")]
    NoAddress,
}
