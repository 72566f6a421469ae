pub mod job;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod submit;

pub use job::{JobDescriptor, JobRecord, JobStatus};
pub use queue::WorkQueue;
pub use recovery::{recover, RecoveryPolicy, RecoveryReport};
pub use retry::{RetryScanner, ScanReport};
pub use submit::submit;
