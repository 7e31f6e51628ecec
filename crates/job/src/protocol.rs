use async_trait::async_trait;

use crate::channel::JobChannel;
use crate::error::JobResult;

/// A protocol that runs inside a job and exchanges messages only through
/// the job's channel.
#[async_trait]
pub trait Protocol: Send + Sync {
    type Output: Send;

    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn execute(&self, channel: &JobChannel) -> JobResult<Self::Output>;
}
