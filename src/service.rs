use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A long-running background loop that cooperates with graceful shutdown.
/// The policy scheduler implements this; an auto-record consumer run as
/// its own standalone process rather than piggy-backed on the scheduler
/// tick would too.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, shutdown: CancellationToken);
}
