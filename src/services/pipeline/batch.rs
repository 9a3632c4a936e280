use anyhow::Result;
use futures_util::future::join_all;
use std::future::Future;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Run work items in consecutive groups of at most `concurrency`. All items
/// of a group run concurrently; the next group starts only once the whole
/// group has settled. The token is checked before launching each group —
/// items already in flight are left to finish (the token also reaches the
/// provider call through `op`, which may abort early on its own).
///
/// `fold` is applied to every item's result the moment that item settles,
/// success or failure, so partial progress is visible before the batch ends.
pub async fn run_batch<I, O, Op, Fut, Fold>(
    items: Vec<I>,
    concurrency: usize,
    cancel: &CancellationToken,
    op: Op,
    fold: Fold,
) -> BatchOutcome
where
    I: Clone,
    Op: Fn(I) -> Fut,
    Fut: Future<Output = Result<O>>,
    Fold: Fn(I, Result<O>),
{
    let mut outcome = BatchOutcome::default();
    for group in items.chunks(concurrency.max(1)) {
        if cancel.is_cancelled() {
            break;
        }
        let settled = join_all(group.iter().cloned().map(|item| {
            let op = &op;
            let fold = &fold;
            async move {
                let result = op(item.clone()).await;
                let ok = result.is_ok();
                fold(item, result);
                ok
            }
        }))
        .await;
        for ok in settled {
            if ok {
                outcome.succeeded += 1;
            } else {
                outcome.failed += 1;
            }
        }
    }
    outcome
}
