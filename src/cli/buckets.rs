//! Buckets and exit commands - three buckets run over one context

use tracing::info;

use super::{named_link, print_context};
use crate::domain::{BucketChain, Link, RegistrationError};

pub async fn run() -> anyhow::Result<()> {
    execute(build(false)?).await
}

/// Same layout as [`run`], but the second bucket ends with `exit()`
pub async fn run_exit() -> anyhow::Result<()> {
    execute(build(true)?).await
}

async fn execute(buckets: BucketChain) -> anyhow::Result<()> {
    let ctx = buckets.run(()).await?;

    info!(run_id = %ctx.id(), buckets = buckets.len(), "Bucket chain finished");
    print_context(&ctx)
}

fn build(exit_early: bool) -> Result<BucketChain, RegistrationError> {
    let buckets = BucketChain::new();

    let first = buckets.bucket("firstBucket");
    let second = buckets.bucket("secondBucket");
    let third = buckets.bucket("thirdBucket");

    first.add(named_link("firstLink"))?;
    second.add(named_link("secondLink"))?;

    if exit_early {
        second.add(named_link("thirdLink"))?;
        second.add(Link::callback(|ctx, _, next| {
            ctx.append("links", "fourthLink");
            next.exit();
            Ok(())
        }))?;
        second.add(named_link("unreachableLink"))?;
        third.add(named_link("fifthLink"))?;
    } else {
        third.add(named_link("thirdLink"))?;
    }

    third.add_final(named_link("finalLink"))?;

    Ok(buckets)
}
