//! Chain command - a single chain with a final link

use tracing::info;

use super::{named_link, print_context};
use crate::domain::{Chain, RegistrationError};

pub async fn run() -> anyhow::Result<()> {
    let ctx = build()?.run(()).await?;

    info!(run_id = %ctx.id(), "Chain finished");
    print_context(&ctx)
}

fn build() -> Result<Chain, RegistrationError> {
    let chain = Chain::named("demo");

    for name in ["firstLink", "secondLink", "thirdLink", "fourthLink"] {
        chain.add(named_link(name))?;
    }
    chain.add_final(named_link("finalLink"))?;

    Ok(chain)
}
