//! Removes what elchi-install created: the cluster, its images and the
//! kubectl, kind and helm binaries. Docker and host packages stay.

use clap::Parser;
use elchi_kind::{
    config::UninstallOpts,
    exec::exit_code,
    host::SystemHost,
    progress::init_logging,
    teardown::{teardown, Outcome},
};
use tracing::error;

async fn inner_main(opts: UninstallOpts) -> anyhow::Result<()> {
    let settings = opts.common.settings()?;
    let host = SystemHost::new()?;
    match teardown(&settings, &host).await? {
        Outcome::Declined => println!("uninstall cancelled"),
        Outcome::Finished(report) => println!("{}", report.render(&settings)),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = UninstallOpts::parse();
    init_logging(opts.common.verbose);
    if let Err(e) = inner_main(opts).await {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}
