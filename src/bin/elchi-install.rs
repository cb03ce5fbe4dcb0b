//! Provisions a kind cluster on this host and installs the elchi stack into it.

use clap::Parser;
use elchi_kind::{
    config::InstallOpts,
    exec::{exit_code, Interrupted},
    host::SystemHost,
    kubestuff::KubeConnector,
    progress::init_logging,
    provision::{provision, Request},
};
use tracing::error;

async fn inner_main(opts: InstallOpts) -> anyhow::Result<()> {
    let settings = opts.common.settings()?;
    let host = SystemHost::new()?;
    let request = Request {
        address: opts.address,
        port: opts.port,
    };

    // dropping the pipeline on ctrl-c still runs its guards
    let summary = tokio::select! {
        res = provision(&settings, &request, &host, &KubeConnector) => res?,
        _ = tokio::signal::ctrl_c() => return Err(Interrupted.into()),
    };
    println!("{}", summary.render());
    Ok(())
}

#[tokio::main]
async fn main() {
    let opts = InstallOpts::parse();
    init_logging(opts.common.verbose);
    if let Err(e) = inner_main(opts).await {
        error!("{:#}", e);
        std::process::exit(exit_code(&e));
    }
}
