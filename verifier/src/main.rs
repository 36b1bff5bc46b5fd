// Copyright (c) Tessera Contributors
// SPDX-License-Identifier: Apache-2.0

//! The external verifier process. Launched by the node with its base
//! directory as the working directory; connects back to the node on the given
//! loopback port and serves verification requests until the node closes the
//! connection.

use std::net::{Ipv4Addr, TcpStream};
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use verification::fixup::AttachmentFixups;
use verifier::service::ExternalVerifier;

#[derive(Parser)]
#[command(name = "external-verifier", about = "Out-of-process transaction verifier")]
struct Args {
    /// Port on the node's loopback interface to connect back to.
    port: u16,
    /// Log level filter (e.g. info, debug, verifier=trace).
    #[arg(default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_level))
        .with_writer(std::io::stderr)
        .init();

    // The node redirects stdout/stderr to logs/ under the base directory,
    // which is also our working directory.
    let fixups = AttachmentFixups::load_from_dir(Path::new("fixups"))
        .context("loading attachment fix-up rules")?;

    info!(port = args.port, "connecting to node");
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, args.port))
        .context("connecting back to the node")?;
    stream.set_nodelay(true)?;

    let verifier =
        ExternalVerifier::initialise(stream, fixups).context("initialising the verifier")?;
    verifier.run().context("serving verification requests")?;
    Ok(())
}
