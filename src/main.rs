use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remotezip::{HttpRangeFetcher, HttpRangeFetcherOptions, RemoteZip};

/// Read members out of a ZIP archive hosted on a remote HTTP server, without
/// downloading the whole archive.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the remote ZIP archive.
    url: String,

    /// Assume the server does not support `bytes=-N` suffix ranges, and
    /// issue a HEAD request to emulate one instead.
    #[arg(long)]
    no_suffix_range: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the members of the archive.
    List,
    /// Extract one member to stdout.
    Cat {
        /// Member name, as shown by `list`.
        name: String,
    },
    /// Read and CRC-check every member without saving any of them.
    Test,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let options = HttpRangeFetcherOptions {
        support_suffix_range: !args.no_suffix_range,
        ..Default::default()
    };
    let fetcher = HttpRangeFetcher::with_options(&args.url, options)
        .with_context(|| format!("building a range fetcher for {}", args.url))?;
    let mut remote_zip =
        RemoteZip::new(Box::new(fetcher)).with_context(|| format!("opening {}", args.url))?;

    match args.command {
        Command::List => {
            for name in remote_zip.member_names() {
                println!("{name}");
            }
        }
        Command::Cat { name } => {
            let bytes = remote_zip
                .read_member(&name)
                .with_context(|| format!("reading member {name}"))?;
            io::stdout().write_all(&bytes)?;
        }
        Command::Test => {
            remote_zip.test_integrity().context("checking archive integrity")?;
            eprintln!("{} members OK", remote_zip.member_names().len());
        }
    }

    remote_zip.close();
    Ok(())
}
