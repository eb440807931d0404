//-
// Copyright (c) 2026, The Mallard Authors
//
// This file is part of Mallard.
//
// Mallard is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mallard is distributed  in the hope that it  will be useful,  but WITHOUT
// ANY  WARRANTY;  without  even  the implied  warranty of  MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mallard. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;

use structopt::StructOpt;

use crate::support::system_config::SystemConfig;

#[derive(StructOpt)]
#[structopt(
    name = "mallard",
    about = "Multi-protocol mail server: IMAP4rev1 and LMTP over a \
             document-style mailbox store"
)]
struct Mallard {
    /// Path to the configuration file.
    #[structopt(
        short,
        long,
        default_value = "/usr/local/etc/mallard/mallard.toml",
        parse(from_os_str)
    )]
    config: PathBuf,

    #[structopt(subcommand)]
    command: MallardSubcommand,
}

#[derive(StructOpt)]
enum MallardSubcommand {
    /// Run the mail server.
    Serve(ServeSubcommand),
}

#[derive(StructOpt)]
struct ServeSubcommand {
    #[structopt(subcommand)]
    what: ServeWhat,

    /// Create an account at startup, as `name:password:address`. The
    /// reference store is in-memory, so something must populate it.
    #[structopt(long)]
    demo_user: Option<String>,
}

#[derive(StructOpt)]
enum ServeWhat {
    /// Serve only IMAP.
    Imap,
    /// Serve only LMTP.
    Lmtp,
    /// Serve both protocols.
    All,
}

pub fn main() {
    let opts = Mallard::from_args();

    crate::init_simple_log();

    let config = match load_config(&opts.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "mallard: cannot load {}: {}",
                opts.config.display(),
                e
            );
            std::process::exit(1);
        },
    };

    match opts.command {
        MallardSubcommand::Serve(serve_options) => {
            let protocols = match serve_options.what {
                ServeWhat::Imap => super::serve::Protocols::Imap,
                ServeWhat::Lmtp => super::serve::Protocols::Lmtp,
                ServeWhat::All => super::serve::Protocols::All,
            };

            if let Err(e) = super::serve::serve(
                config,
                protocols,
                serve_options.demo_user.as_deref(),
            ) {
                eprintln!("mallard: {}", e);
                std::process::exit(1);
            }
        },
    }
}

fn load_config(
    path: &std::path::Path,
) -> Result<SystemConfig, crate::support::error::Error> {
    let text = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&text)?)
}
