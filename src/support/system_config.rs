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

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mallard.
///
/// This is stored in a TOML file named on the command line, typically
/// `/usr/local/etc/mallard/mallard.toml`. Every field has a default so that
/// a minimal or even empty file is usable.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Configuration for the IMAP listener.
    #[serde(default)]
    pub imap: ImapConfig,

    /// Configuration for the LMTP listener.
    #[serde(default)]
    pub lmtp: LmtpConfig,

    /// TLS key material. When absent, STARTTLS is not offered and
    /// `imap.secure` may not be enabled.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapConfig {
    /// The address the IMAP listener binds.
    #[serde(default = "defaults::host")]
    pub host: String,
    /// The port the IMAP listener binds.
    #[serde(default = "defaults::imap_port")]
    pub port: u16,
    /// If true, the listener is wrapped in TLS from the first byte
    /// (implicit-TLS / "imaps" style). Requires `[tls]`.
    #[serde(default)]
    pub secure: bool,
    /// Suppresses the STARTTLS capability even when TLS is configured.
    #[serde(default)]
    pub starttls_disabled: bool,
    /// Default per-user storage quota, in bytes, applied when a user record
    /// carries no quota of its own. Zero means unlimited.
    #[serde(default)]
    pub max_storage: u64,
}

impl Default for ImapConfig {
    fn default() -> Self {
        ImapConfig {
            host: defaults::host(),
            port: defaults::imap_port(),
            secure: false,
            starttls_disabled: false,
            max_storage: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LmtpConfig {
    /// The address the LMTP listener binds.
    #[serde(default = "defaults::host")]
    pub host: String,
    /// The port the LMTP listener binds.
    #[serde(default = "defaults::lmtp_port")]
    pub port: u16,
    /// The banner hostname sent in the greeting and LHLO response.
    #[serde(default = "defaults::lmtp_banner")]
    pub banner: String,
    /// Maximum accepted message size in bytes, enforced at DATA.
    #[serde(default = "defaults::lmtp_max_size")]
    pub max_size: u64,
    /// Per-session read deadline, in seconds.
    #[serde(default = "defaults::lmtp_timeout")]
    pub read_timeout: u64,
    /// Per-session write deadline, in seconds.
    #[serde(default = "defaults::lmtp_timeout")]
    pub write_timeout: u64,
    /// Name of a header whose value `yes` routes the message to the
    /// recipient's junk mailbox. Empty disables the built-in spam filter.
    #[serde(default)]
    pub spam_header: String,
}

impl Default for LmtpConfig {
    fn default() -> Self {
        LmtpConfig {
            host: defaults::host(),
            port: defaults::lmtp_port(),
            banner: defaults::lmtp_banner(),
            max_size: defaults::lmtp_max_size(),
            read_timeout: defaults::lmtp_timeout(),
            write_timeout: defaults::lmtp_timeout(),
            spam_header: String::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TlsConfig {
    /// The path to the TLS certificate chain, which must be in PEM format.
    pub cert: PathBuf,
    /// The path to the TLS private key, which must be in PEM format.
    pub key: PathBuf,
}

mod defaults {
    pub fn host() -> String {
        "localhost".to_owned()
    }

    pub fn imap_port() -> u16 {
        143
    }

    pub fn lmtp_port() -> u16 {
        2003
    }

    pub fn lmtp_banner() -> String {
        "Wild Duck LMTP Server".to_owned()
    }

    pub fn lmtp_max_size() -> u64 {
        35 * 1024 * 1024
    }

    pub fn lmtp_timeout() -> u64 {
        600
    }
}
