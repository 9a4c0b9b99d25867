//! Clap CLI definitions for p2pconnect.

use clap::Parser;
use std::ffi::OsString;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  p2pconnect                    Start a node and wait for peers on the LAN
  p2pconnect -peer-address /ip4/192.168.1.20/tcp/8080/p2p/12D3KooW...
                                Also connect to a known peer at startup

Logging is controlled by RUST_LOG (default: info).";

/// p2pconnect: LAN peer discovery and identity exchange.
#[derive(Parser, Debug)]
#[command(
    name = "p2pconnect",
    version,
    about = "Discover peers on the local network and exchange stream identities",
    after_help = AFTER_HELP,
)]
pub struct Cli {
    /// Peer to connect to at startup, as `<multiaddr>/p2p/<peer-id>`.
    #[arg(long, value_name = "ADDRESS")]
    pub peer_address: Option<String>,
}

/// Single-dash spelling of `--peer-address`, kept for compatibility.
const SINGLE_DASH_PEER_ADDRESS: &str = "-peer-address";

/// Rewrite `-peer-address` and `-peer-address=<v>` into their `--` forms.
///
/// Clap would otherwise read the single-dash form as a cluster of short
/// flags. Arguments after a `--` terminator are left alone.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut seen_terminator = false;
    args.into_iter()
        .map(|arg| {
            if seen_terminator {
                return arg;
            }
            let Some(text) = arg.to_str() else {
                return arg;
            };
            if text == "--" {
                seen_terminator = true;
                return arg;
            }
            match text.strip_prefix(SINGLE_DASH_PEER_ADDRESS) {
                Some(rest) if rest.is_empty() || rest.starts_with('=') => {
                    OsString::from(format!("-{text}"))
                }
                _ => arg,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const PEER: &str =
        "/ip4/127.0.0.1/tcp/8080/p2p/12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN";

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["p2pconnect"]).unwrap();
        assert!(cli.peer_address.is_none());
    }

    #[test]
    fn test_peer_address_flag() {
        let cli = Cli::try_parse_from([
            "p2pconnect",
            "--peer-address",
            "/ip4/127.0.0.1/tcp/8080/p2p/12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN",
        ])
        .unwrap();
        assert!(cli.peer_address.unwrap().starts_with("/ip4/127.0.0.1"));
    }

    fn parse_normalized(args: &[&str]) -> Cli {
        Cli::try_parse_from(normalize_args(args.iter().map(OsString::from))).unwrap()
    }

    #[test]
    fn test_single_dash_peer_address() {
        let cli = parse_normalized(&["p2pconnect", "-peer-address", PEER]);
        assert_eq!(cli.peer_address.as_deref(), Some(PEER));
    }

    #[test]
    fn test_single_dash_peer_address_with_equals() {
        let cli = parse_normalized(&["p2pconnect", format!("-peer-address={PEER}").as_str()]);
        assert_eq!(cli.peer_address.as_deref(), Some(PEER));
    }

    #[test]
    fn test_double_dash_survives_normalization() {
        let cli = parse_normalized(&["p2pconnect", "--peer-address", PEER]);
        assert_eq!(cli.peer_address.as_deref(), Some(PEER));
    }

    #[test]
    fn test_normalize_leaves_other_args_alone() {
        let args = normalize_args(
            ["p2pconnect", "-peer-addressx", "--", "-peer-address"]
                .iter()
                .map(OsString::from),
        );
        let expected: Vec<OsString> = ["p2pconnect", "-peer-addressx", "--", "-peer-address"]
            .iter()
            .map(OsString::from)
            .collect();
        assert_eq!(args, expected);
    }

    #[test]
    fn test_single_dash_without_normalization_is_rejected() {
        assert!(Cli::try_parse_from(["p2pconnect", "-peer-address", PEER]).is_err());
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["p2pconnect", "--bogus"]).is_err());
    }
}
