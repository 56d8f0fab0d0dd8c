//! # CLI Interface
//!
//! Command-line argument structure for `bon-node`, using `clap` derive.
//! Global flags pick the data directory and logging; each subcommand is one
//! wallet operation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Bon wallet node.
///
/// Issues, transfers and redeems split-key vouchers. Transfers are printed
/// and read as base64 QR payloads; the event log lives in the data
/// directory next to the wallet.
#[derive(Parser, Debug)]
#[command(
    name = "bon-node",
    about = "Bon voucher wallet",
    version,
    propagate_version = true
)]
pub struct BonNodeCli {
    /// Wallet data directory: config, identity key and databases.
    #[arg(long, short = 'd', global = true, env = "BON_DATA_DIR", default_value = "bon-data")]
    pub data_dir: PathBuf,

    /// Default log directive when `RUST_LOG` is not set.
    #[arg(long, global = true, env = "BON_LOG", default_value = "bon_node=info,bon_protocol=warn")]
    pub log_level: String,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Pretty)]
    pub log_format: LogFormatArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory, the identity key and `config.json`.
    Init(InitArgs),
    /// Issue a new voucher held entirely by this wallet.
    Issue(IssueArgs),
    /// Publish the announcement and today's witness of a voucher.
    Announce(VoucherArg),
    /// Read announcements, witnesses and retirements from the log.
    Sync,
    /// Lock a voucher and print the offer QR payload.
    Offer(OfferArgs),
    /// Lock a voucher and print a self-contained snapshot QR payload.
    Snapshot(VoucherArg),
    /// Accept a scanned offer or snapshot and print the ack payload.
    Receive(PayloadArg),
    /// Finish an outgoing transfer with the receiver's ack payload.
    Complete(PayloadArg),
    /// Release the transfer lock of a voucher.
    Cancel(VoucherArg),
    /// Retire a voucher issued by this wallet.
    Burn(VoucherArg),
    /// Flush the outbox and reconcile against the event log.
    Reconcile,
    /// List vouchers in this wallet.
    List(ListArgs),
    /// Stay online and keep the wallet in sync until interrupted.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name of the local market.
    #[arg(long, env = "BON_MARKET", default_value = "default")]
    pub market: String,

    /// Hex market seed shared by all members. Generated when omitted.
    #[arg(long, env = "BON_MARKET_SEED")]
    pub market_seed: Option<String>,

    /// Overwrite an existing identity key.
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct IssueArgs {
    /// Value in minor currency units.
    #[arg(long)]
    pub value: u32,

    /// Days until the voucher expires. Never expires when omitted.
    #[arg(long)]
    pub validity_days: Option<u64>,

    /// Issuer display name carried in snapshots (20 bytes on the wire).
    #[arg(long, default_value = "")]
    pub name: String,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub rarity: Option<String>,
}

#[derive(Args, Debug)]
pub struct VoucherArg {
    /// Voucher id, 64 hex characters.
    pub id: String,
}

#[derive(Args, Debug)]
pub struct OfferArgs {
    /// Voucher id, 64 hex characters.
    pub id: String,

    /// Re-show the offer for an existing lock instead of taking a new one.
    #[arg(long)]
    pub again: bool,
}

#[derive(Args, Debug)]
pub struct PayloadArg {
    /// Base64 QR payload.
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include spent, burned and expired vouchers.
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Seconds between maintenance passes.
    #[arg(long, env = "BON_SYNC_INTERVAL", default_value_t = 60)]
    pub interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        BonNodeCli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = BonNodeCli::try_parse_from([
            "bon-node",
            "list",
            "--all",
            "--data-dir",
            "/tmp/wallet",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, PathBuf::from("/tmp/wallet"));
        assert_eq!(cli.log_format, LogFormatArg::Json);
        assert!(matches!(cli.command, Commands::List(ListArgs { all: true })));
    }

    #[test]
    fn offer_again_flag() {
        let cli = BonNodeCli::try_parse_from(["bon-node", "offer", "ab", "--again"]).unwrap();
        match cli.command {
            Commands::Offer(args) => {
                assert_eq!(args.id, "ab");
                assert!(args.again);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
