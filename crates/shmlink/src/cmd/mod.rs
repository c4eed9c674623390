use clap::{Args, Subcommand, ValueEnum};
use shmlink_link::ChannelKind;
use shmlink_shmem::{DEFAULT_FMT_BUF_SIZE, DEFAULT_RAW_BUF_SIZE};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod feed;
mod harness;
pub mod layout;
pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the computed shared-region layout.
    Layout(LayoutArgs),
    /// Exchange frames over an in-process AP/CP link pair and report stats.
    Loopback(LoopbackArgs),
    /// Feed stdin lines through an in-process link and print the echoes.
    Feed(FeedArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Layout(args) => layout::run(args, format),
        Command::Loopback(args) => loopback::run(args, format),
        Command::Feed(args) => feed::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ChannelArg {
    /// Control channel.
    Fmt,
    /// Bulk data channel.
    Raw,
}

impl ChannelArg {
    pub fn kind(self) -> ChannelKind {
        match self {
            ChannelArg::Fmt => ChannelKind::Fmt,
            ChannelArg::Raw => ChannelKind::Raw,
        }
    }
}

#[derive(Args, Debug)]
pub struct LayoutArgs {
    /// FMT buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_FMT_BUF_SIZE)]
    pub fmt_buf: u32,
    /// RAW buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_RAW_BUF_SIZE)]
    pub raw_buf: u32,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Channel to exercise.
    #[arg(long, short = 'c', value_enum, default_value = "raw")]
    pub channel: ChannelArg,
    /// Frames to exchange.
    #[arg(long, default_value_t = 100)]
    pub count: usize,
    /// Payload bytes per frame.
    #[arg(long, default_value_t = 64)]
    pub payload_size: usize,
    /// FMT buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_FMT_BUF_SIZE)]
    pub fmt_buf: u32,
    /// RAW buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_RAW_BUF_SIZE)]
    pub raw_buf: u32,
}

#[derive(Args, Debug)]
pub struct FeedArgs {
    /// Channel to send on.
    #[arg(long, short = 'c', value_enum, default_value = "fmt")]
    pub channel: ChannelArg,
    /// FMT buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_FMT_BUF_SIZE)]
    pub fmt_buf: u32,
    /// RAW buffer size per direction, in bytes.
    #[arg(long, default_value_t = DEFAULT_RAW_BUF_SIZE)]
    pub raw_buf: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
