use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use shmlink_frame::{FRAME_ALIGN, HEADER_SIZE};
use shmlink_shmem::layout::{ACCESS_OFFSET, MAGIC_OFFSET};
use shmlink_shmem::{ChannelSpec, RegionLayout};

use crate::cmd::LayoutArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct ChannelLayout {
    name: &'static str,
    tx_head: usize,
    tx_tail: usize,
    rx_head: usize,
    rx_tail: usize,
    tx_buf: usize,
    tx_len: u32,
    rx_buf: usize,
    rx_len: u32,
}

#[derive(Serialize)]
struct LayoutOutput {
    schema_id: &'static str,
    magic_offset: usize,
    access_offset: usize,
    header_size: usize,
    frame_align: usize,
    total_len: usize,
    channels: Vec<ChannelLayout>,
}

pub fn run(args: LayoutArgs, format: OutputFormat) -> CliResult<i32> {
    let layout = RegionLayout::new(&[
        ChannelSpec::symmetric(args.fmt_buf),
        ChannelSpec::symmetric(args.raw_buf),
    ]);

    let names = ["FMT", "RAW"];
    let channels = layout
        .channels()
        .iter()
        .zip(names)
        .map(|(span, name)| ChannelLayout {
            name,
            tx_head: span.tx_head,
            tx_tail: span.tx_tail,
            rx_head: span.rx_head,
            rx_tail: span.rx_tail,
            tx_buf: span.tx_buf,
            tx_len: span.tx_len,
            rx_buf: span.rx_buf,
            rx_len: span.rx_len,
        })
        .collect();

    let out = LayoutOutput {
        schema_id: "https://schemas.shmlink.dev/cli/v1/region-layout.schema.json",
        magic_offset: MAGIC_OFFSET,
        access_offset: ACCESS_OFFSET,
        header_size: HEADER_SIZE,
        frame_align: FRAME_ALIGN,
        total_len: layout.total_len(),
        channels,
    };

    print_layout(&out, format);
    Ok(SUCCESS)
}

fn print_layout(out: &LayoutOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "CHANNEL", "TX HEAD", "TX TAIL", "RX HEAD", "RX TAIL", "TX BUF", "TX LEN",
                    "RX BUF", "RX LEN",
                ]);
            for ch in &out.channels {
                table.add_row(vec![
                    ch.name.to_string(),
                    ch.tx_head.to_string(),
                    ch.tx_tail.to_string(),
                    ch.rx_head.to_string(),
                    ch.rx_tail.to_string(),
                    ch.tx_buf.to_string(),
                    ch.tx_len.to_string(),
                    ch.rx_buf.to_string(),
                    ch.rx_len.to_string(),
                ]);
            }
            println!("{table}");
            println!(
                "region: {} bytes (magic @ {}, access @ {}, header {}B, align {}B)",
                out.total_len, out.magic_offset, out.access_offset, out.header_size, out.frame_align
            );
        }
        OutputFormat::Pretty => {
            println!("Region layout ({} bytes):", out.total_len);
            println!("  magic @ {}, access @ {}", out.magic_offset, out.access_offset);
            println!(
                "  frame header {} bytes, {}-byte alignment",
                out.header_size, out.frame_align
            );
            for ch in &out.channels {
                println!(
                    "  {}: indices @ {}..{} | TX {} bytes @ {} | RX {} bytes @ {}",
                    ch.name,
                    ch.tx_head,
                    ch.rx_tail + 4,
                    ch.tx_len,
                    ch.tx_buf,
                    ch.rx_len,
                    ch.rx_buf
                );
            }
        }
        OutputFormat::Raw => {
            println!("{}", out.total_len);
        }
    }
}
