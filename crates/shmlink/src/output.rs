use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use shmlink_link::DecodedFrame;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    schema_id: &'a str,
    channel_id: u8,
    channel_name: &'a str,
    channel_seq: u8,
    payload_size: usize,
    payload: String,
}

pub fn print_frame(frame: &DecodedFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                schema_id: "https://schemas.shmlink.dev/cli/v1/frame-received.schema.json",
                channel_id: frame.channel_id,
                channel_name: channel_name(frame.channel_id),
                channel_seq: frame.channel_seq,
                payload_size: frame.payload.len(),
                payload: payload_preview(frame.payload.as_ref()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SEQ", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    channel_name(frame.channel_id).to_string(),
                    frame.channel_seq.to_string(),
                    frame.payload.len().to_string(),
                    payload_preview(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} ({}) seq={} size={} payload={}",
                frame.channel_id,
                channel_name(frame.channel_id),
                frame.channel_seq,
                frame.payload.len(),
                payload_preview(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.payload.as_ref());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

pub fn channel_name(channel_id: u8) -> &'static str {
    match channel_id {
        1 => "FMT",
        2 => "RAW",
        _ => "UNKNOWN",
    }
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}
