use std::sync::Arc;
use std::time::{Duration, Instant};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use crate::cmd::{harness, LoopbackArgs};
use crate::exit::{link_error, CliError, CliResult, DATA_INVALID, SUCCESS, TIMEOUT};
use crate::output::OutputFormat;

const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct LoopbackOutput {
    schema_id: &'static str,
    channel: &'static str,
    frames: usize,
    payload_size: usize,
    bytes: u64,
    elapsed_ms: f64,
    frames_per_sec: f64,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let pair = harness::bring_up(args.fmt_buf, args.raw_buf)?;
    let kind = args.channel.kind();
    let mut echo = harness::spawn_echo(Arc::clone(&pair.cp), kind);

    let payload: Vec<u8> = (0..args.payload_size).map(|i| (i % 251) as u8).collect();
    let started = Instant::now();
    let mut bytes = 0u64;

    for i in 0..args.count {
        pair.ap
            .link
            .send(kind, &payload)
            .map_err(|err| link_error("send failed", err))?;

        let frame = pair
            .ap
            .sink(kind)
            .pop_timeout(ECHO_TIMEOUT)
            .ok_or_else(|| CliError::new(TIMEOUT, format!("no echo for frame {i}")))?;

        if frame.payload.as_ref() != payload.as_slice() {
            return Err(CliError::new(
                DATA_INVALID,
                format!("echo mismatch on frame {i}"),
            ));
        }
        bytes += frame.payload.len() as u64;
    }

    let elapsed = started.elapsed();
    echo.stop();

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let out = LoopbackOutput {
        schema_id: "https://schemas.shmlink.dev/cli/v1/loopback-stats.schema.json",
        channel: kind.name(),
        frames: args.count,
        payload_size: args.payload_size,
        bytes,
        elapsed_ms: (elapsed_ms * 100.0).round() / 100.0,
        frames_per_sec: if elapsed.as_secs_f64() > 0.0 {
            (args.count as f64 / elapsed.as_secs_f64()).round()
        } else {
            0.0
        },
    };

    print_stats(&out, format);
    Ok(SUCCESS)
}

fn print_stats(out: &LoopbackOutput, format: OutputFormat) {
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
                .set_header(vec!["CHANNEL", "FRAMES", "BYTES", "ELAPSED", "RATE"])
                .add_row(vec![
                    out.channel.to_string(),
                    out.frames.to_string(),
                    out.bytes.to_string(),
                    format!("{:.2}ms", out.elapsed_ms),
                    format!("{}/s", out.frames_per_sec),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "loopback: {} frames of {} bytes on {} in {:.2}ms ({}/s)",
                out.frames, out.payload_size, out.channel, out.elapsed_ms, out.frames_per_sec
            );
        }
        OutputFormat::Raw => {
            println!("{}", out.frames);
        }
    }
}
