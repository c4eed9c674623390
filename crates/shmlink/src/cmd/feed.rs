use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::{harness, FeedArgs};
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_frame, OutputFormat};

const ECHO_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(args: FeedArgs, format: OutputFormat) -> CliResult<i32> {
    let pair = harness::bring_up(args.fmt_buf, args.raw_buf)?;
    let kind = args.channel.kind();
    let mut echo = harness::spawn_echo(Arc::clone(&pair.cp), kind);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let line = line.map_err(|err| CliError::new(INTERNAL, format!("stdin read: {err}")))?;
        if line.is_empty() {
            continue;
        }

        pair.ap
            .link
            .send(kind, line.as_bytes())
            .map_err(|err| link_error("send failed", err))?;

        match pair.ap.sink(kind).pop_timeout(ECHO_TIMEOUT) {
            Some(frame) => print_frame(&frame, format),
            None => tracing::warn!("no echo within {ECHO_TIMEOUT:?}"),
        }
    }

    echo.stop();
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler: {err}")))
}
