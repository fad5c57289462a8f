use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tfwire_ipcon::{ConnectionEvent, DisconnectReason};
use tracing::info;

use crate::cmd::ListenArgs;
use crate::exit::{ipcon_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_payload, OutputFormat, PayloadKind};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(Arc::clone(&running))?;

    let ipcon = args.connect.connect()?;
    let device = ipcon
        .register(&args.uid)
        .map_err(|err| ipcon_error("invalid uid", err))?;

    let (lost_tx, lost_rx) = mpsc::channel();
    let lost_tx = Mutex::new(lost_tx);
    ipcon.add_connection_listener(move |event| {
        if let ConnectionEvent::Disconnected(reason) = event {
            if let Ok(tx) = lost_tx.lock() {
                let _ = tx.send(reason.clone());
            }
        }
    });

    let printed = Arc::new(AtomicUsize::new(0));
    let uid_text = device.uid_text().to_string();
    let function_id = args.function;
    let limit = args.count;
    {
        let printed = Arc::clone(&printed);
        device.add_listener(function_id, move |payload| {
            if limit.is_some_and(|limit| printed.load(Ordering::SeqCst) >= limit) {
                return Ok(());
            }
            print_payload(PayloadKind::Callback, &uid_text, function_id, payload, format);
            printed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    if let Some(enable) = args.enable {
        device
            .enable_notification(enable)
            .map_err(|err| ipcon_error("enable failed", err))?;
    }
    info!(uid = %device.uid_text(), function_id, "listening");

    let code = loop {
        if !running.load(Ordering::SeqCst) {
            break SUCCESS;
        }
        if limit.is_some_and(|limit| printed.load(Ordering::SeqCst) >= limit) {
            break SUCCESS;
        }
        match lost_rx.recv_timeout(POLL_INTERVAL) {
            Ok(DisconnectReason::Requested) => break SUCCESS,
            Ok(reason) => {
                return Err(CliError::new(
                    FAILURE,
                    format!("connection lost: {reason}"),
                ))
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break SUCCESS,
        }
    };

    ipcon.disconnect();
    Ok(code)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
