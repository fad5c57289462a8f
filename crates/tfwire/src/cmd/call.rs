use crate::cmd::CallArgs;
use crate::exit::{ipcon_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{parse_hex, print_payload, OutputFormat, PayloadKind};

pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    let payload =
        parse_hex(&args.data).map_err(|err| CliError::new(USAGE, format!("--data: {err}")))?;

    let ipcon = args.connect.connect()?;
    let device = ipcon
        .register(&args.uid)
        .map_err(|err| ipcon_error("invalid uid", err))?;

    let timeout = ipcon.config().response_timeout;
    let response = device
        .call_with(args.function, &payload, !args.no_response, timeout)
        .map_err(|err| ipcon_error("call failed", err))?;

    if !args.no_response {
        print_payload(
            PayloadKind::Response,
            device.uid_text(),
            args.function,
            &response,
            format,
        );
    }

    ipcon.disconnect();
    Ok(SUCCESS)
}
