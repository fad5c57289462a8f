use crate::cmd::IdentityArgs;
use crate::exit::{ipcon_error, CliResult, SUCCESS};
use crate::output::{print_identity, OutputFormat};

pub fn run(args: IdentityArgs, format: OutputFormat) -> CliResult<i32> {
    let ipcon = args.connect.connect()?;
    let device = ipcon
        .register(&args.uid)
        .map_err(|err| ipcon_error("invalid uid", err))?;

    let identity = device
        .get_identity()
        .map_err(|err| ipcon_error("get identity failed", err))?;
    print_identity(&identity, format);

    ipcon.disconnect();
    Ok(SUCCESS)
}
