use fail::fail_point;

use crate::bail;
use crate::error::{CdcResult, ErrorKind};

pub const POSITION_FLUSH__BEFORE_STORE: &str = "position_flush.before_store";

pub const POSITION_FLUSH__BEFORE_HEARTBEAT: &str = "position_flush.before_heartbeat";

/// Returns an error when the named fail point is configured to `return`.
pub fn cdc_fail_point(name: &str) -> CdcResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        bail!(
            ErrorKind::InjectedFailure,
            "An error occurred in a fail point",
            detail
        );
    });

    Ok(())
}
