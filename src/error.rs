use thiserror::Error;

/// The user's program ran but exited unsuccessfully.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Exit with code {code}")]
pub struct ProgramExit {
    pub code: i32,
}

/// Everything that went wrong while cleaning up.
#[derive(Debug, Error)]
#[error("{} error(s) during teardown{}", .0.len(), bullet_list(.0))]
pub struct TeardownErrors(pub Vec<anyhow::Error>);

fn bullet_list(errors: &[anyhow::Error]) -> String {
    errors.iter().map(|e| format!("\n* {e:#}")).collect()
}

/// Process exit status for the outcome of a run.
pub fn exit_code(result: &anyhow::Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e
            .chain()
            .find_map(|cause| cause.downcast_ref::<ProgramExit>())
            .map_or(1, |exit| exit.code),
    }
}
