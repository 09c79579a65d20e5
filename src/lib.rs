pub mod conduit;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod platform;
pub mod retry;
pub mod service;
pub mod settings;
pub mod signals;
pub mod tunnel;

pub use conduit::ConduitApp;
pub use credentials::{CredentialValue, Credentials};
pub use error::{exit_code, ProgramExit, TeardownErrors};
pub use platform::PlatformClient;
pub use settings::ConduitSettings;

use log::error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one conduit session and returns the process exit status.
///
/// `service_names` are the service instances to tunnel to. `run_args`, when not
/// empty, is the program to launch against them followed by its arguments.
pub async fn run(
    client: Arc<dyn PlatformClient>,
    mut settings: ConduitSettings,
    service_names: Vec<String>,
    run_args: Vec<String>,
    shutdown: CancellationToken,
) -> i32 {
    settings.apply_env_overrides();

    let result = match settings.tls.build_client_config() {
        Ok(_) => ConduitApp::new(client, settings, service_names, run_args, shutdown)
            .run()
            .await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        // the child already reported its own failure
        let only_child_exit =
            e.downcast_ref::<ProgramExit>().is_some() && e.downcast_ref::<TeardownErrors>().is_none();
        if !only_child_exit {
            error!("{e:#}");
        }
    }
    exit_code(&result)
}
