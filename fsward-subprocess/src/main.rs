use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fsward_core::{SettingsManager, Toolbox};
use fsward_subprocess::{logging, run_subprocess};
use tokio::io::{self, BufReader};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let mut workspace_dir: Option<String> = None;
    let mut settings_path: Option<String> = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--workspace-dir" => {
                i += 1;
                if i < args.len() {
                    workspace_dir = Some(args[i].clone());
                }
            }
            "--settings-path" => {
                i += 1;
                if i < args.len() {
                    settings_path = Some(args[i].clone());
                }
            }
            _ => {}
        }
        i += 1;
    }

    let manager = match settings_path {
        Some(path) => SettingsManager::from_path(PathBuf::from(path))?,
        None => SettingsManager::new()?,
    };
    // --workspace-dir takes precedence over the WORKSPACE_DIR variable.
    let settings = manager.resolve_with(|key| match (key, &workspace_dir) {
        ("WORKSPACE_DIR", Some(dir)) => Some(dir.clone()),
        _ => env::var(key).ok(),
    })?;

    let _guard = logging::init_logging(&settings.logging)?;
    let toolbox = Arc::new(Toolbox::new(&settings)?);

    run_subprocess(
        toolbox,
        BufReader::new(io::stdin()),
        io::stdout(),
        MAINTENANCE_INTERVAL,
    )
    .await
}
