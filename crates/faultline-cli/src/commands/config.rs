use anyhow::Result;
use faultline_core::AppConfig;
use serde_json::json;
use std::path::Path;

use crate::ConfigCmd;
use crate::output::{print_json, redact_config_for_display};

pub(crate) fn run_config(workspace: &Path, cmd: ConfigCmd, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;

    match cmd {
        ConfigCmd::Show => {
            let display_cfg = redact_config_for_display(&cfg)?;
            if json_mode {
                print_json(&display_cfg)?;
            } else {
                println!("{}", serde_json::to_string_pretty(&display_cfg)?);
            }
        }
        ConfigCmd::Init => {
            let path = AppConfig::project_settings_path(workspace);
            let created = !path.exists();
            if created {
                cfg.save(workspace)?;
            }
            if json_mode {
                print_json(&json!({"path": path, "created": created}))?;
            } else if created {
                println!("wrote {}", path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
    }
    Ok(())
}
