use anyhow::Result;
use faultline_core::AppConfig;
use serde::Serialize;
use serde_json::json;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(endpoint) = value
        .get_mut("endpoint")
        .and_then(|entry| entry.as_object_mut())
        && endpoint
            .get("api_key")
            .is_some_and(|key| !key.is_null())
    {
        endpoint.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}
