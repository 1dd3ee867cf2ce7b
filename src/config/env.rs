//! `SYNAPSE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use super::Config;
use crate::error::SynapseError;

pub(super) fn from_lookup<F>(lookup: F) -> Result<Config, SynapseError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::default();

    if let Some(v) = lookup("SYNAPSE_SYS_NAME") {
        config.sys_name = v;
    }
    if let Some(v) = lookup("SYNAPSE_APP_NAME") {
        config.app_name = v;
    }
    if let Some(v) = lookup("SYNAPSE_APP_ID") {
        config.app_id = v;
    }
    if let Some(v) = lookup("SYNAPSE_MQ_HOST") {
        config.credentials.host = v;
    }
    if let Some(v) = lookup("SYNAPSE_MQ_USER") {
        config.credentials.user = v;
    }
    if let Some(v) = lookup("SYNAPSE_MQ_PASS") {
        config.credentials.pass = v;
    }
    if let Some(v) = lookup("SYNAPSE_MQ_VHOST") {
        config.credentials.vhost = v;
    }
    if let Some(port) = parse(&lookup, "SYNAPSE_MQ_PORT")? {
        config.credentials.port = port;
    }
    if let Some(flag) = lookup("SYNAPSE_DEBUG") {
        config.debug = parse_flag("SYNAPSE_DEBUG", &flag)?;
    }
    if let Some(flag) = lookup("SYNAPSE_DISABLE_EVENT_CLIENT") {
        config.disable_event_client = parse_flag("SYNAPSE_DISABLE_EVENT_CLIENT", &flag)?;
    }
    if let Some(flag) = lookup("SYNAPSE_DISABLE_RPC_CLIENT") {
        config.disable_rpc_client = parse_flag("SYNAPSE_DISABLE_RPC_CLIENT", &flag)?;
    }
    if let Some(num) = parse(&lookup, "SYNAPSE_EVENT_PROCESS_NUM")? {
        config.event_process_num = num;
    }
    if let Some(num) = parse(&lookup, "SYNAPSE_RPC_PROCESS_NUM")? {
        config.rpc_process_num = num;
    }
    if let Some(ms) = parse::<u64, _>(&lookup, "SYNAPSE_RPC_TIMEOUT_MS")? {
        config.rpc_timeout = Duration::from_millis(ms);
    }

    Ok(config)
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, SynapseError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| SynapseError::Config(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, SynapseError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SynapseError::Config(format!(
            "{}={:?}: expected a boolean",
            key, raw
        ))),
    }
}
