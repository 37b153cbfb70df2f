use crate::libs::config::{default_value, defaults, init_defaults, ConfigProvider, ConfigValue, JsonConfig};
use crate::libs::messages::Message;
use crate::libs::view::View;
use crate::{msg_bail_anyhow, msg_error_anyhow, msg_info, msg_print, msg_success};
use anyhow::Result;
use clap::{Args, Subcommand};
use std::collections::BTreeMap;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    #[command(about = "List every setting, stored or default")]
    Show,
    #[command(about = "Print one setting")]
    Get { key: String },
    #[command(about = "Change one setting")]
    Set { key: String, value: String },
    #[command(about = "Restore the default settings")]
    Reset,
    #[command(about = "Print the location of the settings file")]
    Path,
}

/// Converts command-line text into the type the setting `key` expects.
///
/// Integers are accepted for floating point settings, and anything is
/// accepted for string settings.
pub fn typed_value(key: &str, text: &str) -> Result<ConfigValue> {
    let Some(expected) = default_value(key) else {
        msg_bail_anyhow!(Message::ConfigUnknownKey(key.to_string()));
    };
    let value = ConfigValue::parse_loose(text);
    match (&expected, value) {
        (ConfigValue::String(_), _) => Ok(ConfigValue::String(text.to_string())),
        (ConfigValue::Double(_), ConfigValue::Int(int)) => Ok(ConfigValue::Double(int as f64)),
        (expected, value) if expected.type_name() == value.type_name() => Ok(value),
        (expected, value) => Err(msg_error_anyhow!(Message::ConfigTypeMismatch {
            key: key.to_string(),
            expected: expected.type_name().to_string(),
            found: value.to_string(),
        })),
    }
}

/// Stored settings over the defaults, sorted by key.
pub fn effective_settings(config: &dyn ConfigProvider) -> Vec<(String, ConfigValue)> {
    let mut settings: BTreeMap<String, ConfigValue> = defaults().into_iter().collect();
    for key in config.keys() {
        if let Some(value) = config.get(&key) {
            settings.insert(key, value);
        }
    }
    settings.into_iter().collect()
}

pub fn cmd(args: ConfigArgs) -> Result<()> {
    let config = JsonConfig::open_default().map_err(|e| msg_error_anyhow!(Message::ConfigLoadFailed(e.to_string())))?;

    match args.command {
        ConfigCommand::Show => {
            msg_print!(Message::ConfigLocation(config.path().display().to_string()));
            View::settings(&effective_settings(&config));
        }
        ConfigCommand::Get { key } => {
            let Some(value) = config.get(&key).or_else(|| default_value(&key)) else {
                msg_bail_anyhow!(Message::ConfigUnknownKey(key));
            };
            msg_print!(Message::ConfigValueSet {
                key,
                value: value.to_string()
            });
        }
        ConfigCommand::Set { key, value } => {
            let value = typed_value(&key, &value)?;
            if !config.set(&key, value.clone()) {
                msg_bail_anyhow!(Message::ConfigSaveError(key));
            }
            msg_success!(Message::ConfigValueSet {
                key,
                value: value.to_string()
            });
        }
        ConfigCommand::Reset => {
            config.clear()?;
            if !init_defaults(&config) {
                msg_bail_anyhow!(Message::ConfigSaveError(config.path().display().to_string()));
            }
            msg_success!(Message::ConfigDefaultsRestored);
        }
        ConfigCommand::Path => {
            msg_info!(Message::ConfigLocation(config.path().display().to_string()));
        }
    }
    Ok(())
}
