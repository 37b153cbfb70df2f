#[cfg(test)]
mod tests {
    use respite::commands::config::{effective_settings, typed_value};
    use respite::libs::config::{
        default_value, init_defaults, ConfigFileError, ConfigProvider, ConfigValue, JsonConfig, MONITOR_BACKEND, MONITOR_IDLE,
        SETTINGS_FILE_NAME,
    };
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;
    use test_context::{test_context, TestContext};

    const LIMIT: &str = "timers/micro_pause/limit";

    /// Test context with a temporary directory acting as the user's
    /// home/appdata directory.
    struct ConfigTestContext {
        temp_dir: TempDir,
    }

    impl TestContext for ConfigTestContext {
        fn setup() -> Self {
            let temp_dir = tempfile::tempdir().unwrap();
            std::env::set_var("HOME", temp_dir.path());
            std::env::set_var("LOCALAPPDATA", temp_dir.path());
            ConfigTestContext { temp_dir }
        }
    }

    impl ConfigTestContext {
        fn settings_path(&self) -> PathBuf {
            self.temp_dir.path().join(SETTINGS_FILE_NAME)
        }
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_missing_file_means_no_settings(ctx: &mut ConfigTestContext) {
        let config = JsonConfig::open(ctx.settings_path()).unwrap();
        assert!(config.keys().is_empty());
        assert!(!ctx.settings_path().exists());
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_settings_survive_reopening(ctx: &mut ConfigTestContext) {
        let config = JsonConfig::open(ctx.settings_path()).unwrap();
        assert!(config.set(LIMIT, ConfigValue::Int(240)));
        assert!(config.set(MONITOR_BACKEND, ConfigValue::from("dbus")));
        assert!(config.set("timers/daily_limit/use_microbreak_activity", ConfigValue::Bool(true)));

        let reopened = JsonConfig::open(ctx.settings_path()).unwrap();
        assert_eq!(reopened.get_int(LIMIT), Some(240));
        assert_eq!(reopened.get_string(MONITOR_BACKEND).as_deref(), Some("dbus"));
        assert_eq!(reopened.get_bool("timers/daily_limit/use_microbreak_activity"), Some(true));

        let content = std::fs::read_to_string(ctx.settings_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json[LIMIT], 240);
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_invalid_json_is_reported(ctx: &mut ConfigTestContext) {
        std::fs::write(ctx.settings_path(), "{ not json").unwrap();
        match JsonConfig::open(ctx.settings_path()) {
            Err(ConfigFileError::Parse { path, .. }) => assert_eq!(path, ctx.settings_path()),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("invalid JSON was accepted"),
        }
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_failed_write_keeps_value_in_memory(ctx: &mut ConfigTestContext) {
        let blocker = ctx.temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let config = JsonConfig::open(blocker.join(SETTINGS_FILE_NAME)).unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        config.add_listener(
            "timers/",
            Arc::new(move |_key: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!config.set(LIMIT, ConfigValue::Int(90)));
        assert_eq!(config.get_int(LIMIT), Some(90));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_clear_removes_file_and_defaults_return(ctx: &mut ConfigTestContext) {
        let config = JsonConfig::open(ctx.settings_path()).unwrap();
        assert!(config.set(LIMIT, ConfigValue::Int(240)));
        config.clear().unwrap();
        assert!(config.keys().is_empty());
        assert!(!ctx.settings_path().exists());

        assert!(init_defaults(&config));
        assert_eq!(config.get_int(LIMIT), Some(180));
        assert!(ctx.settings_path().exists());
    }

    #[test_context(ConfigTestContext)]
    #[test]
    fn test_default_location_is_in_the_data_directory(_ctx: &mut ConfigTestContext) {
        let config = JsonConfig::open_default().unwrap();
        let path = config.path();
        assert!(path.ends_with(PathBuf::from("respite").join("respite").join(SETTINGS_FILE_NAME)));
    }

    #[test]
    fn test_typed_value_follows_the_default_type() {
        assert_eq!(typed_value(LIMIT, "300").unwrap(), ConfigValue::Int(300));
        assert_eq!(typed_value("breaks/rest_break/enabled", "false").unwrap(), ConfigValue::Bool(false));
        assert_eq!(
            typed_value("timers/daily_limit/reset_pred", "day/5:30").unwrap(),
            ConfigValue::from("day/5:30")
        );
        assert_eq!(typed_value(MONITOR_BACKEND, "").unwrap(), ConfigValue::from(""));

        assert!(typed_value(LIMIT, "soon").is_err());
        assert!(typed_value("breaks/rest_break/enabled", "1").is_err());
        assert!(typed_value("timers/nap/limit", "10").is_err());
    }

    #[test]
    fn test_effective_settings_overlay_defaults() {
        let config = respite::libs::config::MemoryConfig::new();
        config.set(MONITOR_IDLE, ConfigValue::Int(2000));
        config.set("custom/key", ConfigValue::from("kept"));

        let settings = effective_settings(&config);
        let lookup = |key: &str| settings.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        assert_eq!(lookup(MONITOR_IDLE), Some(ConfigValue::Int(2000)));
        assert_eq!(lookup(LIMIT), default_value(LIMIT));
        assert_eq!(lookup("custom/key"), Some(ConfigValue::from("kept")));

        let keys: Vec<_> = settings.iter().map(|(k, _)| k.clone()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
