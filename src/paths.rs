//! Centralized application directory paths.
//!
//! Single source of truth for filesystem paths used across the assistant:
//! the TTS phrase cache, bundled sound assets, wake word reference
//! recordings, and the config/log locations. Uses the [`dirs`] crate for
//! platform-appropriate resolution.
//!
//! # Environment Overrides
//!
//! - `VOCALMATE_DATA_DIR` — overrides [`data_dir`]
//! - `VOCALMATE_CONFIG_DIR` — overrides [`config_dir`]
//! - `VOCALMATE_CACHE_DIR` — overrides [`cache_dir`]

use std::path::PathBuf;

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/vocalmate/` by default. Override with
/// `VOCALMATE_DATA_DIR`.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VOCALMATE_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("vocalmate"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vocalmate-data"))
}

/// Application config directory.
///
/// Resolves to `dirs::config_dir()/vocalmate/` by default. Override with
/// `VOCALMATE_CONFIG_DIR`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VOCALMATE_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("vocalmate"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vocalmate-config"))
}

/// Application cache directory.
///
/// Resolves to `dirs::cache_dir()/vocalmate/` by default. Override with
/// `VOCALMATE_CACHE_DIR`.
#[must_use]
pub fn cache_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("VOCALMATE_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::cache_dir()
        .map(|d| d.join("vocalmate"))
        .unwrap_or_else(|| PathBuf::from("/tmp/vocalmate-cache"))
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Service manifest file path (`config_dir()/services.yaml`).
#[must_use]
pub fn manifest_file() -> PathBuf {
    config_dir().join("services.yaml")
}

/// TTS phrase cache directory (`cache_dir()/tts_cache/`).
///
/// Rendered phrases are named `md5(sentence)[:8] + ".mp3"` inside this
/// directory so repeated phrases are synthesized only once.
#[must_use]
pub fn tts_cache_dir() -> PathBuf {
    cache_dir().join("tts_cache")
}

/// Bundled sound asset directory (`data_dir()/sounds/`).
///
/// Holds the beep/chime/earcon files the speech agent enqueues directly
/// without going through the TTS cache.
#[must_use]
pub fn sounds_dir() -> PathBuf {
    data_dir().join("sounds")
}

/// Wake word reference recordings directory (`data_dir()/wakeword/`).
#[must_use]
pub fn wakeword_dir() -> PathBuf {
    data_dir().join("wakeword")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_dir_is_nonempty() {
        assert!(!data_dir().as_os_str().is_empty());
    }

    #[test]
    fn data_dir_contains_vocalmate() {
        let s = data_dir().to_string_lossy().into_owned();
        assert!(s.contains("vocalmate"), "data_dir should contain 'vocalmate': {s}");
    }

    #[test]
    fn config_file_ends_with_config_toml() {
        let s = config_file().to_string_lossy().into_owned();
        assert!(s.ends_with("config.toml"));
    }

    #[test]
    fn manifest_file_ends_with_services_yaml() {
        let s = manifest_file().to_string_lossy().into_owned();
        assert!(s.ends_with("services.yaml"));
    }

    #[test]
    fn tts_cache_dir_is_subpath_of_cache_dir() {
        let cache = cache_dir();
        let tts = tts_cache_dir();
        assert!(tts.starts_with(&cache));
    }

    #[test]
    fn sounds_dir_is_subpath_of_data_dir() {
        let data = data_dir();
        let sounds = sounds_dir();
        assert!(sounds.starts_with(&data));
    }

    #[test]
    fn wakeword_dir_is_subpath_of_data_dir() {
        let data = data_dir();
        let ww = wakeword_dir();
        assert!(ww.starts_with(&data));
    }

    #[test]
    fn data_dir_override_via_env() {
        let key = "VOCALMATE_DATA_DIR";
        let original = std::env::var_os(key);
        unsafe { std::env::set_var(key, "/custom/data") };
        assert_eq!(data_dir(), PathBuf::from("/custom/data"));
        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn config_dir_override_via_env() {
        let key = "VOCALMATE_CONFIG_DIR";
        let original = std::env::var_os(key);
        unsafe { std::env::set_var(key, "/custom/config") };
        assert_eq!(config_dir(), PathBuf::from("/custom/config"));
        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }

    #[test]
    fn cache_dir_override_via_env() {
        let key = "VOCALMATE_CACHE_DIR";
        let original = std::env::var_os(key);
        unsafe { std::env::set_var(key, "/custom/cache") };
        assert_eq!(cache_dir(), PathBuf::from("/custom/cache"));
        match original {
            Some(val) => unsafe { std::env::set_var(key, val) },
            None => unsafe { std::env::remove_var(key) },
        }
    }
}
