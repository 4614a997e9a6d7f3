use std::env;
use std::path::PathBuf;

use dirs::{download_dir, home_dir};

use crate::cache::DEFAULT_CAPACITY;
use crate::error::{Result, SinanError};
use crate::toc::{MAX_LEVEL, MIN_LEVEL, TocOptions, parse_level};

pub const EXPORT_DIR_ENV: &str = "SINAN_EXPORT_DIR";
pub const TOC_MIN_LEVEL_ENV: &str = "SINAN_TOC_MIN_LEVEL";
pub const TOC_MAX_LEVEL_ENV: &str = "SINAN_TOC_MAX_LEVEL";
pub const TOC_CACHE_CAPACITY_ENV: &str = "SINAN_TOC_CACHE_CAPACITY";

/// Directory exports are written to when no explicit one is given.
pub fn export_dir_from_env() -> PathBuf {
    export_dir_from_lookup(|key| env::var(key).ok())
}

pub fn export_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    // Precedence:
    // 1) SINAN_EXPORT_DIR
    // 2) platform download dir
    // 3) ~/Downloads
    // 4) current directory
    non_blank(&lookup, EXPORT_DIR_ENV)
        .map(PathBuf::from)
        .or_else(download_dir)
        .or_else(|| home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Outline settings. Only the `toc` command resolves these, so a malformed
/// level variable never affects listing or export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocConfig {
    pub options: TocOptions,
    pub cache_capacity: usize,
}

impl Default for TocConfig {
    fn default() -> Self {
        Self {
            options: TocOptions::default(),
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl TocConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let min_level = non_blank(&lookup, TOC_MIN_LEVEL_ENV)
            .map(|value| level_setting(TOC_MIN_LEVEL_ENV, &value))
            .transpose()?
            .unwrap_or(MIN_LEVEL);
        let max_level = non_blank(&lookup, TOC_MAX_LEVEL_ENV)
            .map(|value| level_setting(TOC_MAX_LEVEL_ENV, &value))
            .transpose()?
            .unwrap_or(MAX_LEVEL);

        let cache_capacity = non_blank(&lookup, TOC_CACHE_CAPACITY_ENV)
            .map(|value| {
                value
                    .trim()
                    .parse::<usize>()
                    .ok()
                    .filter(|capacity| *capacity > 0)
                    .ok_or_else(|| invalid_config(TOC_CACHE_CAPACITY_ENV, &value))
            })
            .transpose()?
            .unwrap_or(DEFAULT_CAPACITY);

        Ok(Self {
            options: TocOptions::new(min_level, max_level),
            cache_capacity,
        })
    }
}

fn non_blank<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn level_setting(key: &str, value: &str) -> Result<u8> {
    parse_level(value).map_err(|_| invalid_config(key, value))
}

fn invalid_config(key: &str, value: &str) -> SinanError {
    SinanError::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use crate::config::{TocConfig, export_dir_from_lookup};
    use crate::error::SinanError;
    use crate::toc::TocOptions;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let toc = TocConfig::from_lookup(lookup_from(&[])).expect("config");
        assert_eq!(toc, TocConfig::default());
        assert_eq!(toc.options, TocOptions::default());
        assert_eq!(toc.cache_capacity, 64);
        assert!(!export_dir_from_lookup(lookup_from(&[])).as_os_str().is_empty());
    }

    #[test]
    fn env_overrides_take_precedence() {
        let lookup = lookup_from(&[
            ("SINAN_EXPORT_DIR", "/tmp/sinan-exports"),
            ("SINAN_TOC_MIN_LEVEL", "2"),
            ("SINAN_TOC_MAX_LEVEL", "9"),
            ("SINAN_TOC_CACHE_CAPACITY", "8"),
        ]);

        assert_eq!(
            export_dir_from_lookup(&lookup),
            PathBuf::from("/tmp/sinan-exports")
        );
        let toc = TocConfig::from_lookup(&lookup).expect("config");
        assert_eq!(toc.options.bounds(), (2, 6));
        assert_eq!(toc.cache_capacity, 8);
    }

    #[test]
    fn blank_values_are_ignored() {
        let lookup = lookup_from(&[("SINAN_EXPORT_DIR", "  "), ("SINAN_TOC_MIN_LEVEL", "")]);
        assert_ne!(export_dir_from_lookup(&lookup), PathBuf::from("  "));
        let toc = TocConfig::from_lookup(&lookup).expect("config");
        assert_eq!(toc.options.min_level, 1);
    }

    #[test]
    fn rejects_malformed_values() {
        let err = TocConfig::from_lookup(lookup_from(&[("SINAN_TOC_MAX_LEVEL", "deep")]))
            .expect_err("must fail");
        assert!(matches!(
            err,
            SinanError::InvalidConfig { ref key, .. } if key == "SINAN_TOC_MAX_LEVEL"
        ));

        assert!(TocConfig::from_lookup(lookup_from(&[("SINAN_TOC_CACHE_CAPACITY", "0")])).is_err());
    }

    #[test]
    fn export_dir_ignores_malformed_toc_settings() {
        let lookup = lookup_from(&[
            ("SINAN_EXPORT_DIR", "/tmp/out"),
            ("SINAN_TOC_MAX_LEVEL", "deep"),
        ]);
        assert_eq!(export_dir_from_lookup(&lookup), PathBuf::from("/tmp/out"));
    }
}
