use std::{env::VarError, path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};

use crate::options::SaveOptions;
use crate::store::{DEFAULT_CLEANUP_TIMEOUT, DEFAULT_OBJECT_STORE_TIMEOUT};

const DEFAULT_TEMP_PREFIX: &str = "upload";

#[derive(Clone, Debug)]
pub struct Config {
    pub temp_path: PathBuf,
    pub temp_prefix: String,
    pub object_store_timeout: Duration,
    pub cleanup_timeout: Duration,
    pub max_size: Option<i64>,

    pub presigned_put: Option<String>,
    pub presigned_delete: Option<String>,
    pub remote_id: String,
    pub remote_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_path: std::env::temp_dir(),
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
            object_store_timeout: DEFAULT_OBJECT_STORE_TIMEOUT,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
            max_size: None,
            presigned_put: None,
            presigned_delete: None,
            remote_id: String::new(),
            remote_url: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_size = parse_optional_i64("FILESTORE_MAX_SIZE")?;
        if let Some(limit) = max_size
            && limit <= 0
        {
            bail!("FILESTORE_MAX_SIZE must be positive");
        }

        Ok(Self {
            temp_path: parse_optional_path("FILESTORE_TEMP_PATH")?.unwrap_or(defaults.temp_path),
            temp_prefix: parse_optional_string("FILESTORE_TEMP_PREFIX")?
                .unwrap_or(defaults.temp_prefix),
            object_store_timeout: parse_optional_secs("FILESTORE_OBJECT_STORE_TIMEOUT_SECS")?
                .unwrap_or(defaults.object_store_timeout),
            cleanup_timeout: parse_optional_secs("FILESTORE_CLEANUP_TIMEOUT_SECS")?
                .unwrap_or(defaults.cleanup_timeout),
            max_size,

            presigned_put: parse_optional_string("FILESTORE_PRESIGNED_PUT")?,
            presigned_delete: parse_optional_string("FILESTORE_PRESIGNED_DELETE")?,
            remote_id: parse_optional_string("FILESTORE_REMOTE_ID")?.unwrap_or_default(),
            remote_url: parse_optional_string("FILESTORE_REMOTE_URL")?.unwrap_or_default(),
        })
    }

    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            local_temp_path: Some(self.temp_path.clone()),
            temp_file_prefix: self.temp_prefix.clone(),
            remote_id: self.remote_id.clone(),
            remote_url: self.remote_url.clone(),
            presigned_put: self.presigned_put.clone(),
            presigned_delete: self.presigned_delete.clone(),
            maximum_size: self.max_size,
            ..SaveOptions::default()
        }
    }
}

fn parse_optional_string(name: &str) -> Result<Option<String>> {
    parse_optional_string_result(name, std::env::var(name))
}

fn parse_optional_string_result(
    name: &str,
    value: Result<String, VarError>,
) -> Result<Option<String>> {
    match value {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                bail!("{name} may not be empty");
            }
            Ok(Some(trimmed.to_string()))
        }
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => {
            bail!("{name} contains invalid unicode characters")
        }
    }
}

fn parse_optional_path(name: &str) -> Result<Option<PathBuf>> {
    Ok(parse_optional_string(name)?.map(PathBuf::from))
}

fn parse_optional_secs(name: &str) -> Result<Option<Duration>> {
    parse_optional_secs_result(name, std::env::var(name))
}

fn parse_optional_secs_result(
    name: &str,
    value: Result<String, VarError>,
) -> Result<Option<Duration>> {
    let Some(raw) = parse_optional_string_result(name, value)? else {
        return Ok(None);
    };
    let secs: u64 = raw
        .parse()
        .with_context(|| format!("{name} must be a whole number of seconds"))?;
    if secs == 0 {
        bail!("{name} must be at least one second");
    }
    Ok(Some(Duration::from_secs(secs)))
}

fn parse_optional_i64(name: &str) -> Result<Option<i64>> {
    parse_optional_string(name)?
        .map(|raw| {
            raw.parse::<i64>()
                .with_context(|| format!("{name} must be an integer"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_store_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.temp_prefix, "upload");
        assert_eq!(cfg.object_store_timeout, Duration::from_secs(4 * 60 * 60));
        assert_eq!(cfg.cleanup_timeout, Duration::from_secs(60));
        assert!(cfg.max_size.is_none());
    }

    #[test]
    fn parse_optional_string_trims_values() {
        assert_eq!(
            parse_optional_string_result("__TEST_STRING", Ok("  upload-  ".to_string())).unwrap(),
            Some("upload-".to_string())
        );
    }

    #[test]
    fn parse_optional_string_rejects_empty_values() {
        let err = parse_optional_string_result("__TEST_STRING_EMPTY", Ok("   ".to_string()))
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("__TEST_STRING_EMPTY may not be empty")
        );
    }

    #[test]
    fn parse_optional_string_returns_none_when_missing() {
        assert_eq!(
            parse_optional_string_result("__TEST_STRING_MISSING", Err(VarError::NotPresent))
                .unwrap(),
            None
        );
    }

    #[test]
    fn parse_optional_secs_accepts_whole_seconds() {
        assert_eq!(
            parse_optional_secs_result("__TEST_SECS", Ok("90".to_string())).unwrap(),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn parse_optional_secs_rejects_invalid_values() {
        let err = parse_optional_secs_result("__TEST_SECS_INVALID", Ok("soon".to_string()))
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("__TEST_SECS_INVALID must be a whole number of seconds")
        );

        let err =
            parse_optional_secs_result("__TEST_SECS_ZERO", Ok("0".to_string())).unwrap_err();
        assert!(err.to_string().contains("at least one second"));
    }

    #[test]
    fn save_options_carry_process_settings() {
        let cfg = Config {
            temp_path: PathBuf::from("/var/tmp/uploads"),
            presigned_put: Some("https://store.example.com/b/k?sig=1".into()),
            max_size: Some(1024),
            ..Config::default()
        };
        let opts = cfg.save_options();
        assert_eq!(opts.local_dir(), Some(std::path::Path::new("/var/tmp/uploads")));
        assert_eq!(opts.temp_file_prefix, "upload");
        assert_eq!(opts.maximum_size, Some(1024));
        assert!(opts.is_remote());
        assert!(!opts.is_multipart());
    }
}
