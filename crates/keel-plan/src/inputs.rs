//! Plan inputs: layered collection and validation.
//!
//! Values arrive from `keel.toml`, then the environment and command line.
//! Each layer only fills in what it sets; `overlay` lets a later layer win.
//! Nothing is checked until `validate`, which reports the first missing or
//! malformed value by its setting name.

use std::path::PathBuf;

use serde::Serialize;

use keel_core::{
    DEFAULT_INTERVAL_SECS, DEFAULT_MAX_RETRIES, DEFAULT_RETAIN, DeploySection, MIN_RETAIN,
    ValidationError, Version,
};

/// Unvalidated inputs from one or more layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanInputs {
    pub version: Option<String>,
    pub files: Vec<PathBuf>,
    pub workdir: Option<PathBuf>,
    pub probe: Option<String>,
    pub max_retries: Option<u32>,
    pub interval_secs: Option<u64>,
    pub pin_digests: Option<bool>,
    pub retain: Option<usize>,
}

/// Inputs that passed validation, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidInputs {
    pub version: Version,
    pub files: Vec<PathBuf>,
    pub workdir: PathBuf,
    pub probe: String,
    pub max_retries: u32,
    pub interval_secs: u64,
    pub pin_digests: bool,
    pub retain: usize,
}

impl From<&DeploySection> for PlanInputs {
    fn from(section: &DeploySection) -> Self {
        Self {
            version: None,
            files: section.files.clone(),
            workdir: section.workdir.clone(),
            probe: section.probe.clone(),
            max_retries: section.max_retries,
            interval_secs: section.interval_secs,
            pin_digests: section.pin_digests,
            retain: section.retain,
        }
    }
}

impl PlanInputs {
    /// Layer `top` over `self`. A non-empty `files` list replaces the lower
    /// list entirely; fragments are never concatenated across layers.
    pub fn overlay(self, top: PlanInputs) -> PlanInputs {
        PlanInputs {
            version: top.version.or(self.version),
            files: if top.files.is_empty() { self.files } else { top.files },
            workdir: top.workdir.or(self.workdir),
            probe: top.probe.or(self.probe),
            max_retries: top.max_retries.or(self.max_retries),
            interval_secs: top.interval_secs.or(self.interval_secs),
            pin_digests: top.pin_digests.or(self.pin_digests),
            retain: top.retain.or(self.retain),
        }
    }

    pub fn validate(&self) -> Result<ValidInputs, ValidationError> {
        let version = match self.version.as_deref().map(str::trim) {
            None | Some("") => return Err(ValidationError::Missing("version")),
            Some(raw) => Version::parse(raw)?,
        };

        if self.files.is_empty() || self.files.iter().any(|f| f.as_os_str().is_empty()) {
            return Err(ValidationError::Missing("files"));
        }
        if let Some(missing) = self.files.iter().find(|f| !f.is_file()) {
            return Err(ValidationError::Invalid {
                key: "files",
                reason: format!("{} is not a readable file", missing.display()),
            });
        }

        let workdir = match &self.workdir {
            None => return Err(ValidationError::Missing("workdir")),
            Some(w) if w.as_os_str().is_empty() => return Err(ValidationError::Missing("workdir")),
            Some(w) if !w.is_absolute() => {
                return Err(ValidationError::Invalid {
                    key: "workdir",
                    reason: format!("{} must be an absolute path", w.display()),
                });
            }
            Some(w) => w.clone(),
        };

        let probe = match self.probe.as_deref().map(str::trim) {
            None | Some("") => return Err(ValidationError::Missing("probe")),
            Some(p) => p.to_string(),
        };

        let retain = self.retain.unwrap_or(DEFAULT_RETAIN);
        if retain < MIN_RETAIN {
            return Err(ValidationError::Invalid {
                key: "retain",
                reason: format!("must keep at least {MIN_RETAIN} releases, got {retain}"),
            });
        }

        Ok(ValidInputs {
            version,
            files: self.files.clone(),
            workdir,
            probe,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            interval_secs: self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
            pin_digests: self.pin_digests.unwrap_or(true),
            retain,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn complete(dir: &std::path::Path) -> PlanInputs {
        let file = dir.join("compose.yml");
        fs::write(&file, "services: {}\n").unwrap();
        PlanInputs {
            version: Some("v1".to_string()),
            files: vec![file],
            workdir: Some(PathBuf::from("/srv/shop")),
            probe: Some("web".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let valid = complete(dir.path()).validate().unwrap();
        assert_eq!(valid.max_retries, 30);
        assert_eq!(valid.interval_secs, 5);
        assert!(valid.pin_digests);
        assert_eq!(valid.retain, 3);
    }

    #[test]
    fn later_layer_wins() {
        let base = PlanInputs {
            probe: Some("web".to_string()),
            max_retries: Some(10),
            files: vec![PathBuf::from("a.yml"), PathBuf::from("b.yml")],
            ..Default::default()
        };
        let top = PlanInputs {
            probe: Some("api".to_string()),
            pin_digests: Some(false),
            ..Default::default()
        };
        let merged = base.overlay(top);
        assert_eq!(merged.probe.as_deref(), Some("api"));
        assert_eq!(merged.max_retries, Some(10));
        assert_eq!(merged.pin_digests, Some(false));
        assert_eq!(merged.files.len(), 2);
    }

    #[test]
    fn files_replace_not_append() {
        let base = PlanInputs {
            files: vec![PathBuf::from("a.yml")],
            ..Default::default()
        };
        let top = PlanInputs {
            files: vec![PathBuf::from("b.yml")],
            ..Default::default()
        };
        assert_eq!(base.overlay(top).files, vec![PathBuf::from("b.yml")]);
    }

    #[test]
    fn each_required_setting_is_named() {
        let dir = tempfile::tempdir().unwrap();
        let cases: [(&str, fn(&mut PlanInputs)); 4] = [
            ("version", |i| i.version = Some("  ".to_string())),
            ("files", |i| i.files.clear()),
            ("workdir", |i| i.workdir = None),
            ("probe", |i| i.probe = Some(String::new())),
        ];
        for (key, clear) in cases {
            let mut inputs = complete(dir.path());
            clear(&mut inputs);
            assert_eq!(inputs.validate(), Err(ValidationError::Missing(key)));
        }
    }

    #[test]
    fn bad_version_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = complete(dir.path());
        inputs.version = Some("../v1".to_string());
        assert!(matches!(
            inputs.validate(),
            Err(ValidationError::InvalidVersion(_))
        ));
    }

    #[test]
    fn relative_workdir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = complete(dir.path());
        inputs.workdir = Some(PathBuf::from("srv/shop"));
        assert!(matches!(
            inputs.validate(),
            Err(ValidationError::Invalid { key: "workdir", .. })
        ));
    }

    #[test]
    fn missing_fragment_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = complete(dir.path());
        inputs.files.push(dir.path().join("absent.yml"));
        assert!(matches!(
            inputs.validate(),
            Err(ValidationError::Invalid { key: "files", .. })
        ));
    }

    #[test]
    fn retain_below_two_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for retain in [0, 1] {
            let mut inputs = complete(dir.path());
            inputs.retain = Some(retain);
            assert!(matches!(
                inputs.validate(),
                Err(ValidationError::Invalid { key: "retain", .. })
            ));
        }
        let mut inputs = complete(dir.path());
        inputs.retain = Some(2);
        assert_eq!(inputs.validate().unwrap().retain, 2);
    }

    #[test]
    fn from_config_section() {
        let section = DeploySection {
            probe: Some("web".to_string()),
            retain: Some(5),
            ..Default::default()
        };
        let inputs = PlanInputs::from(&section);
        assert_eq!(inputs.version, None);
        assert_eq!(inputs.retain, Some(5));
    }
}
