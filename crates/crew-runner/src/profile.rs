use crate::{Result, RunnerError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const PROFILES_FILE: &str = "profiles.yaml";
const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Filled from the map key on load.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

impl Profile {
    pub fn new(name: &str, repo: &str) -> Self {
        Self {
            name: name.to_string(),
            repo: repo.to_string(),
            branch: None,
            description: None,
            site_url: None,
        }
    }

    pub fn branch_or_default(&self) -> &str {
        self.branch
            .as_deref()
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl ProfileSet {
    pub fn path_in(config_dir: &Path) -> PathBuf {
        config_dir.join(PROFILES_FILE)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut set: ProfileSet = serde_yaml::from_str(text)?;
        for (name, profile) in set.profiles.iter_mut() {
            profile.name = name.clone();
        }
        Ok(set)
    }

    /// A missing file is an empty set.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_yaml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Profile> {
        self.profiles.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            RunnerError::Config(format!(
                "unknown profile '{}' (known: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_come_from_map_keys() {
        let set = ProfileSet::from_yaml_str(
            "profiles:\n  web:\n    repo: git@github.com:acme/web.git\n    branch: develop\n  api:\n    repo: /src/api\n",
        )
        .expect("parse");
        let web = set.get("web").expect("web");
        assert_eq!(web.name, "web");
        assert_eq!(web.branch_or_default(), "develop");
        assert_eq!(set.get("api").expect("api").branch_or_default(), "main");
    }

    #[test]
    fn unknown_profile_lists_known_ones() {
        let set = ProfileSet::from_yaml_str("profiles:\n  web:\n    repo: r\n").expect("parse");
        let err = set.get("mobile").expect_err("unknown");
        assert!(err.to_string().contains("known: web"), "{}", err);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = std::env::temp_dir().join(format!("crew_no_profiles_{}.yaml", std::process::id()));
        let set = ProfileSet::load(&path).expect("missing is empty");
        assert!(set.profiles.is_empty());
    }
}
