use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use utils::serde::yaml_file::{read_yaml_file, YamlFileError};

pub const DEFAULT_APP_NAME: &str = "app-sample";
pub const DEFAULT_APP_IMAGE: &str = "k4edev/app-sample:latest";
pub const DEFAULT_APP_INTERNAL_PORT: u16 = 8888;
pub const DEFAULT_APP_EXTERNAL_PORT: u16 = 30088;

/// The application deployed on the cloudlet. Missing keys in a profile file
/// keep the sample echo application's values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppProfile {
    pub name: String,
    pub image: String,
    pub internal_port: u16,
    pub external_port: u16,
    pub env: BTreeMap<String, String>,
}

impl Default for AppProfile {
    fn default() -> Self {
        Self {
            name: String::from(DEFAULT_APP_NAME),
            image: String::from(DEFAULT_APP_IMAGE),
            internal_port: DEFAULT_APP_INTERNAL_PORT,
            external_port: DEFAULT_APP_EXTERNAL_PORT,
            env: BTreeMap::from([(String::from("SLEEP_MS"), String::from("0"))]),
        }
    }
}

impl AppProfile {
    pub async fn load(path: Option<&Path>) -> Result<Self, YamlFileError> {
        match path {
            Some(path) => read_yaml_file(path).await,
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::AppProfile;

    #[tokio::test]
    async fn builtin_profile() {
        let profile = AppProfile::load(None).await.unwrap();
        assert_eq!(profile.name, "app-sample");
        assert_eq!(profile.image, "k4edev/app-sample:latest");
        assert_eq!(profile.internal_port, 8888);
        assert_eq!(profile.external_port, 30088);
        assert_eq!(profile.env.get("SLEEP_MS").map(String::as_str), Some("0"));
    }

    #[tokio::test]
    async fn partial_profile_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "name: counter\nexternal_port: 30100\nenv:\n  STEP: \"2\"").unwrap();

        let profile = AppProfile::load(Some(file.path())).await.unwrap();

        assert_eq!(profile.name, "counter");
        assert_eq!(profile.external_port, 30100);
        assert_eq!(profile.internal_port, 8888);
        assert_eq!(profile.image, "k4edev/app-sample:latest");
        assert_eq!(profile.env.len(), 1);
        assert_eq!(profile.env["STEP"], "2");
    }

    #[tokio::test]
    async fn invalid_profile_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "internal_port: not-a-port").unwrap();
        assert!(AppProfile::load(Some(file.path())).await.is_err());
    }
}
