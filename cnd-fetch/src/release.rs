use crate::error::FetchError;
use anyhow::Result;
use log::debug;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct Release {
    #[serde(default)]
    pub(crate) tag_name: Option<String>,
    pub(crate) assets: Vec<Asset>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub(crate) struct Asset {
    pub(crate) name: String,
    #[serde(rename = "browser_download_url")]
    pub(crate) url: Url,
}

impl Release {
    /// Returns the first asset whose name is exactly `name`, in the order the API returned them.
    pub(crate) fn find_asset(&self, name: &str) -> Result<&Asset> {
        debug!(
            "looking for an asset named {name} among {} assets",
            self.assets.len()
        );
        self.assets
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| {
                FetchError::AssetNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub(crate) fn tag(&self) -> &str {
        self.tag_name.as_deref().unwrap_or("(untagged)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn asset(name: &str, n: u32) -> Result<Asset> {
        Ok(Asset {
            name: name.to_string(),
            url: Url::parse(&format!(
                "https://github.com/sidprasad/copeanddrag/releases/download/v1.0.0/{n}/{name}"
            ))?,
        })
    }

    #[rstest]
    #[case::only_asset(&["cnd.zip"], Some(0))]
    #[case::first_of_several(&["cnd.zip", "cnd.tar.gz", "notes.txt"], Some(0))]
    #[case::last_of_several(&["cnd.tar.gz", "notes.txt", "cnd.zip"], Some(2))]
    #[case::duplicates_pick_first(&["other.zip", "cnd.zip", "cnd.zip"], Some(1))]
    #[case::prefix_is_not_a_match(&["cnd.zip.sha256", "xcnd.zip", "CND.ZIP"], None)]
    #[case::no_assets(&[], None)]
    fn find_asset(#[case] names: &[&str], #[case] expect_index: Option<u32>) -> Result<()> {
        let release = Release {
            tag_name: Some("v1.0.0".to_string()),
            assets: names
                .iter()
                .zip(0..)
                .map(|(name, n)| asset(name, n))
                .collect::<Result<Vec<_>>>()?,
        };

        match expect_index {
            Some(i) => {
                let found = release.find_asset("cnd.zip")?;
                assert_eq!(found, &asset("cnd.zip", i)?);
            }
            None => {
                let err = release.find_asset("cnd.zip").unwrap_err();
                assert!(
                    matches!(
                        err.downcast_ref::<FetchError>(),
                        Some(FetchError::AssetNotFound { name }) if name == "cnd.zip"
                    ),
                    "got asset not found error: {err}",
                );
            }
        }

        Ok(())
    }

    #[test]
    fn deserialize_ignores_unknown_fields() -> Result<()> {
        let body = r#"{
            "url": "https://api.github.com/repos/sidprasad/copeanddrag/releases/1",
            "tag_name": "v2.3.1",
            "name": "Release 2.3.1",
            "assets": [
                {
                    "id": 1,
                    "name": "cnd.zip",
                    "size": 1024,
                    "browser_download_url": "https://github.com/sidprasad/copeanddrag/releases/download/v2.3.1/cnd.zip"
                }
            ]
        }"#;
        let release: Release = serde_json::from_str(body)?;
        assert_eq!(release.tag(), "v2.3.1");
        assert_eq!(release.assets.len(), 1);
        assert_eq!(
            release.assets[0].url.as_str(),
            "https://github.com/sidprasad/copeanddrag/releases/download/v2.3.1/cnd.zip",
        );
        Ok(())
    }

    #[test]
    fn missing_tag_name_is_allowed() -> Result<()> {
        let release: Release = serde_json::from_str(r#"{"assets": []}"#)?;
        assert_eq!(release.tag(), "(untagged)");
        Ok(())
    }
}
