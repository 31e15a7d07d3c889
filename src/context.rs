//! Per-run installation context.

use crate::state::StateStore;
use crate::tag::InstallationTag;

/// Tag key marking every resource with its owning installation.
pub const INSTALLATION_TAG_KEY: &str = "jumpbox:installation";

/// Everything a provisioning step needs to know about the installation it
/// works on. Built once per run and passed explicitly.
#[derive(Debug)]
pub struct InstallationContext {
    region: String,
    store: StateStore,
}

impl InstallationContext {
    /// Wraps an opened store and the region it provisions into.
    #[must_use]
    pub fn new(region: impl Into<String>, store: StateStore) -> Self {
        Self {
            region: region.into(),
            store,
        }
    }

    /// Installation tag.
    #[must_use]
    pub const fn tag(&self) -> &InstallationTag {
        self.store.tag()
    }

    /// AWS region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// State store for the installation.
    #[must_use]
    pub const fn store(&self) -> &StateStore {
        &self.store
    }

    /// AWS `Name` for a resource: `<tag>-<suffix>`.
    #[must_use]
    pub fn name(&self, suffix: &str) -> String {
        format!("{}-{suffix}", self.tag())
    }

    /// Value for `--tag-specifications` naming the resource and marking it
    /// with the installation tag.
    #[must_use]
    pub fn tag_specification(&self, resource_type: &str, suffix: &str) -> String {
        format!(
            "ResourceType={resource_type},Tags=[{{Key=Name,Value={}}},{{Key={INSTALLATION_TAG_KEY},Value={}}}]",
            self.name(suffix),
            self.tag(),
        )
    }

    /// File name of the jumpbox private key inside the state directory.
    #[must_use]
    pub fn key_file_name(&self) -> String {
        format!("{}.pem", self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn naming_helpers_prefix_the_tag() {
        let tmp = TempDir::new().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(tmp.path().join("state"))
            .expect("utf8 temp path");
        let tag = InstallationTag::new("demo").expect("tag");
        let store = StateStore::open(&path, &tag).expect("store");
        let context = InstallationContext::new("eu-west-1", store);

        assert_eq!(context.name("vpc"), "demo-vpc");
        assert_eq!(context.key_file_name(), "demo.pem");
        assert_eq!(
            context.tag_specification("vpc", "vpc"),
            "ResourceType=vpc,Tags=[{Key=Name,Value=demo-vpc},{Key=jumpbox:installation,Value=demo}]"
        );
    }
}
