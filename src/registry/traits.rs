use super::entry::RegistryEntry;
use super::errors::RegistryResult;
use super::objects::RegistryObject;
use std::fmt;

/// Unparsed content fetched from a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResource {
    pub key: String,
    pub content_type: String,
    pub body: String,
}

impl RawResource {
    pub fn new(
        key: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

/// Backend holding versioned resources
///
/// Calls block the calling mediation thread; implementations backed by remote
/// stores should apply their own I/O deadline.
pub trait Registry: Send + Sync + fmt::Debug {
    /// Metadata only: version, content type and lease hint
    fn lookup_entry(&self, key: &str) -> RegistryResult<RegistryEntry>;

    /// Full content for `key`
    fn lookup_content(&self, key: &str) -> RegistryResult<RawResource>;
}

/// Turns raw registry content into a typed object
pub trait ResourceMapper: Send + Sync + fmt::Debug {
    fn map(&self, raw: &RawResource) -> RegistryResult<RegistryObject>;
}
