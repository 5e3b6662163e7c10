use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::digest::Digests;

/// Produces the token that authenticates finalize fields to the service
/// consuming them. Keys stay with the caller.
pub trait UploadTokenSigner: Send + Sync {
    fn sign(&self, fields: &BTreeMap<String, String>) -> anyhow::Result<String>;
}

#[derive(Clone, Debug, Serialize)]
pub struct FileHandler {
    name: String,
    local_path: Option<PathBuf>,
    remote_id: String,
    remote_url: String,
    size: i64,
    #[serde(flatten)]
    digests: Digests,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_etag: Option<String>,
}

impl FileHandler {
    pub(crate) fn new(
        name: String,
        local_path: Option<PathBuf>,
        remote_id: String,
        remote_url: String,
        size: i64,
        digests: Digests,
        remote_etag: Option<String>,
    ) -> Self {
        Self {
            name,
            local_path,
            remote_id,
            remote_url,
            size,
            digests,
            remote_etag,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn remote_url(&self) -> &str {
        &self.remote_url
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn digests(&self) -> &Digests {
        &self.digests
    }

    pub fn md5(&self) -> &str {
        &self.digests.md5
    }

    pub fn sha1(&self) -> &str {
        &self.digests.sha1
    }

    pub fn sha256(&self) -> &str {
        &self.digests.sha256
    }

    pub fn sha512(&self) -> &str {
        &self.digests.sha512
    }

    pub fn remote_etag(&self) -> Option<&str> {
        self.remote_etag.as_deref()
    }

    pub fn finalize_fields(&self, prefix: &str) -> BTreeMap<String, String> {
        let path = self
            .local_path
            .as_deref()
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut fields = BTreeMap::new();
        let mut insert = |key: &str, value: String| {
            fields.insert(field_key(prefix, key), value);
        };
        insert("name", self.name.clone());
        insert("path", path);
        insert("remote_url", self.remote_url.clone());
        insert("remote_id", self.remote_id.clone());
        insert("size", self.size.to_string());
        for (key, value) in self.digests.entries() {
            insert(key, value.to_string());
        }
        if self.remote_etag.is_none() {
            insert("etag", self.digests.md5.clone());
        }
        fields
    }

    pub fn finalize_fields_signed(
        &self,
        prefix: &str,
        signer: &dyn UploadTokenSigner,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let token = signer.sign(&self.finalize_fields(""))?;
        let mut fields = self.finalize_fields(prefix);
        fields.insert(field_key(prefix, "upload"), token);
        Ok(fields)
    }
}

fn field_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}
