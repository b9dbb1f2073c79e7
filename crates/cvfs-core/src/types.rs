use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a remote item (file or directory).
pub type ItemId = Uuid;

/// On-wire chunk format of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EncryptionVersion {
    /// Legacy AES-256-CBC formats. Decode only.
    V1,
    /// AES-256-GCM: `IV(12) ‖ ciphertext ‖ tag(16)`.
    V2,
}

impl EncryptionVersion {
    /// Version used for every new write.
    pub const CURRENT: EncryptionVersion = EncryptionVersion::V2;
}

impl From<EncryptionVersion> for u8 {
    fn from(v: EncryptionVersion) -> u8 {
        match v {
            EncryptionVersion::V1 => 1,
            EncryptionVersion::V2 => 2,
        }
    }
}

impl TryFrom<u8> for EncryptionVersion {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(EncryptionVersion::V1),
            2 => Ok(EncryptionVersion::V2),
            other => Err(format!("unknown encryption version {other}")),
        }
    }
}

/// Storage coordinates assigned by the store on the first chunk upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocator {
    pub bucket: String,
    pub region: String,
    pub file_id: ItemId,
}

/// Decrypted metadata of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// File key, base64.
    pub key: String,
    /// Unix milliseconds.
    pub last_modified: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<u64>,
    /// Hex SHA-512 of the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub id: ItemId,
    pub parent: ItemId,
    pub metadata: FileMetadata,
    pub chunk_count: u64,
    pub version: EncryptionVersion,
    pub locator: StorageLocator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: ItemId,
    pub parent: ItemId,
    pub metadata: DirectoryMetadata,
}

/// A file or directory in the virtual namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceItem {
    File(FileEntry),
    Directory(DirectoryEntry),
}

impl NamespaceItem {
    pub fn id(&self) -> ItemId {
        match self {
            NamespaceItem::File(f) => f.id,
            NamespaceItem::Directory(d) => d.id,
        }
    }

    pub fn parent(&self) -> ItemId {
        match self {
            NamespaceItem::File(f) => f.parent,
            NamespaceItem::Directory(d) => d.parent,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            NamespaceItem::File(f) => &f.metadata.name,
            NamespaceItem::Directory(d) => &d.metadata.name,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, NamespaceItem::Directory(_))
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            NamespaceItem::File(f) => Some(f),
            NamespaceItem::Directory(_) => None,
        }
    }

    /// Same item, reparented and renamed.
    pub fn relocated(&self, parent: ItemId, name: &str) -> NamespaceItem {
        match self {
            NamespaceItem::File(f) => {
                let mut f = f.clone();
                f.parent = parent;
                f.metadata.name = name.to_string();
                NamespaceItem::File(f)
            }
            NamespaceItem::Directory(d) => {
                let mut d = d.clone();
                d.parent = parent;
                d.metadata.name = name.to_string();
                NamespaceItem::Directory(d)
            }
        }
    }
}

/// Remote-visible shape of an item: storage facts in the clear, everything
/// else in a sealed metadata blob only the client can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedEntry {
    pub id: ItemId,
    pub parent: ItemId,
    pub kind: SealedKind,
    pub metadata: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SealedKind {
    File {
        chunk_count: u64,
        version: EncryptionVersion,
        locator: StorageLocator,
        size: u64,
    },
    Directory,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> NamespaceItem {
        let id = Uuid::new_v4();
        NamespaceItem::File(FileEntry {
            id,
            parent: Uuid::nil(),
            metadata: FileMetadata {
                name: "report.pdf".into(),
                size: 10,
                mime: "application/pdf".into(),
                key: "a2V5".into(),
                last_modified: 1,
                creation: None,
                hash: None,
            },
            chunk_count: 1,
            version: EncryptionVersion::V2,
            locator: StorageLocator {
                bucket: "b".into(),
                region: "r".into(),
                file_id: id,
            },
        })
    }

    #[test]
    fn version_serializes_as_number() {
        assert_eq!(serde_json::to_string(&EncryptionVersion::V2).unwrap(), "2");
        let v: EncryptionVersion = serde_json::from_str("1").unwrap();
        assert_eq!(v, EncryptionVersion::V1);
        assert!(serde_json::from_str::<EncryptionVersion>("3").is_err());
    }

    #[test]
    fn relocated_keeps_identity() {
        let item = sample_file();
        let parent = Uuid::new_v4();
        let moved = item.relocated(parent, "renamed.pdf");
        assert_eq!(moved.id(), item.id());
        assert_eq!(moved.parent(), parent);
        assert_eq!(moved.name(), "renamed.pdf");
        assert!(moved.as_file().is_some());
    }

    #[test]
    fn sealed_kind_is_tagged() {
        let json = serde_json::to_string(&SealedKind::Directory).unwrap();
        assert_eq!(json, r#"{"type":"directory"}"#);
    }
}
