//! Metadata validation: structural checks applied before an entry reaches
//! the codec.

use crate::error::ValidationError;
use crate::metadata::EntryMetadata;
use crate::types::EntryId;

/// Maximum entry name length in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Maximum number of replicated attributes per entry.
pub const MAX_ATTRIBUTES: usize = 64;

/// Maximum attribute value length in bytes.
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 4096;

/// Maximum entry id length in bytes.
pub const MAX_ENTRY_ID_LEN: usize = 1024;

/// Name reserved for the per-user root.
pub const ROOT_NAME: &str = "/";

/// Validate an entry identifier.
pub fn validate_entry_id(entry_id: &EntryId) -> Result<(), ValidationError> {
    if entry_id.is_empty() {
        return Err(ValidationError::EmptyEntryId);
    }
    if entry_id.len() > MAX_ENTRY_ID_LEN {
        return Err(ValidationError::EntryIdTooLong {
            len: entry_id.len(),
            max: MAX_ENTRY_ID_LEN,
        });
    }
    Ok(())
}

/// Validate entry metadata.
///
/// This performs:
/// - Name checks (non-empty, bounded, no separators or NUL)
/// - Attribute count and size limits
///
/// The root name `/` is accepted here; [`validate_new_entry`] restricts it to
/// parentless entries.
pub fn validate_metadata(metadata: &EntryMetadata) -> Result<(), ValidationError> {
    // 1. Name
    let name = &metadata.name;
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    if name != ROOT_NAME && (name.contains('/') || name.contains('\0')) {
        return Err(ValidationError::InvalidName(name.clone()));
    }

    // 2. Attribute count
    if metadata.attributes.len() > MAX_ATTRIBUTES {
        return Err(ValidationError::TooManyAttributes {
            count: metadata.attributes.len(),
            max: MAX_ATTRIBUTES,
        });
    }

    // 3. Attribute entries
    for (key, value) in &metadata.attributes {
        if key.is_empty() {
            return Err(ValidationError::EmptyAttributeKey);
        }
        if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(ValidationError::AttributeTooLong {
                key: key.clone(),
                len: value.len(),
                max: MAX_ATTRIBUTE_VALUE_LEN,
            });
        }
    }

    Ok(())
}

/// Validate an entry about to be attached under `parent_id`.
pub fn validate_new_entry(
    parent_id: Option<&EntryId>,
    entry_id: &EntryId,
    metadata: &EntryMetadata,
) -> Result<(), ValidationError> {
    validate_entry_id(entry_id)?;
    if let Some(parent_id) = parent_id {
        validate_entry_id(parent_id)?;
        if metadata.name == ROOT_NAME {
            return Err(ValidationError::InvalidName(metadata.name.clone()));
        }
    }
    validate_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_metadata() {
        let m = EntryMetadata::file("notes.txt", 12, 0).with_attribute("path", "/a/notes.txt");
        assert!(validate_metadata(&m).is_ok());
        assert!(validate_metadata(&EntryMetadata::directory("/", 0)).is_ok());
    }

    #[test]
    fn test_rejects_bad_names() {
        assert_eq!(
            validate_metadata(&EntryMetadata::file("", 0, 0)),
            Err(ValidationError::EmptyName)
        );
        assert!(matches!(
            validate_metadata(&EntryMetadata::file("a/b", 0, 0)),
            Err(ValidationError::InvalidName(_))
        ));
        assert!(matches!(
            validate_metadata(&EntryMetadata::file("nul\0byte", 0, 0)),
            Err(ValidationError::InvalidName(_))
        ));
        let long = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            validate_metadata(&EntryMetadata::file(long, 0, 0)),
            Err(ValidationError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_attributes() {
        let empty_key = EntryMetadata::file("a", 0, 0).with_attribute("", "v");
        assert_eq!(
            validate_metadata(&empty_key),
            Err(ValidationError::EmptyAttributeKey)
        );

        let big = EntryMetadata::file("a", 0, 0)
            .with_attribute("target", "y".repeat(MAX_ATTRIBUTE_VALUE_LEN + 1));
        assert!(matches!(
            validate_metadata(&big),
            Err(ValidationError::AttributeTooLong { .. })
        ));

        let mut many = EntryMetadata::file("a", 0, 0);
        for i in 0..=MAX_ATTRIBUTES {
            many = many.with_attribute(format!("k{i}"), "v");
        }
        assert!(matches!(
            validate_metadata(&many),
            Err(ValidationError::TooManyAttributes { .. })
        ));
    }

    #[test]
    fn test_hints_are_not_limited() {
        let mut m = EntryMetadata::file("a", 0, 0);
        for i in 0..=MAX_ATTRIBUTES {
            m = m.with_hint(format!("h{i}"), "v");
        }
        assert!(validate_metadata(&m).is_ok());
    }

    #[test]
    fn test_root_name_only_for_root() {
        let root = EntryMetadata::directory("/", 0);
        assert!(validate_new_entry(None, &EntryId::from("root"), &root).is_ok());
        assert!(matches!(
            validate_new_entry(Some(&EntryId::from("root")), &EntryId::from("x"), &root),
            Err(ValidationError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_empty_ids() {
        let m = EntryMetadata::file("a", 0, 0);
        assert_eq!(
            validate_new_entry(None, &EntryId::from(""), &m),
            Err(ValidationError::EmptyEntryId)
        );
        assert_eq!(
            validate_new_entry(Some(&EntryId::from("")), &EntryId::from("a"), &m),
            Err(ValidationError::EmptyEntryId)
        );
    }
}
