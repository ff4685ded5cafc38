use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How a restore treats a target file that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Replace the existing file with the checkpoint version.
    Overwrite,
    /// Leave the existing file alone and count it as skipped.
    Skip,
    /// Keep both: the checkpoint version is written beside the existing file
    /// under a suffixed name.
    Merge,
    /// Ask an injected [`ConflictPrompt`](crate::restore::ConflictPrompt).
    /// Without one, the conflict resolves as `Skip`.
    Prompt,
}

impl Default for ConflictResolution {
    fn default() -> Self {
        Self::Overwrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_conflict_resolution_parsing() {
        assert_eq!(ConflictResolution::from_str("skip").unwrap(), ConflictResolution::Skip);
        assert_eq!(ConflictResolution::from_str("MERGE").unwrap(), ConflictResolution::Merge);
        assert!(ConflictResolution::from_str("ask").is_err());
        assert_eq!(ConflictResolution::Prompt.to_string(), "prompt");
    }
}
