//! Destination profile compatibility.

use crate::copy::{CopyError, Result};
use std::collections::BTreeSet;

/// Succeed only if every required profile exists in the destination catalog.
///
/// Order and duplicates are irrelevant. The error lists each missing profile
/// once, in the order it was first required.
pub fn check_profiles(required: &[String], catalog: &[String]) -> Result<()> {
    let available: BTreeSet<&str> = catalog.iter().map(String::as_str).collect();
    let mut seen = BTreeSet::new();

    let missing: Vec<String> = required
        .iter()
        .filter(|profile| !available.contains(profile.as_str()))
        .filter(|profile| seen.insert(profile.as_str()))
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CopyError::ProfileMismatch { missing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_subset_passes() {
        assert!(check_profiles(&names(&["default"]), &names(&["web", "default"])).is_ok());
        assert!(check_profiles(&names(&[]), &names(&[])).is_ok());
        assert!(
            check_profiles(
                &names(&["web", "default", "web"]),
                &names(&["default", "web"])
            )
            .is_ok()
        );
    }

    #[test]
    fn test_missing_profiles_reported() {
        let result = check_profiles(
            &names(&["default", "gpu", "net", "gpu"]),
            &names(&["default"]),
        );

        match result {
            Err(CopyError::ProfileMismatch { missing }) => assert_eq!(missing, ["gpu", "net"]),
            other => panic!("Expected ProfileMismatch, got {:?}", other),
        }
    }
}
