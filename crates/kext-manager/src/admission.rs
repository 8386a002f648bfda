use kext_types::Kext;

use crate::error::KextManagerError;

/// Why a kext was refused entry to the candidate index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenial {
    Invalid,
    LoadFailed,
    Disabled,
    NotSafeBootEligible,
}

impl AdmissionDenial {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "failed validation",
            Self::LoadFailed => "previously failed to load",
            Self::Disabled => "disabled",
            Self::NotSafeBootEligible => "not eligible for safe boot",
        }
    }

    /// The error kind reported when a caller asks for this kext anyway.
    pub fn into_error(self, kext: &Kext) -> KextManagerError {
        match self {
            Self::Invalid => KextManagerError::Validation(kext.identifier.clone()),
            Self::LoadFailed | Self::Disabled => {
                KextManagerError::Disabled(kext.identifier.clone())
            }
            Self::NotSafeBootEligible => KextManagerError::BootLevel(kext.identifier.clone()),
        }
    }
}

/// The admission predicate: valid, not quarantined, enabled, and under
/// safe boot also safe-boot eligible. Pure; the kext is not touched.
pub fn admission_check(kext: &Kext, safe_boot: bool) -> Result<(), AdmissionDenial> {
    if !kext.valid {
        return Err(AdmissionDenial::Invalid);
    }
    if kext.load_failed {
        return Err(AdmissionDenial::LoadFailed);
    }
    if !kext.enabled {
        return Err(AdmissionDenial::Disabled);
    }
    if safe_boot && !kext.safe_boot_eligible {
        return Err(AdmissionDenial::NotSafeBootEligible);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use url::Url;

    use kext_types::{BundleIdentifier, RepositoryId};
    use kext_version::Version;

    use super::*;

    fn kext() -> Kext {
        Kext::new(
            BundleIdentifier::from_str("com.example.a").unwrap(),
            Version::from_str("1.0").unwrap(),
            Url::parse("file:///tmp/repo/A.kext/").unwrap(),
            RepositoryId::new(0),
        )
    }

    #[test]
    fn default_kext_is_admissible() {
        assert_eq!(admission_check(&kext(), false), Ok(()));
    }

    #[test]
    fn each_gate_rejects() {
        let mut invalid = kext();
        invalid.valid = false;
        assert_eq!(
            admission_check(&invalid, false),
            Err(AdmissionDenial::Invalid)
        );

        let mut quarantined = kext();
        quarantined.load_failed = true;
        assert_eq!(
            admission_check(&quarantined, false),
            Err(AdmissionDenial::LoadFailed)
        );

        let mut disabled = kext();
        disabled.enabled = false;
        assert_eq!(
            admission_check(&disabled, false),
            Err(AdmissionDenial::Disabled)
        );

        // Safe boot only matters when the flag is set.
        let plain = kext();
        assert_eq!(admission_check(&plain, false), Ok(()));
        assert_eq!(
            admission_check(&plain, true),
            Err(AdmissionDenial::NotSafeBootEligible)
        );
        let mut eligible = kext();
        eligible.safe_boot_eligible = true;
        assert_eq!(admission_check(&eligible, true), Ok(()));
    }
}
