use crate::{Error, Result};

pub const VALID_AWS_REGIONS: &[&'static str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "ca-west-1",
    "mx-central-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-south-1",
    "eu-south-2",
    "ap-south-1",
    "ap-south-2",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-southeast-5",
    "ap-southeast-7",
    "ap-east-1",
    "sa-east-1",
    "cn-north-1",
    "cn-northwest-1",
    "us-gov-east-1",
    "us-gov-west-1",
    "me-south-1",
    "me-central-1",
    "il-central-1",
    "af-south-1",
];

pub fn is_valid_region(r: &str) -> bool {
    VALID_AWS_REGIONS.contains(&r)
}

/// `<area>-<direction>-<n>`, with an optional `gov` partition: eg `us-gov-west-1`.
pub fn is_region_shaped(r: &str) -> bool {
    let parts: Vec<&str> = r.split('-').collect();
    let (area, rest) = match parts.as_slice() {
        [area, "gov", direction, n] => (*area, [*direction, *n]),
        [area, direction, n] => (*area, [*direction, *n]),
        _ => return false,
    };
    let [direction, n] = rest;
    area.len() == 2
        && area.chars().all(|c| c.is_ascii_lowercase())
        && !direction.is_empty()
        && direction.chars().all(|c| c.is_ascii_lowercase())
        && !n.is_empty()
        && n.chars().all(|c| c.is_ascii_digit())
}

/// Known regions pass. A well formed code that is not in the list is let
/// through with a warning, so new regions work before the list catches up.
pub fn verify_region(r: &str) -> Result<()> {
    if is_valid_region(r) {
        return Ok(());
    }
    if is_region_shaped(r) {
        tracing::warn!("Region {r} is not in the known region list, using it anyway");
        return Ok(());
    }
    Err(Error::InvalidRegion { region: r.to_string(), valid: VALID_AWS_REGIONS })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_region() {
        assert!(verify_region("us-east-1").is_ok());
        let err = verify_region("moon-base-1").unwrap_err();
        assert!(err.to_string().contains("Invalid region code \"moon-base-1\""));
    }

    #[test]
    fn accepts_new_regions() {
        for r in ["ca-west-1", "mx-central-1", "ap-southeast-5", "us-gov-east-1"] {
            assert!(is_valid_region(r), "{r}");
        }
        assert!(verify_region("xx-newplace-9").is_ok());
        assert!(verify_region("US-EAST-1").is_err());
        assert!(verify_region("us-east").is_err());
        assert!(verify_region("").is_err());
    }
}
