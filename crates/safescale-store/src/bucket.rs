//! Metadata bucket naming.
//!
//! The metadata bucket name is deterministic for a tenant: the tuple
//! `(driver, region, domain, project)` is lowercased, joined with `-`,
//! hashed with FNV-128a, and the hex digest is appended to the
//! `0.safescale-` prefix. An optional suffix from
//! `SAFESCALE_METADATA_SUFFIX` is appended after a `.`; the total length
//! is bounded by 63 characters. Drivers that forbid dots in bucket names
//! (GCP) get them rewritten to dashes.

use safescale_core::{Error, Result};

const MAX_BUCKET_NAME_LENGTH: usize = 63;
const BUCKET_NAME_PREFIX: &str = "0.safescale";

/// Environment variable appending a suffix to the metadata bucket name.
pub const METADATA_SUFFIX_ENV: &str = "SAFESCALE_METADATA_SUFFIX";

// FNV-128a, from the published offset basis and prime. The `fnv` crate only
// provides the 64-bit variant, and the bucket layout requires the 128-bit
// digest for compatibility with existing tenants.
const FNV128A_OFFSET_BASIS: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV128A_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

fn fnv128a(data: &[u8]) -> u128 {
    data.iter().fold(FNV128A_OFFSET_BASIS, |hash, byte| {
        (hash ^ u128::from(*byte)).wrapping_mul(FNV128A_PRIME)
    })
}

/// Build the name of the bucket storing a tenant's metadata.
///
/// # Errors
///
/// Returns `Overflow` when the configured suffix pushes the name past 63
/// characters.
pub fn build_metadata_bucket_name(
    driver: &str,
    region: &str,
    domain: &str,
    project: &str,
) -> Result<String> {
    let signature = format!("{driver}-{region}-{domain}-{project}").to_lowercase();
    let hashed = format!("{:032x}", fnv128a(signature.as_bytes()));
    let mut name = format!("{BUCKET_NAME_PREFIX}-{hashed}");

    if let Ok(suffix) = std::env::var(METADATA_SUFFIX_ENV) {
        let base_len = name.len();
        name.push('.');
        name.push_str(&suffix);
        if name.len() > MAX_BUCKET_NAME_LENGTH {
            return Err(Error::overflow(format!(
                "suffix is too long, max allowed: {} characters",
                MAX_BUCKET_NAME_LENGTH - base_len - 1
            )));
        }
    }

    if driver == "gcp" {
        name = name.replace('.', "-");
    }

    Ok(name.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_deterministic_and_bounded() {
        let name = build_metadata_bucket_name("openstack", "GRA5", "Default", "proj").unwrap();
        assert!(name.starts_with("0.safescale-"));
        assert!(name.len() <= MAX_BUCKET_NAME_LENGTH);
        assert_eq!(name, name.to_lowercase());

        let expected_hash = format!("{:032x}", fnv128a(b"openstack-gra5-default-proj"));
        assert!(name.contains(&expected_hash));

        // Same inputs, same name.
        let again = build_metadata_bucket_name("openstack", "GRA5", "Default", "proj").unwrap();
        assert_eq!(name, again);
    }

    #[test]
    fn case_of_inputs_does_not_matter() {
        let a = build_metadata_bucket_name("OpenStack", "gra5", "DEFAULT", "Proj").unwrap();
        let b = build_metadata_bucket_name("openstack", "GRA5", "default", "proj").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn gcp_names_carry_no_dot() {
        let name = build_metadata_bucket_name("gcp", "europe-west1", "dom", "proj").unwrap();
        assert!(!name.contains('.'));
        assert!(name.starts_with("0-safescale-"));
    }

    #[test]
    fn fnv128a_matches_known_vectors() {
        // Published FNV-128a test vectors.
        assert_eq!(fnv128a(b""), FNV128A_OFFSET_BASIS);
        assert_eq!(fnv128a(b"a"), 0xd228_cb69_6f1a_8caf_78912b704e4a_8964_u128);
    }
}
