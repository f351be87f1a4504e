// Runner name generation.
//
// Grounded on `original_source/helper/stringid/stringid.go`: 12 random bytes,
// hex-encoded, retried if the result happens to parse as a pure decimal
// integer (Firecracker's API rejects some purely-numeric identifiers).

use rand::RngCore;

const ID_BYTES: usize = 12;

fn random_hex_id() -> String {
    loop {
        let mut buf = [0u8; ID_BYTES];
        rand::rng().fill_bytes(&mut buf);
        let id = hex::encode(buf);
        if id.parse::<i64>().is_ok() {
            continue;
        }
        return id;
    }
}

/// Generates a runner name of the form `{name_prefix}-{12-byte random hex}`.
pub fn generate_runner_name(name_prefix: &str) -> String {
    format!("{}-{}", name_prefix, random_hex_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_name_has_prefix() {
        let name = generate_runner_name("p");
        assert!(name.starts_with("p-"));
    }

    #[test]
    fn generated_names_are_unique() {
        let a = generate_runner_name("p");
        let b = generate_runner_name("p");
        assert_ne!(a, b);
    }

    #[test]
    fn suffix_is_not_a_pure_decimal_integer() {
        for _ in 0..1000 {
            let name = generate_runner_name("p");
            let suffix = name.strip_prefix("p-").unwrap();
            assert!(suffix.parse::<i64>().is_err());
        }
    }
}
