// src/validation.rs
// Format gates applied before any expensive or security relevant work.

const ONION_SUFFIX: &str = ".onion";
const ONION_V2_HOST_LEN: usize = 16;
const ONION_V3_HOST_LEN: usize = 56;

/// Checks `[a-z2-7]{16}.onion` or `[a-z2-7]{56}.onion` (v2 and v3, base32
/// lowercase). Format only; nothing is resolved.
pub fn is_valid_onion_address(addr: &str) -> bool {
    let Some(host) = addr.strip_suffix(ONION_SUFFIX) else {
        return false;
    };
    matches!(host.len(), ONION_V2_HOST_LEN | ONION_V3_HOST_LEN)
        && host.bytes().all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
}

/// Checks the PHC prefix `$argon2(id|i)$v=N$m=N,t=N,p=N$...`.
///
/// Strings failing this gate are never handed to the verifier.
pub fn is_valid_argon2_hash(hash: &str) -> bool {
    let Some(rest) = hash.strip_prefix("$argon2") else {
        return false;
    };
    let rest = match rest.strip_prefix("id$").or_else(|| rest.strip_prefix("i$")) {
        Some(r) => r,
        None => return false,
    };

    let Some(rest) = rest.strip_prefix("v=") else {
        return false;
    };
    let Some((version, rest)) = rest.split_once('$') else {
        return false;
    };
    if !is_digits(version) {
        return false;
    }

    let Some((costs, tail)) = rest.split_once('$') else {
        return false;
    };
    let mut parts = costs.split(',');
    for prefix in ["m=", "t=", "p="] {
        match parts.next().and_then(|p| p.strip_prefix(prefix)) {
            Some(value) if is_digits(value) => {}
            _ => return false,
        }
    }
    if parts.next().is_some() {
        return false;
    }

    !tail.is_empty() && !tail.starts_with('\n')
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
