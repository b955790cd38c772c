//! The Decemvirate and the bond physics table.
//!
//! Entity types are open strings in storage (auxiliary types are
//! schema-extensible), but the ten core variants and the closed verb table
//! are fixed here. Changing the table is a schema migration, not runtime
//! configuration.

use crate::core::error::ChoraError;

/// The ten core entity variants.
pub const DECEMVIRATE: &[&str] = &[
    "inquiry",
    "signal",
    "learning",
    "principle",
    "pattern",
    "story",
    "behavior",
    "tool",
    "focus",
    "relationship",
];

/// Auxiliary types the kernel itself traffics in.
pub const AUXILIARY_TYPES: &[&str] = &[
    "circle",
    "asset",
    "protocol",
    "primitive",
    "axiom",
    "layout",
    "persona",
];

/// All valid bond verbs.
pub const VERBS: &[&str] = &[
    "yields",
    "surfaces",
    "induces",
    "governs",
    "clarifies",
    "structures",
    "specifies",
    "implements",
    "verifies",
    "emits",
    "triggers",
    "crystallized-from",
    "inhabits",
    "belongs-to",
    "stewards",
];

/// Allowed `(from.type, to.type)` pairs per verb. `"*"` is a wildcard.
///
/// Returns `None` for unknown verbs.
pub fn allowed_pairs(verb: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match verb {
        "yields" => Some(&[("inquiry", "learning")]),
        "surfaces" => Some(&[("learning", "principle")]),
        "induces" => Some(&[("learning", "pattern")]),
        "governs" => Some(&[("principle", "pattern")]),
        "clarifies" => Some(&[("principle", "story")]),
        "structures" => Some(&[("pattern", "story"), ("pattern", "behavior")]),
        "specifies" => Some(&[("story", "behavior")]),
        "implements" => Some(&[("behavior", "tool")]),
        "verifies" => Some(&[("tool", "behavior")]),
        "emits" => Some(&[("tool", "signal")]),
        "triggers" => Some(&[("signal", "protocol"), ("signal", "focus")]),
        "crystallized-from" => Some(&[("*", "*")]),
        "inhabits" => Some(&[("*", "circle")]),
        "belongs-to" => Some(&[("asset", "circle")]),
        "stewards" => Some(&[("persona", "circle")]),
        _ => None,
    }
}

/// Validate a bond triple against the physics table.
pub fn check_bond(verb: &str, from_type: &str, to_type: &str) -> Result<(), ChoraError> {
    let pairs = allowed_pairs(verb).ok_or_else(|| {
        ChoraError::PhysicsViolation(format!("unknown bond verb: {}", verb))
    })?;
    let ok = pairs
        .iter()
        .any(|(f, t)| (*f == "*" || *f == from_type) && (*t == "*" || *t == to_type));
    if ok {
        Ok(())
    } else {
        Err(ChoraError::PhysicsViolation(format!(
            "{} does not admit {} -> {}",
            verb, from_type, to_type
        )))
    }
}

/// Bond suggestion attractors: for a source type, which verbs lead to
/// which target types. Derived from the physics table; wildcard rows are
/// excluded because they attract everything and rank nothing.
pub fn attractors_for(from_type: &str) -> Vec<(&'static str, &'static str)> {
    let mut out = Vec::new();
    for verb in VERBS {
        if let Some(pairs) = allowed_pairs(verb) {
            for (f, t) in pairs {
                if *f == from_type && *t != "*" {
                    out.push((*verb, *t));
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generative_chain_triples_pass() {
        check_bond("yields", "inquiry", "learning").unwrap();
        check_bond("verifies", "tool", "behavior").unwrap();
        check_bond("triggers", "signal", "protocol").unwrap();
        check_bond("triggers", "signal", "focus").unwrap();
        check_bond("structures", "pattern", "behavior").unwrap();
    }

    #[test]
    fn wildcard_verbs_accept_anything_on_their_open_side() {
        check_bond("crystallized-from", "tool", "inquiry").unwrap();
        check_bond("inhabits", "learning", "circle").unwrap();
        assert!(check_bond("inhabits", "learning", "asset").is_err());
    }

    #[test]
    fn disallowed_triples_are_physics_violations() {
        assert!(check_bond("verifies", "story", "tool").is_err());
        assert!(check_bond("yields", "learning", "inquiry").is_err());
        assert!(check_bond("no-such-verb", "tool", "behavior").is_err());
    }

    #[test]
    fn attractors_follow_the_table() {
        let a = attractors_for("learning");
        assert!(a.contains(&("surfaces", "principle")));
        assert!(a.contains(&("induces", "pattern")));
        assert!(!a.iter().any(|(v, _)| *v == "crystallized-from"));
    }
}
