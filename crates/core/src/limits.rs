//! Identifier rules
//!
//! Namespace, action and variable identifiers share one shape: an ASCII
//! letter followed by letters, digits or underscores, at most
//! [`MAX_IDENT_NAME_LENGTH`] characters. Variables additionally carry the
//! [`VARIABLE_SIGIL`] prefix, which does not count towards the length.

use crate::error::{Error, Result};

/// Maximum length of an identifier, excluding any sigil
pub const MAX_IDENT_NAME_LENGTH: usize = 32;

/// Prefix of user variables (`$name`)
pub const VARIABLE_SIGIL: char = '$';

/// Prefix of contextual variables (`@caller`)
pub const CONTEXT_SIGIL: char = '@';

fn ident_shape_ok(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check that `s` is a valid bare identifier.
pub fn validate_ident(s: &str) -> Result<()> {
    if !ident_shape_ok(s) {
        return Err(Error::invalid_input(format!(
            "identifier \"{}\" must start with a letter and only contain letters, numbers, and underscores",
            s
        )));
    }
    if s.len() > MAX_IDENT_NAME_LENGTH {
        return Err(Error::invalid_input(format!(
            "identifier cannot be longer than {} characters, received {}",
            MAX_IDENT_NAME_LENGTH, s
        )));
    }
    Ok(())
}

/// Check that `s` is a valid variable name (`$` followed by an identifier).
pub fn validate_var_name(s: &str) -> Result<()> {
    let invalid = |reason: String| Error::InvalidVariable {
        name: s.to_string(),
        reason,
    };

    let Some(name) = s.strip_prefix(VARIABLE_SIGIL) else {
        return Err(invalid(format!(
            "variable name must start with {}",
            VARIABLE_SIGIL
        )));
    };

    if !ident_shape_ok(name) {
        return Err(invalid(
            "variable name must only contain letters, numbers, and underscores".to_string(),
        ));
    }

    if name.len() > MAX_IDENT_NAME_LENGTH {
        return Err(invalid(format!(
            "variable name cannot be longer than {} characters",
            MAX_IDENT_NAME_LENGTH
        )));
    }

    Ok(())
}

/// Lower-case `name` and prefix the variable sigil if it is missing.
pub fn normalize_var_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    if lowered.starts_with(VARIABLE_SIGIL) {
        lowered
    } else {
        format!("{}{}", VARIABLE_SIGIL, lowered)
    }
}
