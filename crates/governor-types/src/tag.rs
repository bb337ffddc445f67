//! Juju entity tag conversions.
//!
//! The Juju API addresses entities by tag rather than by name: unit
//! `mysql/1` is `unit-mysql-1`, user `admin` is `user-admin`.

/// Errors converting a name to a tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    /// The unit name is not of the form `<application>/<number>`.
    #[error("invalid unit name: {0}")]
    InvalidUnitName(String),
}

/// Convert a unit name (`mysql/1`) to its tag (`unit-mysql-1`).
///
/// # Errors
///
/// Returns [`TagError::InvalidUnitName`] if the name has no `/` separator,
/// an empty application part, or a non-numeric unit number.
pub fn unit_tag(unit_name: &str) -> Result<String, TagError> {
    let invalid = || TagError::InvalidUnitName(unit_name.to_owned());
    let (application, number) = unit_name.split_once('/').ok_or_else(invalid)?;
    if application.is_empty() || number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }
    Ok(format!("unit-{application}-{number}"))
}

/// Convert a user name to its tag. Names that already carry the `user-`
/// prefix are returned unchanged.
pub fn user_tag(username: &str) -> String {
    if username.starts_with("user-") {
        username.to_owned()
    } else {
        format!("user-{username}")
    }
}
