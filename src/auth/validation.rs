use lazy_static::lazy_static;
use regex::Regex;

use crate::error::FieldError;

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Length >= 8 with at least one uppercase, lowercase, digit and symbol.
pub(crate) fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LEN
        && password.chars().any(|c| c.is_uppercase())
        && password.chars().any(|c| c.is_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password
            .chars()
            .any(|c| !c.is_alphanumeric() && !c.is_whitespace())
}

/// Registration fields after trimming; empty means missing.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationFields<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub username: &'a str,
}

/// Runs every registration check and returns all failures at once.
pub fn validate_registration(f: RegistrationFields<'_>) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for (field, value) in [
        ("name", f.name),
        ("email", f.email),
        ("password", f.password),
        ("username", f.username),
    ] {
        if value.is_empty() {
            errors.push(FieldError::new(field, "This field is required."));
        }
    }

    if !f.email.is_empty() && !is_valid_email(f.email) {
        errors.push(FieldError::new("email", "Please input a valid email."));
    }

    if !f.password.is_empty() && !is_strong_password(f.password) {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters long and contain an uppercase letter, \
             a lowercase letter, a number and a symbol.",
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields<'a>(
        name: &'a str,
        email: &'a str,
        password: &'a str,
        username: &'a str,
    ) -> RegistrationFields<'a> {
        RegistrationFields {
            name,
            email,
            password,
            username,
        }
    }

    #[test]
    fn email_syntax() {
        assert!(is_valid_email("a@x.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("no-at.example.com"));
        assert!(!is_valid_email("two@@x.com"));
        assert!(!is_valid_email("spa ce@x.com"));
    }

    #[test]
    fn password_policy() {
        assert!(is_strong_password("Abcdef1!"));
        assert!(!is_strong_password("Abcde1!"), "too short");
        assert!(!is_strong_password("abcdef1!"), "no uppercase");
        assert!(!is_strong_password("ABCDEF1!"), "no lowercase");
        assert!(!is_strong_password("Abcdefg!"), "no digit");
        assert!(!is_strong_password("Abcdefg1"), "no symbol");
    }

    #[test]
    fn valid_registration_has_no_errors() {
        assert!(validate_registration(fields("Ann", "a@x.com", "Abcdef1!", "ann")).is_empty());
    }

    #[test]
    fn all_failures_are_collected() {
        let errors = validate_registration(fields("", "not-an-email", "weak", ""));
        let names: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(names, vec!["name", "username", "email", "password"]);
    }

    #[test]
    fn missing_email_is_not_also_reported_as_malformed() {
        let errors = validate_registration(fields("Ann", "", "Abcdef1!", "ann"));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "email");
        assert_eq!(errors[0].message, "This field is required.");
    }
}
