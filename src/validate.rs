//! Form validation for registration, login, retro creation, and comments.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex is valid")
});

pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 100;
const MAX_NAME_LEN: usize = 100;

/// Field name → messages, ordered by field for stable output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, msgs)| format!("{}: {}", field, msgs.join(", ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

fn check_email(errors: &mut ValidationErrors, email: &str) {
    if !EMAIL_RE.is_match(email.trim()) {
        errors.add("email", "Invalid email address");
    }
}

fn check_length(errors: &mut ValidationErrors, field: &str, value: &str, min: usize, max: usize) {
    let len = value.trim().chars().count();
    if len < min {
        if min == 1 {
            errors.add(field, "Required");
        } else {
            errors.add(field, format!("Must be at least {} characters", min));
        }
    } else if len > max {
        errors.add(field, format!("Must be at most {} characters", max));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterForm {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub invite_token: Option<String>,
}

impl RegisterForm {
    pub fn validate(&self, min_password_len: usize) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, &self.email);
        check_length(&mut errors, "first_name", &self.first_name, 1, MAX_NAME_LEN);
        check_length(&mut errors, "last_name", &self.last_name, 1, MAX_NAME_LEN);
        check_length(
            &mut errors,
            "password",
            &self.password,
            min_password_len.max(1),
            MAX_PASSWORD_LEN,
        );
        if self.confirm_password.is_empty() {
            errors.add("confirm_password", "Required");
        } else if self.password != self.confirm_password {
            errors.add("confirm_password", "Passwords do not match");
        }
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_email(&mut errors, &self.email);
        check_length(
            &mut errors,
            "password",
            &self.password,
            DEFAULT_MIN_PASSWORD_LEN,
            MAX_PASSWORD_LEN,
        );
        errors.into_result()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRetroForm {
    pub name: String,
    pub template_id: String,
}

impl NewRetroForm {
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        check_length(&mut errors, "name", &self.name, 1, MAX_NAME_LEN);
        if self.template_id.trim().is_empty() {
            errors.add("template_id", "Required");
        }
        errors.into_result()
    }
}

/// A comment body must contain something other than whitespace.
pub fn validate_comment_body(body: &str) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if body.trim().is_empty() {
        errors.add("comment", "Required");
    }
    errors.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_form() -> RegisterForm {
        RegisterForm {
            email: "grace@example.com".into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            password: "cobol-rules".into(),
            confirm_password: "cobol-rules".into(),
            invite_token: None,
        }
    }

    #[test]
    fn test_valid_register_form() {
        assert!(register_form().validate(DEFAULT_MIN_PASSWORD_LEN).is_ok());
    }

    #[test]
    fn test_register_password_mismatch() {
        let mut form = register_form();
        form.confirm_password = "different".into();
        let errors = form.validate(DEFAULT_MIN_PASSWORD_LEN).unwrap_err();
        assert_eq!(
            errors.fields["confirm_password"],
            vec!["Passwords do not match".to_string()]
        );
        assert!(!errors.has("password"));
    }

    #[test]
    fn test_register_collects_every_field_error() {
        let form = RegisterForm {
            email: "not-an-email".into(),
            first_name: "   ".into(),
            last_name: String::new(),
            password: "abc".into(),
            confirm_password: String::new(),
            invite_token: None,
        };
        let errors = form.validate(DEFAULT_MIN_PASSWORD_LEN).unwrap_err();
        for field in ["email", "first_name", "last_name", "password", "confirm_password"] {
            assert!(errors.has(field), "missing error for {}", field);
        }
    }

    #[test]
    fn test_login_password_bounds() {
        let short = LoginForm {
            email: "a@b.co".into(),
            password: "12345".into(),
        };
        assert!(short.validate().unwrap_err().has("password"));
        let long = LoginForm {
            email: "a@b.co".into(),
            password: "x".repeat(101),
        };
        assert!(long.validate().unwrap_err().has("password"));
        let ok = LoginForm {
            email: "a@b.co".into(),
            password: "123456".into(),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_comment_body_must_not_be_blank() {
        assert!(validate_comment_body("Retro went well").is_ok());
        assert!(validate_comment_body("").is_err());
        assert!(validate_comment_body(" \n\t").is_err());
    }

    #[test]
    fn test_new_retro_form() {
        let form = NewRetroForm {
            name: String::new(),
            template_id: String::new(),
        };
        let errors = form.validate().unwrap_err();
        assert!(errors.has("name"));
        assert!(errors.has("template_id"));
        assert_eq!(errors.to_string(), "name: Required; template_id: Required");
    }
}
