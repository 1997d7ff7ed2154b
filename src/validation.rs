//! Input schemas for the sign-up and sign-in forms.
//!
//! Raw forms deserialize leniently (every field optional) so that a missing or
//! blank field becomes a field error instead of a rejected request body.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MIN_FULL_NAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 8;

/// One failed rule, keyed by the camelCase form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("invalid input on {} field(s)", .errors.len())]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub(crate) fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[cfg(test)]
    pub fn has(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    #[cfg(test)]
    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.errors
            .iter()
            .filter(|e| e.field == field)
            .map(|e| e.message.as_str())
            .collect()
    }
}

/// A number field as it arrives from a form: either already numeric or text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberInput {
    Integer(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignUpForm {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub university_id: Option<NumberInput>,
    pub university_card: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUp {
    pub full_name: String,
    pub email: String,
    pub university_id: i64,
    pub university_card: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignInForm {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignIn {
    pub email: String,
    pub password: String,
}

impl SignUpForm {
    pub fn validate(self) -> Result<SignUp, ValidationErrors> {
        let mut errs = ValidationErrors::default();

        let full_name = min_length(&mut errs, "fullName", self.full_name, MIN_FULL_NAME_LEN);
        let email = email(&mut errs, "email", self.email);
        let university_id = coerce_integer(&mut errs, "universityId", self.university_id);
        let university_card = non_empty(
            &mut errs,
            "universityCard",
            self.university_card,
            "University card is required",
        );
        let password = min_length(&mut errs, "password", self.password, MIN_PASSWORD_LEN);

        match (full_name, email, university_id, university_card, password) {
            (Some(full_name), Some(email), Some(university_id), Some(university_card), Some(password))
                if errs.is_empty() =>
            {
                Ok(SignUp {
                    full_name,
                    email,
                    university_id,
                    university_card,
                    password,
                })
            }
            _ => Err(errs),
        }
    }
}

impl SignInForm {
    pub fn validate(self) -> Result<SignIn, ValidationErrors> {
        let mut errs = ValidationErrors::default();

        let email = email(&mut errs, "email", self.email);
        let password = min_length(&mut errs, "password", self.password, MIN_PASSWORD_LEN);

        match (email, password) {
            (Some(email), Some(password)) if errs.is_empty() => Ok(SignIn { email, password }),
            _ => Err(errs),
        }
    }
}

pub fn is_valid_email(candidate: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(
            r"(?i)^[A-Z0-9_'+\-.]*[A-Z0-9_+\-]@([A-Z0-9][A-Z0-9\-]*\.)+[A-Z]{2,}$"
        )
        .expect("email regex is valid");
    }
    // no look-around in `regex`, so the dot rules on the local part live here
    !candidate.starts_with('.') && !candidate.contains("..") && EMAIL_RE.is_match(candidate)
}

fn trimmed(
    errs: &mut ValidationErrors,
    field: &'static str,
    value: Option<String>,
) -> Option<String> {
    match value {
        Some(v) => Some(v.trim().to_string()),
        None => {
            errs.push(field, "Required");
            None
        }
    }
}

fn min_length(
    errs: &mut ValidationErrors,
    field: &'static str,
    value: Option<String>,
    min: usize,
) -> Option<String> {
    let value = trimmed(errs, field, value)?;
    if value.chars().count() < min {
        errs.push(
            field,
            format!("String must contain at least {min} character(s)"),
        );
        return None;
    }
    Some(value)
}

fn non_empty(
    errs: &mut ValidationErrors,
    field: &'static str,
    value: Option<String>,
    message: &str,
) -> Option<String> {
    let value = trimmed(errs, field, value)?;
    if value.is_empty() {
        errs.push(field, message);
        return None;
    }
    Some(value)
}

fn email(errs: &mut ValidationErrors, field: &'static str, value: Option<String>) -> Option<String> {
    let value = trimmed(errs, field, value)?;
    if !is_valid_email(&value) {
        errs.push(field, "Invalid email");
        return None;
    }
    Some(value)
}

/// Coerce a form value to a number, then require it to be a whole number
/// that fits the column.
fn coerce_integer(
    errs: &mut ValidationErrors,
    field: &'static str,
    value: Option<NumberInput>,
) -> Option<i64> {
    let number = match value {
        None => {
            errs.push(field, "Required");
            return None;
        }
        Some(NumberInput::Integer(n)) => return Some(n),
        Some(NumberInput::Float(f)) => Ok(f),
        Some(NumberInput::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                Err("Expected number, received empty string")
            } else if let Ok(n) = text.parse::<i64>() {
                return Some(n);
            } else {
                text.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .ok_or("Expected number, received nan")
            }
        }
    };

    let parsed = number.and_then(|f| {
        if f.fract() != 0.0 {
            return Err("Expected integer, received float");
        }
        // out-of-range values saturate on the cast
        let n = f as i64;
        if n as f64 == f {
            Ok(n)
        } else {
            Err("Number is out of range")
        }
    });

    match parsed {
        Ok(n) => Some(n),
        Err(message) => {
            errs.push(field, message);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign_up(value: serde_json::Value) -> Result<SignUp, ValidationErrors> {
        serde_json::from_value::<SignUpForm>(value)
            .expect("lenient form always deserializes")
            .validate()
    }

    fn sign_in(value: serde_json::Value) -> Result<SignIn, ValidationErrors> {
        serde_json::from_value::<SignInForm>(value)
            .expect("lenient form always deserializes")
            .validate()
    }

    fn valid_sign_up() -> serde_json::Value {
        json!({
            "fullName": "  Alice Liddell ",
            "email": " alice@example.com ",
            "universityId": "123",
            "universityCard": "cards/alice.png",
            "password": "  wonderland  "
        })
    }

    #[test]
    fn accepts_and_normalizes_valid_sign_up() {
        let data = sign_up(valid_sign_up()).expect("valid form");
        assert_eq!(data.full_name, "Alice Liddell");
        assert_eq!(data.email, "alice@example.com");
        assert_eq!(data.university_id, 123);
        assert_eq!(data.university_card, "cards/alice.png");
        assert_eq!(data.password, "wonderland");
    }

    #[test]
    fn email_rule_accepts_common_addresses() {
        for ok in [
            "a@b.co",
            "first.last@example.com",
            "user+tag@sub.domain.org",
            "O'Brien@Example.IE",
            "x_y-z@mail-server.io",
        ] {
            assert!(is_valid_email(ok), "{ok} should be accepted");
        }
    }

    #[test]
    fn email_rule_rejects_malformed_addresses() {
        for bad in [
            "",
            "no-at-sign.com",
            "@example.com",
            "user@",
            "user@example",
            ".user@example.com",
            "us..er@example.com",
            "user.@example.com",
            "user@-example.com",
            "user@example.c",
            "us er@example.com",
            "a@b@c.com",
        ] {
            assert!(!is_valid_email(bad), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn malformed_email_is_a_field_error_on_email() {
        let errs = sign_in(json!({ "email": "not-an-email", "password": "long-enough" })).unwrap_err();
        assert_eq!(errs.messages_for("email"), vec!["Invalid email"]);
        assert!(!errs.has("password"));

        let errs = sign_in(json!({ "email": "", "password": "long-enough" })).unwrap_err();
        assert!(errs.has("email"));
    }

    #[test]
    fn short_password_rejected_by_both_schemas() {
        let errs = sign_in(json!({ "email": "a@b.com", "password": "short" })).unwrap_err();
        assert!(errs.has("password"));

        let mut form = valid_sign_up();
        form["password"] = json!("1234567");
        let errs = sign_up(form).unwrap_err();
        assert_eq!(
            errs.messages_for("password"),
            vec!["String must contain at least 8 character(s)"]
        );
    }

    #[test]
    fn whitespace_does_not_count_towards_length() {
        let errs = sign_in(json!({ "email": "a@b.com", "password": "   abc    " })).unwrap_err();
        assert!(errs.has("password"));

        let mut form = valid_sign_up();
        form["fullName"] = json!("  Al   ");
        let errs = sign_up(form).unwrap_err();
        assert!(errs.has("fullName"));
    }

    #[test]
    fn university_id_coercion() {
        let mut form = valid_sign_up();
        form["universityId"] = json!(" 42 ");
        assert_eq!(sign_up(form).unwrap().university_id, 42);

        let mut form = valid_sign_up();
        form["universityId"] = json!(7);
        assert_eq!(sign_up(form).unwrap().university_id, 7);

        let mut form = valid_sign_up();
        form["universityId"] = json!(9.0);
        assert_eq!(sign_up(form).unwrap().university_id, 9);

        for bad in [json!("abc"), json!(""), json!("12.5"), json!(1.5)] {
            let mut form = valid_sign_up();
            form["universityId"] = bad.clone();
            let errs = sign_up(form).unwrap_err();
            assert!(errs.has("universityId"), "{bad} should be rejected");
        }
    }

    #[test]
    fn university_id_accepts_numeric_text_in_any_notation() {
        let mut form = valid_sign_up();
        form["universityId"] = json!("1e3");
        assert_eq!(sign_up(form).unwrap().university_id, 1000);

        let mut form = valid_sign_up();
        form["universityId"] = json!("42.0");
        assert_eq!(sign_up(form).unwrap().university_id, 42);
    }

    #[test]
    fn fractional_university_id_is_reported_as_float() {
        for fractional in [json!("12.5"), json!(1.5), json!(" 0.25 ")] {
            let mut form = valid_sign_up();
            form["universityId"] = fractional.clone();
            let errs = sign_up(form).unwrap_err();
            assert_eq!(
                errs.messages_for("universityId"),
                vec!["Expected integer, received float"],
                "{fractional}"
            );
        }

        for not_a_number in [json!("abc"), json!("NaN"), json!("inf")] {
            let mut form = valid_sign_up();
            form["universityId"] = not_a_number.clone();
            let errs = sign_up(form).unwrap_err();
            assert_eq!(
                errs.messages_for("universityId"),
                vec!["Expected number, received nan"],
                "{not_a_number}"
            );
        }
    }

    #[test]
    fn blank_university_card_uses_custom_message() {
        let mut form = valid_sign_up();
        form["universityCard"] = json!("   ");
        let errs = sign_up(form).unwrap_err();
        assert_eq!(
            errs.messages_for("universityCard"),
            vec!["University card is required"]
        );
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let errs = sign_up(json!({})).unwrap_err();
        for field in ["fullName", "email", "universityId", "universityCard", "password"] {
            assert_eq!(errs.messages_for(field), vec!["Required"], "{field}");
        }
    }

    #[test]
    fn errors_serialize_with_field_names() {
        let errs = sign_in(json!({ "password": "x" })).unwrap_err();
        let body = serde_json::to_value(&errs).unwrap();
        let fields: Vec<_> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["field"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(fields, vec!["email", "password"]);
    }
}
