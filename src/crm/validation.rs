//! Field-level validation of incoming forms.
//!
//! Each form mirrors what a client submits: optional text fields may arrive
//! as empty strings and are normalised to `None`. `validate()` collects every
//! failing field rather than stopping at the first.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::Deserialize;

use super::models::*;
use crate::errors::{CrmError, FieldError};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/?#]+\.[^\s]+$").expect("valid url regex"));

static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid color regex"));

/// Trim and turn blank strings into `None`.
pub fn blank_to_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(errors: &mut Vec<FieldError>, field: &str, value: &str, message: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(FieldError::new(field, message));
    }
    trimmed.to_string()
}

/// The address check shared by the forms and `dealdesk user add`.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn check_email(errors: &mut Vec<FieldError>, field: &str, value: &Option<String>) {
    if let Some(email) = value {
        if !is_valid_email(email) {
            errors.push(FieldError::new(field, "Invalid email address"));
        }
    }
}

fn check_url(errors: &mut Vec<FieldError>, field: &str, value: &Option<String>) {
    if let Some(url) = value {
        if !URL_RE.is_match(url) {
            errors.push(FieldError::new(field, "Invalid URL"));
        }
    }
}

fn check_date(errors: &mut Vec<FieldError>, field: &str, value: &Option<String>) {
    if let Some(date) = value {
        if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            errors.push(FieldError::new(field, "Invalid date, expected YYYY-MM-DD"));
        }
    }
}

/// Due dates accept a plain date or an RFC 3339 timestamp.
fn check_date_or_datetime(errors: &mut Vec<FieldError>, field: &str, value: &Option<String>) {
    if let Some(date) = value {
        let ok = NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok()
            || DateTime::parse_from_rfc3339(date).is_ok();
        if !ok {
            errors.push(FieldError::new(field, "Invalid date"));
        }
    }
}

fn parse_enum<T: FromStr>(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: Option<String>,
    message: &str,
) -> Option<T> {
    let value = blank_to_none(value)?;
    match T::from_str(&value) {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            errors.push(FieldError::new(field, message));
            None
        }
    }
}

fn finish<T>(errors: Vec<FieldError>, value: T) -> Result<T, CrmError> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(CrmError::Validation(errors))
    }
}

fn clean_address(address: Option<Address>) -> Option<Address> {
    address
        .map(|a| Address {
            street: blank_to_none(a.street),
            city: blank_to_none(a.city),
            state: blank_to_none(a.state),
            zip: blank_to_none(a.zip),
            country: blank_to_none(a.country),
        })
        .filter(|a| !a.is_empty())
}

// ── Forms ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompanyForm {
    #[serde(default)]
    pub name: String,
    pub domain: Option<String>,
    pub industry: Option<String>,
    pub size: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<Address>,
}

impl CompanyForm {
    pub fn validate(self) -> Result<CompanyInput, CrmError> {
        let mut errors = Vec::new();
        let name = required(&mut errors, "name", &self.name, "Company name is required");
        let website = blank_to_none(self.website);
        check_url(&mut errors, "website", &website);
        let size = parse_enum(&mut errors, "size", self.size, "Invalid company size");
        finish(
            errors,
            CompanyInput {
                name,
                domain: blank_to_none(self.domain),
                industry: blank_to_none(self.industry),
                size,
                address: clean_address(self.address),
                phone: blank_to_none(self.phone),
                website,
            },
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContactForm {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company_id: Option<i64>,
    pub position: Option<String>,
    pub address: Option<Address>,
    pub social_links: Option<SocialLinks>,
    pub notes: Option<String>,
    pub status: Option<String>,
}

impl ContactForm {
    pub fn validate(self) -> Result<ContactInput, CrmError> {
        let mut errors = Vec::new();
        let first_name = required(
            &mut errors,
            "first_name",
            &self.first_name,
            "First name is required",
        );
        let last_name = required(
            &mut errors,
            "last_name",
            &self.last_name,
            "Last name is required",
        );
        let email = blank_to_none(self.email);
        check_email(&mut errors, "email", &email);
        let status = parse_enum(&mut errors, "status", self.status, "Invalid status")
            .unwrap_or_default();
        let social_links = self
            .social_links
            .map(|links| {
                links
                    .into_iter()
                    .filter_map(|(k, v)| blank_to_none(Some(v)).map(|v| (k, v)))
                    .collect::<SocialLinks>()
            })
            .filter(|links| !links.is_empty());
        finish(
            errors,
            ContactInput {
                first_name,
                last_name,
                email,
                phone: blank_to_none(self.phone),
                company_id: self.company_id,
                position: blank_to_none(self.position),
                address: clean_address(self.address),
                social_links,
                notes: blank_to_none(self.notes),
                status,
            },
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DealForm {
    #[serde(default)]
    pub title: String,
    pub value: Option<f64>,
    pub stage_id: Option<i64>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub probability: Option<i32>,
    pub expected_close_date: Option<String>,
    pub close_reason: Option<String>,
    pub description: Option<String>,
}

impl DealForm {
    pub fn validate(self) -> Result<DealInput, CrmError> {
        let mut errors = Vec::new();
        let title = required(&mut errors, "title", &self.title, "Deal title is required");
        if let Some(value) = self.value {
            if !value.is_finite() || value < 0.0 {
                errors.push(FieldError::new("value", "Value must be positive"));
            }
        }
        if let Some(p) = self.probability {
            if !(0..=100).contains(&p) {
                errors.push(FieldError::new("probability", "Must be 0-100"));
            }
        }
        let expected_close_date = blank_to_none(self.expected_close_date);
        check_date(&mut errors, "expected_close_date", &expected_close_date);
        finish(
            errors,
            DealInput {
                title,
                value: self.value,
                stage_id: self.stage_id,
                contact_id: self.contact_id,
                company_id: self.company_id,
                probability: self.probability,
                expected_close_date,
                close_reason: blank_to_none(self.close_reason),
                description: blank_to_none(self.description),
            },
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityForm {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
    pub due_date: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
}

impl ActivityForm {
    pub fn validate(self) -> Result<ActivityInput, CrmError> {
        let mut errors = Vec::new();
        let kind = match blank_to_none(self.kind) {
            Some(raw) => match ActivityType::from_str(&raw) {
                Ok(kind) => Some(kind),
                Err(_) => {
                    errors.push(FieldError::new("type", "Invalid activity type"));
                    None
                }
            },
            None => {
                errors.push(FieldError::new("type", "Type is required"));
                None
            }
        };
        let title = required(&mut errors, "title", &self.title, "Title is required");
        let due_date = blank_to_none(self.due_date);
        check_date_or_datetime(&mut errors, "due_date", &due_date);
        match kind {
            Some(kind) if errors.is_empty() => Ok(ActivityInput {
                kind,
                title,
                description: blank_to_none(self.description),
                contact_id: self.contact_id,
                company_id: self.company_id,
                deal_id: self.deal_id,
                due_date,
                is_completed: self.is_completed,
            }),
            _ => Err(CrmError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NoteForm {
    #[serde(default)]
    pub content: String,
    pub contact_id: Option<i64>,
    pub company_id: Option<i64>,
    pub deal_id: Option<i64>,
}

impl NoteForm {
    pub fn validate(self) -> Result<NoteInput, CrmError> {
        let mut errors = Vec::new();
        let content = required(&mut errors, "content", &self.content, "Content is required");
        finish(
            errors,
            NoteInput {
                content,
                contact_id: self.contact_id,
                company_id: self.company_id,
                deal_id: self.deal_id,
            },
        )
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageForm {
    #[serde(default)]
    pub name: String,
    pub color: Option<String>,
    pub role: Option<String>,
}

/// A validated stage definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StageInput {
    pub name: String,
    pub color: String,
    pub role: StageRole,
}

impl StageForm {
    pub fn validate(self) -> Result<StageInput, CrmError> {
        let mut errors = Vec::new();
        let name = required(&mut errors, "name", &self.name, "Stage name is required");
        let role = match blank_to_none(self.role) {
            Some(raw) => match StageRole::from_str(&raw) {
                Ok(role) => Some(role),
                Err(_) => {
                    errors.push(FieldError::new("role", "Invalid stage role"));
                    None
                }
            },
            None => {
                errors.push(FieldError::new("role", "Stage role is required"));
                None
            }
        };
        let color = blank_to_none(self.color);
        if let Some(c) = &color {
            if !COLOR_RE.is_match(c) {
                errors.push(FieldError::new("color", "Color must look like #rrggbb"));
            }
        }
        match role {
            Some(role) if errors.is_empty() => Ok(StageInput {
                name,
                color: color.unwrap_or_else(|| role.accent().to_string()),
                role,
            }),
            _ => Err(CrmError::Validation(errors)),
        }
    }
}

/// Rename / recolour an existing stage. The role is fixed at creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageEditForm {
    pub name: Option<String>,
    pub color: Option<String>,
}

impl StageEditForm {
    pub fn validate(self) -> Result<(Option<String>, Option<String>), CrmError> {
        let mut errors = Vec::new();
        let name = match self.name {
            Some(n) if n.trim().is_empty() => {
                errors.push(FieldError::new("name", "Stage name is required"));
                None
            }
            Some(n) => Some(n.trim().to_string()),
            None => None,
        };
        let color = blank_to_none(self.color);
        if let Some(c) = &color {
            if !COLOR_RE.is_match(c) {
                errors.push(FieldError::new("color", "Color must look like #rrggbb"));
            }
        }
        finish(errors, (name, color))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileForm {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileForm {
    pub fn validate(self) -> Result<(Option<String>, Option<String>), CrmError> {
        let mut errors = Vec::new();
        let full_name = match self.full_name {
            Some(n) if n.trim().is_empty() => {
                errors.push(FieldError::new("full_name", "Full name is required"));
                None
            }
            Some(n) => Some(n.trim().to_string()),
            None => None,
        };
        let avatar_url = blank_to_none(self.avatar_url);
        check_url(&mut errors, "avatar_url", &avatar_url);
        finish(errors, (full_name, avatar_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: CrmError) -> Vec<String> {
        match err {
            CrmError::Validation(fields) => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn deal_requires_title() {
        let err = DealForm::default().validate().unwrap_err();
        assert_eq!(fields(err), vec!["title"]);
    }

    #[test]
    fn deal_collects_every_bad_field() {
        let form = DealForm {
            title: "  ".into(),
            value: Some(-5.0),
            probability: Some(140),
            expected_close_date: Some("next week".into()),
            ..Default::default()
        };
        let got = fields(form.validate().unwrap_err());
        assert_eq!(
            got,
            vec!["title", "value", "probability", "expected_close_date"]
        );
    }

    #[test]
    fn deal_normalises_blank_strings() {
        let form = DealForm {
            title: " Website redesign ".into(),
            value: Some(12_000.0),
            probability: Some(60),
            expected_close_date: Some("".into()),
            description: Some("   ".into()),
            ..Default::default()
        };
        let input = form.validate().unwrap();
        assert_eq!(input.title, "Website redesign");
        assert_eq!(input.expected_close_date, None);
        assert_eq!(input.description, None);
        assert_eq!(input.stage_id, None);
    }

    #[test]
    fn probability_bounds_are_inclusive() {
        for p in [0, 100] {
            let form = DealForm {
                title: "x".into(),
                probability: Some(p),
                ..Default::default()
            };
            assert!(form.validate().is_ok(), "probability {p} should pass");
        }
    }

    #[test]
    fn contact_email_and_names() {
        let form = ContactForm {
            first_name: "Ada".into(),
            last_name: "".into(),
            email: Some("not-an-email".into()),
            ..Default::default()
        };
        let got = fields(form.validate().unwrap_err());
        assert_eq!(got, vec!["last_name", "email"]);
    }

    #[test]
    fn email_needs_a_domain_with_a_dot() {
        assert!(is_valid_email("ada@example.com"));
        for bad in ["bad@", "@example.com", "ada@example", "ada @example.com", "a@b@c.d"] {
            assert!(!is_valid_email(bad), "{bad} should be rejected");
        }
    }

    #[test]
    fn contact_defaults_to_active_and_drops_empty_links() {
        let mut links = SocialLinks::new();
        links.insert("linkedin".into(), "".into());
        let form = ContactForm {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: Some("ada@example.com".into()),
            social_links: Some(links),
            address: Some(Address::default()),
            ..Default::default()
        };
        let input = form.validate().unwrap();
        assert_eq!(input.status, ContactStatus::Active);
        assert_eq!(input.social_links, None);
        assert_eq!(input.address, None);
    }

    #[test]
    fn contact_rejects_unknown_status() {
        let form = ContactForm {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            status: Some("vip".into()),
            ..Default::default()
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["status"]);
    }

    #[test]
    fn company_website_must_be_url() {
        let form = CompanyForm {
            name: "Acme".into(),
            website: Some("acme dot com".into()),
            size: Some("11-50".into()),
            ..Default::default()
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["website"]);

        let ok = CompanyForm {
            name: "Acme".into(),
            website: Some("https://acme.com".into()),
            size: Some("11-50".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(ok.size, Some(CompanySize::Small));
    }

    #[test]
    fn activity_requires_known_type() {
        let form = ActivityForm {
            kind: Some("fax".into()),
            title: "Send contract".into(),
            ..Default::default()
        };
        assert_eq!(fields(form.validate().unwrap_err()), vec!["type"]);

        let missing = ActivityForm {
            title: "Call back".into(),
            ..Default::default()
        };
        assert_eq!(fields(missing.validate().unwrap_err()), vec!["type"]);
    }

    #[test]
    fn activity_due_date_accepts_date_or_timestamp() {
        for due in ["2025-03-01", "2025-03-01T09:30:00Z"] {
            let form = ActivityForm {
                kind: Some("task".into()),
                title: "Follow up".into(),
                due_date: Some(due.into()),
                ..Default::default()
            };
            assert!(form.validate().is_ok(), "{due} should be accepted");
        }
    }

    #[test]
    fn stage_role_is_required_and_colour_defaults_to_accent() {
        let err = StageForm {
            name: "Discovery".into(),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert_eq!(fields(err), vec!["role"]);

        let input = StageForm {
            name: "Discovery".into(),
            role: Some("qualified".into()),
            color: None,
        }
        .validate()
        .unwrap();
        assert_eq!(input.color, StageRole::Qualified.accent());
    }

    #[test]
    fn stage_edit_rejects_blank_name_and_bad_colour() {
        let err = StageEditForm {
            name: Some(" ".into()),
            color: Some("blue".into()),
        }
        .validate()
        .unwrap_err();
        assert_eq!(fields(err), vec!["name", "color"]);
    }

    #[test]
    fn note_needs_content() {
        assert_eq!(
            fields(NoteForm::default().validate().unwrap_err()),
            vec!["content"]
        );
    }
}
