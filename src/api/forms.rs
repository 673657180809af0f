//! Client-side validation of user-submitted inputs.
//!
//! Validation runs before any request is built, so rejected input never
//! reaches the transport or the query cache.

use std::fmt;

use thiserror::Error;
use vitrine_api_types::{CreateRatingDto, LoginInput, RegisterInput};

use crate::transport::{FilePart, MultipartBody};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_NAME_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 255;
pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_PRODUCT_IMAGES: usize = 2;
pub const ACCEPTED_IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every problem found in one input, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input: {}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn field(&self, name: &str) -> Option<&FieldIssue> {
        self.issues.iter().find(|issue| issue.field == name)
    }
}

fn render_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn check(&mut self, ok: bool, field: &'static str, message: &str) {
        if !ok {
            self.0.push(FieldIssue {
                field,
                message: message.to_string(),
            });
        }
    }

    fn finish(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues: self.0 })
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

pub fn validate_login(input: &LoginInput) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    issues.check(!input.email.trim().is_empty(), "email", "Email is required.");
    issues.check(
        input.password.trim().chars().count() >= MIN_PASSWORD_LEN,
        "password",
        "Password must be at least 8 characters long",
    );
    issues.finish()
}

pub fn validate_register(input: &RegisterInput) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    issues.check(is_email(input.email.trim()), "email", "Invalid email address");
    let firstname = input.firstname.trim();
    issues.check(
        !firstname.is_empty() && is_letters(firstname),
        "firstname",
        "First name can only contain letters.",
    );
    let lastname = input.lastname.trim();
    issues.check(
        !lastname.is_empty() && is_letters(lastname),
        "lastname",
        "Last name can only contain letters.",
    );
    issues.check(
        input.password.trim().chars().count() >= MIN_PASSWORD_LEN,
        "password",
        "Password must be at least 8 characters long",
    );
    issues.check(
        input.confirmed_password.trim().chars().count() >= MIN_PASSWORD_LEN,
        "confirmedPassword",
        "Confirm password must be at least 8 characters long",
    );
    issues.check(
        input.password == input.confirmed_password,
        "confirmedPassword",
        "Passwords do not match",
    );
    issues.finish()
}

fn is_letters(value: &str) -> bool {
    value.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.contains(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

// ============================================================================
// Catalog
// ============================================================================

/// Category creation form, sent as multipart.
#[derive(Debug, Clone)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub thumbnail: FilePart,
}

impl NewCategory {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Issues::default();
        check_text(&mut issues, "name", &self.name, 1, MAX_NAME_LEN);
        check_text(
            &mut issues,
            "description",
            &self.description,
            1,
            MAX_DESCRIPTION_LEN,
        );
        check_image(&mut issues, "thumbnailImg", &self.thumbnail);
        issues.finish()
    }

    pub fn to_multipart(&self) -> MultipartBody {
        MultipartBody::new()
            .text("name", self.name.trim())
            .text("description", self.description.trim())
            .file(FilePart {
                field: "thumbnailImg".to_string(),
                ..self.thumbnail.clone()
            })
    }
}

/// Product creation form, sent as multipart.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub quantity: u32,
    pub category_id: i64,
    pub is_featured: bool,
    pub thumbnail: FilePart,
    pub images: Vec<FilePart>,
}

impl NewProduct {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Issues::default();
        check_text(&mut issues, "name", &self.name, 1, MAX_NAME_LEN);
        check_text(
            &mut issues,
            "description",
            &self.description,
            1,
            MAX_DESCRIPTION_LEN,
        );
        issues.check(
            self.price.is_finite() && self.price >= 1.0,
            "price",
            "Price must be at least 1.",
        );
        issues.check(self.quantity >= 1, "quantity", "Quantity must be at least 1.");
        check_image(&mut issues, "thumbnailImg", &self.thumbnail);
        issues.check(
            self.images.len() <= MAX_PRODUCT_IMAGES,
            "images",
            "At most 2 additional images are allowed.",
        );
        for image in &self.images {
            check_image(&mut issues, "images", image);
        }
        issues.finish()
    }

    pub fn to_multipart(&self) -> MultipartBody {
        let mut body = MultipartBody::new()
            .text("name", self.name.trim())
            .text("price", self.price.to_string())
            .text("description", self.description.trim())
            .text("isFeatured", self.is_featured.to_string())
            .text("categoryId", self.category_id.to_string())
            .text("quantity", self.quantity.to_string())
            .file(FilePart {
                field: "thumbnailImg".to_string(),
                ..self.thumbnail.clone()
            });
        for image in &self.images {
            body = body.file(FilePart {
                field: "images".to_string(),
                ..image.clone()
            });
        }
        body
    }
}

/// Category detail edits; the name rule is stricter than on creation.
pub fn validate_category_update(
    name: Option<&str>,
    description: Option<&str>,
) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    if let Some(name) = name {
        check_text(&mut issues, "name", name, 10, MAX_NAME_LEN);
    }
    if let Some(description) = description {
        check_text(&mut issues, "description", description, 0, MAX_DESCRIPTION_LEN);
    }
    issues.finish()
}

pub fn validate_image(field: &'static str, image: &FilePart) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    check_image(&mut issues, field, image);
    issues.finish()
}

pub fn validate_rating(input: &CreateRatingDto) -> Result<(), ValidationError> {
    let mut issues = Issues::default();
    issues.check(
        (1..=5).contains(&input.stars),
        "stars",
        "Rating must be between 1 and 5 stars.",
    );
    if let Some(comment) = &input.comment {
        check_text(&mut issues, "comment", comment, 0, MAX_DESCRIPTION_LEN);
    }
    issues.finish()
}

fn check_text(issues: &mut Issues, field: &'static str, value: &str, min: usize, max: usize) {
    let len = value.trim().chars().count();
    if len < min {
        issues.check(
            false,
            field,
            &format!("Must contain at least {min} character(s)"),
        );
    } else if len > max {
        issues.check(
            false,
            field,
            &format!("Must contain at most {max} character(s)"),
        );
    }
}

fn check_image(issues: &mut Issues, field: &'static str, image: &FilePart) {
    issues.check(
        image.bytes.len() <= MAX_IMAGE_BYTES,
        field,
        "Image size must be less than 5MB.",
    );
    let accepted = image
        .content_type
        .as_deref()
        .is_some_and(|content_type| ACCEPTED_IMAGE_TYPES.contains(&content_type));
    issues.check(
        accepted,
        field,
        "Only .jpg, .jpeg, .png and .webp formats are supported.",
    );
}
