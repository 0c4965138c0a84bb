use std::collections::BTreeMap;

use axum::body::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{CommentForm, PostForm, UserForm, UserProfileInfoForm};

pub const TITLE_MAX_LENGTH: usize = 200;
pub const COMMENT_AUTHOR_MAX_LENGTH: usize = 200;
pub const NAME_MAX_LENGTH: usize = 150;
pub const EMAIL_MAX_LENGTH: usize = 254;
pub const URL_MAX_LENGTH: usize = 200;

pub const REQUIRED: &str = "This field is required.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const INVALID_URL: &str = "Enter a valid URL.";
pub const INVALID_USERNAME: &str = "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters.";
pub const DUPLICATE_USERNAME: &str = "A user with that username already exists.";
pub const INVALID_IMAGE: &str = "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

lazy_static! {
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[\w.@+-]+$").unwrap();
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9._%+-]*@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$"
    )
    .unwrap();
}

/// FormErrors
///
/// Field name to error messages, in field order. Empty means the form is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct FormErrors(BTreeMap<String, Vec<String>>);

impl FormErrors {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn merge(&mut self, other: FormErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    fn into_result<T>(self, cleaned: T) -> Result<T, FormErrors> {
        if self.is_empty() { Ok(cleaned) } else { Err(self) }
    }
}

fn max_length_message(max: usize, actual: usize) -> String {
    format!("Ensure this value has at most {max} characters (it has {actual}).")
}

fn check_required(errors: &mut FormErrors, field: &str, value: &str) {
    if value.is_empty() {
        errors.add(field, REQUIRED);
    }
}

fn check_max_length(errors: &mut FormErrors, field: &str, value: &str, max: usize) {
    let len = value.chars().count();
    if len > max {
        errors.add(field, max_length_message(max, len));
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_REGEX.is_match(value)
}

/// Normalizes a portfolio address, assuming `http://` when no scheme is given.
/// Returns `None` for anything that is not an absolute http(s) URL with a host.
pub fn normalize_url(value: &str) -> Option<String> {
    let candidate = if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{value}")
    };

    let parsed = url::Url::parse(&candidate).ok()?;
    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    let host_ok = parsed.host_str().is_some_and(|h| !h.is_empty());
    if scheme_ok && host_ok { Some(candidate) } else { None }
}

impl PostForm {
    /// Trims the fields and checks them against the post columns.
    pub fn clean(&self) -> Result<PostForm, FormErrors> {
        let cleaned = PostForm {
            title: self.title.trim().to_string(),
            text: self.text.trim().to_string(),
        };

        let mut errors = FormErrors::default();
        check_required(&mut errors, "title", &cleaned.title);
        check_max_length(&mut errors, "title", &cleaned.title, TITLE_MAX_LENGTH);
        check_required(&mut errors, "text", &cleaned.text);
        errors.into_result(cleaned)
    }
}

impl CommentForm {
    pub fn clean(&self) -> Result<CommentForm, FormErrors> {
        let cleaned = CommentForm {
            author: self.author.trim().to_string(),
            text: self.text.trim().to_string(),
        };

        let mut errors = FormErrors::default();
        check_required(&mut errors, "author", &cleaned.author);
        check_max_length(&mut errors, "author", &cleaned.author, COMMENT_AUTHOR_MAX_LENGTH);
        check_required(&mut errors, "text", &cleaned.text);
        errors.into_result(cleaned)
    }
}

impl UserForm {
    /// Validates the account fields. The password is kept verbatim.
    pub fn clean(&self) -> Result<UserForm, FormErrors> {
        let cleaned = UserForm {
            username: self.username.trim().to_string(),
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            botcatcher: self.botcatcher.clone(),
        };

        let mut errors = FormErrors::default();

        check_required(&mut errors, "username", &cleaned.username);
        check_max_length(&mut errors, "username", &cleaned.username, NAME_MAX_LENGTH);
        if !cleaned.username.is_empty() && !USERNAME_REGEX.is_match(&cleaned.username) {
            errors.add("username", INVALID_USERNAME);
        }

        check_max_length(&mut errors, "first_name", &cleaned.first_name, NAME_MAX_LENGTH);
        check_max_length(&mut errors, "last_name", &cleaned.last_name, NAME_MAX_LENGTH);

        if !cleaned.email.is_empty() {
            check_max_length(&mut errors, "email", &cleaned.email, EMAIL_MAX_LENGTH);
            if !is_valid_email(&cleaned.email) {
                errors.add("email", INVALID_EMAIL);
            }
        }

        check_required(&mut errors, "password", &cleaned.password);

        // Honeypot: any content at all marks the submission as automated.
        check_max_length(&mut errors, "botcatcher", &cleaned.botcatcher, 0);

        errors.into_result(cleaned)
    }
}

impl UserProfileInfoForm {
    pub fn clean(&self) -> Result<UserProfileInfoForm, FormErrors> {
        let site = self.portfolio_site.trim();
        let mut errors = FormErrors::default();

        let portfolio_site = if site.is_empty() {
            String::new()
        } else {
            match normalize_url(site) {
                Some(url) => {
                    check_max_length(&mut errors, "portfolio_site", &url, URL_MAX_LENGTH);
                    url
                }
                None => {
                    errors.add("portfolio_site", INVALID_URL);
                    site.to_string()
                }
            }
        };

        errors.into_result(UserProfileInfoForm { portfolio_site })
    }
}

/// UploadedFile
///
/// A file part received in a multipart submission.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl UploadedFile {
    /// Lower-cased extension of the submitted file name, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(std::ffi::OsStr::to_str)
            .map(str::to_ascii_lowercase)
    }

    /// Checks that the upload really is one of the accepted image formats: the
    /// declared type, the extension and the leading signature bytes must all agree.
    pub fn validate_image(&self) -> Result<(), FormErrors> {
        let extension_ok = self
            .extension()
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        let type_ok = self.content_type.starts_with("image/");

        if extension_ok && type_ok && has_image_signature(&self.data) {
            Ok(())
        } else {
            let mut errors = FormErrors::default();
            errors.add("profile_picture", INVALID_IMAGE);
            Err(errors)
        }
    }
}

fn has_image_signature(data: &[u8]) -> bool {
    data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])
        || data.starts_with(&[0xFF, 0xD8, 0xFF])
        || data.starts_with(b"GIF87a")
        || data.starts_with(b"GIF89a")
        || data.starts_with(b"BM")
        || (data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP")
}
