use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regions an operator can be responsible for
pub const REGIONS: [&str; 6] = ["Ankara", "İstanbul", "İzmir", "Bursa", "Kocaeli", "Other"];

/// Responsible region of accounts that oversee every region
pub const ALL_REGIONS: &str = "All";

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

/// Look up the canonical spelling of a region name
///
/// Matching ignores case and Turkish diacritics, so `istanbul` and
/// `ISTANBUL` both resolve to `İstanbul`.
///
/// # Examples
/// ```
/// use sample_tracker::user::canonical_region;
///
/// assert_eq!(canonical_region(" izmir "), Some("İzmir"));
/// assert_eq!(canonical_region("Atlantis"), None);
/// ```
pub fn canonical_region(name: &str) -> Option<&'static str> {
    let wanted = fold_turkish(name);
    REGIONS
        .iter()
        .copied()
        .find(|region| fold_turkish(region) == wanted)
}

/// Trim, lower-case and strip Turkish diacritics
pub(crate) fn fold_turkish(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            'İ' | 'I' | 'ı' => 'i',
            'Ş' | 'ş' => 's',
            'Ğ' | 'ğ' => 'g',
            'Ü' | 'ü' => 'u',
            'Ö' | 'ö' => 'o',
            'Ç' | 'ç' => 'c',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

/// Rough shape check for an email address
pub fn looks_like_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Operator,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            // Accounts created by the first deployment carry the old label
            "operator" | "kullanici" => Ok(Role::Operator),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// A registered account (a row of `kullanicilar`)
///
/// The password hash is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub email: Option<String>,
    pub responsible_region: String,
    /// Unapproved accounts cannot log in
    pub approved: bool,
    pub bulk_import_permission: bool,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_bulk_import(&self) -> bool {
        self.is_admin() || self.bulk_import_permission
    }

    pub fn oversees_all_regions(&self) -> bool {
        self.is_admin() || self.responsible_region == ALL_REGIONS
    }

    /// Whether a record in `region` created by `created_by` is in this user's scope
    pub fn can_see(&self, region: &str, created_by: Option<&str>) -> bool {
        self.oversees_all_regions()
            || self.responsible_region == region
            || created_by == Some(self.username.as_str())
    }
}

/// Registration data for a self-service sign up
#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub region: String,
}
