//! Patient records mirrored from the patient service.
//!
//! A [`PatientRecord`] is keyed by the id assigned by the patient service; the
//! provider side never mints ids of its own. Every mutating helper advances
//! `last_updated`, which is the ordering key used when reconciling copies.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use time::Date;

use crate::error::{CoreError, Result};
use crate::time::{Timestamp, iso_date};

/// Lifecycle status of a patient account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    /// Registered, waiting for a provider to review the profile
    #[default]
    Pending,
    /// Activated by a provider
    Active,
    /// Deactivated by a provider
    Inactive,
}

impl AccountStatus {
    /// Returns the wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "PENDING",
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(AccountStatus::Pending),
            "ACTIVE" => Ok(AccountStatus::Active),
            "INACTIVE" => Ok(AccountStatus::Inactive),
            _ => Err(CoreError::invalid_account_status(s)),
        }
    }
}

impl<'de> Deserialize<'de> for AccountStatus {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Status filter accepted by patient listing operations.
///
/// Parsing is case-insensitive, so `"active"` selects [`AccountStatus::Active`].
/// Defaults to the pending queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFilter {
    All,
    Only(AccountStatus),
}

impl StatusFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusFilter::All => "ALL",
            StatusFilter::Only(status) => status.as_str(),
        }
    }

    /// Check whether a record with the given status passes this filter.
    pub fn matches(&self, status: AccountStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => *wanted == status,
        }
    }
}

impl Default for StatusFilter {
    fn default() -> Self {
        StatusFilter::Only(AccountStatus::Pending)
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StatusFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("ALL") {
            return Ok(StatusFilter::All);
        }
        s.parse::<AccountStatus>()
            .map(StatusFilter::Only)
            .map_err(|_| CoreError::invalid_status_filter(s))
    }
}

impl From<AccountStatus> for StatusFilter {
    fn from(status: AccountStatus) -> Self {
        StatusFilter::Only(status)
    }
}

impl Serialize for StatusFilter {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusFilter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Local copy of a patient owned by the patient service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    /// Identity shared with the patient service
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub account_status: AccountStatus,
    #[serde(default, alias = "createdAt", skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<Timestamp>,
    /// Missing or null on the wire means "as of arrival"
    #[serde(default = "Timestamp::now", alias = "updatedAt", deserialize_with = "null_as_now")]
    pub last_updated: Timestamp,

    // Personal information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(
        default,
        with = "iso_date::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_of_birth: Option<Date>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    // Address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    // Medical information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency_contact_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blood_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_medications: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_conditions: Option<String>,

    // Provider assignment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_provider_name: Option<String>,

    #[serde(default, alias = "profileCompleted", deserialize_with = "null_as_default")]
    pub profile_complete: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub activated: bool,
}

/// The patient service serializes absent values as explicit `null`s.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_now<'de, D>(deserializer: D) -> std::result::Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Timestamp>::deserialize(deserializer)?.unwrap_or_else(Timestamp::now))
}

impl PatientRecord {
    /// Create a freshly registered record with no profile details.
    pub fn new(
        id: impl Into<String>,
        email: impl Into<String>,
        account_status: AccountStatus,
        registration_date: Option<Timestamp>,
    ) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            account_status,
            registration_date,
            last_updated: Timestamp::now(),
            first_name: None,
            last_name: None,
            phone: None,
            date_of_birth: None,
            gender: None,
            address: None,
            city: None,
            state: None,
            zip_code: None,
            country: None,
            emergency_contact_name: None,
            emergency_contact_phone: None,
            blood_type: None,
            allergies: None,
            current_medications: None,
            medical_conditions: None,
            assigned_provider_id: None,
            assigned_provider_name: None,
            profile_complete: false,
            activated: false,
        }
    }

    /// Advance `last_updated`, strictly past its previous value.
    pub fn touch(&mut self) {
        let now = Timestamp::now();
        self.last_updated = if now > self.last_updated {
            now
        } else {
            Timestamp::new(self.last_updated.into_inner() + time::Duration::microseconds(1))
        };
    }

    /// Display name, falling back to the email address.
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            _ => self.email.clone(),
        }
    }

    /// Fields a provider must fill before the account can be activated.
    pub fn has_required_info(&self) -> bool {
        self.first_name.is_some()
            && self.last_name.is_some()
            && self.phone.is_some()
            && self.emergency_contact_name.is_some()
            && self.emergency_contact_phone.is_some()
    }

    pub fn refresh_profile_complete(&mut self) {
        self.profile_complete = self.has_required_info();
        self.touch();
    }

    pub fn set_status(&mut self, status: AccountStatus) {
        self.account_status = status;
        self.activated = status == AccountStatus::Active;
        self.touch();
    }

    pub fn assign_provider(&mut self, provider_id: impl Into<String>, provider_name: Option<String>) {
        self.assigned_provider_id = Some(provider_id.into());
        self.assigned_provider_name = provider_name;
        self.touch();
    }

    /// Merge every non-null field of `update` into the record.
    ///
    /// Returns the fields that were applied, keyed by their wire name.
    pub fn apply_profile_update(&mut self, update: &ProfileUpdate) -> Map<String, Value> {
        let mut changed = Map::new();

        let string_fields: [(&mut Option<String>, &Option<String>, &str); 15] = [
            (&mut self.first_name, &update.first_name, "firstName"),
            (&mut self.last_name, &update.last_name, "lastName"),
            (&mut self.phone, &update.phone, "phone"),
            (&mut self.gender, &update.gender, "gender"),
            (&mut self.address, &update.address, "address"),
            (&mut self.city, &update.city, "city"),
            (&mut self.state, &update.state, "state"),
            (&mut self.zip_code, &update.zip_code, "zipCode"),
            (&mut self.country, &update.country, "country"),
            (
                &mut self.emergency_contact_name,
                &update.emergency_contact_name,
                "emergencyContactName",
            ),
            (
                &mut self.emergency_contact_phone,
                &update.emergency_contact_phone,
                "emergencyContactPhone",
            ),
            (&mut self.blood_type, &update.blood_type, "bloodType"),
            (&mut self.allergies, &update.allergies, "allergies"),
            (
                &mut self.current_medications,
                &update.current_medications,
                "currentMedications",
            ),
            (
                &mut self.medical_conditions,
                &update.medical_conditions,
                "medicalConditions",
            ),
        ];
        for (target, incoming, wire_name) in string_fields {
            if let Some(value) = incoming {
                *target = Some(value.clone());
                changed.insert(wire_name.to_string(), Value::String(value.clone()));
            }
        }

        if let Some(dob) = update.date_of_birth {
            self.date_of_birth = Some(dob);
            changed.insert(
                "dateOfBirth".to_string(),
                Value::String(format!(
                    "{:04}-{:02}-{:02}",
                    dob.year(),
                    u8::from(dob.month()),
                    dob.day()
                )),
            );
        }

        if !changed.is_empty() {
            self.touch();
        }
        changed
    }
}

/// Profile fields a provider may fill in; `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, with = "iso_date::option")]
    pub date_of_birth: Option<Date>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub emergency_contact_name: Option<String>,
    #[serde(default)]
    pub emergency_contact_phone: Option<String>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub allergies: Option<String>,
    #[serde(default)]
    pub current_medications: Option<String>,
    #[serde(default)]
    pub medical_conditions: Option<String>,
}
