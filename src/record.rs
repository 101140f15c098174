use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stage of a vehicle sample in the inspection process
///
/// `AwaitingChassis -> SentForTesting -> {CompletedPositive, CompletedNegative, Rejected}`.
/// An application may also be rejected straight from `AwaitingChassis`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    AwaitingChassis,
    SentForTesting,
    CompletedPositive,
    CompletedNegative,
    Rejected,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::AwaitingChassis,
        RecordStatus::SentForTesting,
        RecordStatus::CompletedPositive,
        RecordStatus::CompletedNegative,
        RecordStatus::Rejected,
    ];

    /// Stable identifier stored in the `durum` column
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::AwaitingChassis => "awaiting_chassis",
            RecordStatus::SentForTesting => "sent_for_testing",
            RecordStatus::CompletedPositive => "completed_positive",
            RecordStatus::CompletedNegative => "completed_negative",
            RecordStatus::Rejected => "rejected",
        }
    }

    /// Human readable label used in exports and notifications
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::AwaitingChassis => "Awaiting chassis",
            RecordStatus::SentForTesting => "Sent for testing",
            RecordStatus::CompletedPositive => "Completed - positive",
            RecordStatus::CompletedNegative => "Completed - negative",
            RecordStatus::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecordStatus::CompletedPositive
                | RecordStatus::CompletedNegative
                | RecordStatus::Rejected
        )
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown record status: {}", s))
    }
}

/// One vehicle-sample tracking entry (a row of `denetimler`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub application_no: Option<String>,
    pub company_name: String,
    pub brand: Option<String>,
    pub vehicle_category: Option<String>,
    pub vehicle_type: String,
    pub variant: Option<String>,
    pub version: Option<String>,
    pub trade_name: Option<String>,
    /// Customs tariff (GTIP) code
    pub gtip_no: Option<String>,
    pub unit: Option<String>,
    pub country_of_origin: Option<String>,
    pub vehicle_count: Option<String>,
    /// Unique across all records once assigned
    pub chassis_no: Option<String>,
    pub submitted_date: Option<NaiveDate>,
    pub selection_date: Option<NaiveDate>,
    pub region: String,
    pub status: RecordStatus,
    pub notes: Option<String>,
    pub updated_at: Option<NaiveDateTime>,
    pub created_by: Option<String>,
    pub deletion_requested: bool,
    pub deletion_reason: Option<String>,
}

/// Column names of [`Record::display_values`], in order
pub const DISPLAY_COLUMNS: [&str; 23] = [
    "chassis_no",
    "status",
    "selection_date",
    "days_elapsed",
    "brand",
    "vehicle_type",
    "company_name",
    "vehicle_category",
    "unit",
    "region",
    "id",
    "application_no",
    "variant",
    "version",
    "trade_name",
    "gtip_no",
    "country_of_origin",
    "vehicle_count",
    "submitted_date",
    "notes",
    "updated_at",
    "created_by",
    "deletion_reason",
];

impl Record {
    /// Days elapsed since the sample was selected, if it has been
    pub fn days_since_selection(&self, today: NaiveDate) -> Option<i64> {
        self.selection_date
            .map(|selected| (today - selected).num_days())
    }

    /// Column values in display order, used by search and export
    pub fn display_values(&self, today: NaiveDate) -> Vec<(&'static str, String)> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
        let date = |d: &Option<NaiveDate>| {
            d.map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        };

        let values = [
            opt(&self.chassis_no),
            self.status.label().to_string(),
            date(&self.selection_date),
            self.days_since_selection(today)
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
            opt(&self.brand),
            self.vehicle_type.clone(),
            self.company_name.clone(),
            opt(&self.vehicle_category),
            opt(&self.unit),
            self.region.clone(),
            self.id.to_string(),
            opt(&self.application_no),
            opt(&self.variant),
            opt(&self.version),
            opt(&self.trade_name),
            opt(&self.gtip_no),
            opt(&self.country_of_origin),
            opt(&self.vehicle_count),
            date(&self.submitted_date),
            opt(&self.notes),
            self.updated_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
            opt(&self.created_by),
            opt(&self.deletion_reason),
        ];

        DISPLAY_COLUMNS.iter().copied().zip(values).collect()
    }

    /// Case-insensitive substring match against every displayed column
    pub fn matches_query(&self, query: &str, today: NaiveDate) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.display_values(today)
            .iter()
            .any(|(_, value)| value.to_lowercase().contains(&needle))
    }
}

/// Fields supplied when a record is entered by hand or imported
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewRecord {
    pub application_no: Option<String>,
    pub company_name: String,
    pub brand: Option<String>,
    pub vehicle_category: Option<String>,
    pub vehicle_type: String,
    pub variant: Option<String>,
    pub version: Option<String>,
    pub trade_name: Option<String>,
    pub gtip_no: Option<String>,
    pub unit: Option<String>,
    pub country_of_origin: Option<String>,
    pub vehicle_count: Option<String>,
    pub submitted_date: Option<NaiveDate>,
    pub region: Option<String>,
    pub notes: Option<String>,
}

impl NewRecord {
    /// Trim every text field and turn blank optionals into `None`
    pub fn normalized(mut self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.application_no = clean(self.application_no);
        self.company_name = self.company_name.trim().to_string();
        self.brand = clean(self.brand);
        self.vehicle_category = clean(self.vehicle_category);
        self.vehicle_type = self.vehicle_type.trim().to_string();
        self.variant = clean(self.variant);
        self.version = clean(self.version);
        self.trade_name = clean(self.trade_name);
        self.gtip_no = clean(self.gtip_no);
        self.unit = clean(self.unit);
        self.country_of_origin = clean(self.country_of_origin);
        self.vehicle_count = clean(self.vehicle_count);
        self.region = clean(self.region);
        self.notes = clean(self.notes);
        self
    }

    /// Names of required fields that are empty
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.company_name.trim().is_empty() {
            missing.push("company_name");
        }
        if self.vehicle_type.trim().is_empty() {
            missing.push("vehicle_type");
        }
        missing
    }
}

/// Normalise a chassis number as typed by an operator
pub fn normalize_chassis(chassis_no: &str) -> String {
    chassis_no.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        Record {
            id: 7,
            application_no: Some("APP-7".to_string()),
            company_name: "Acme".to_string(),
            brand: Some("X".to_string()),
            vehicle_category: None,
            vehicle_type: "T1".to_string(),
            variant: None,
            version: None,
            trade_name: None,
            gtip_no: None,
            unit: None,
            country_of_origin: None,
            vehicle_count: None,
            chassis_no: Some("VIN1".to_string()),
            submitted_date: None,
            selection_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            region: "Ankara".to_string(),
            status: RecordStatus::SentForTesting,
            notes: None,
            updated_at: None,
            created_by: Some("admin".to_string()),
            deletion_requested: false,
            deletion_reason: None,
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in RecordStatus::ALL {
            assert_eq!(status.as_str().parse::<RecordStatus>(), Ok(status));
        }
        assert!("teste_gonderildi".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn days_since_selection_counts_calendar_days() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert_eq!(record().days_since_selection(today), Some(22));

        let mut waiting = record();
        waiting.selection_date = None;
        assert_eq!(waiting.days_since_selection(today), None);
    }

    #[test]
    fn search_covers_displayed_columns() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let r = record();
        assert!(r.matches_query("vin1", today));
        assert!(r.matches_query("sent for", today));
        assert!(r.matches_query("  ", today));
        assert!(!r.matches_query("bursa", today));
    }

    #[test]
    fn display_values_follow_column_order() {
        let today = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let values = record().display_values(today);
        let names: Vec<&str> = values.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, DISPLAY_COLUMNS);
        assert_eq!(values[3].1, "22");
    }

    #[test]
    fn normalised_input_drops_blank_fields() {
        let new = NewRecord {
            company_name: "  Acme ".to_string(),
            brand: Some("   ".to_string()),
            vehicle_type: "T1".to_string(),
            ..NewRecord::default()
        }
        .normalized();
        assert_eq!(new.company_name, "Acme");
        assert_eq!(new.brand, None);
        assert!(new.missing_fields().is_empty());
    }
}
