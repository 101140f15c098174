#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use sample_tracker::database::Database;
use sample_tracker::mailer::{Notice, Notifier};
use sample_tracker::record::{NewRecord, Record};
use sample_tracker::tracker::Tracker;
use sample_tracker::user::{Role, User};

pub const ADMIN_MAIL: &str = "admin@example.com";

/// Notifier that keeps every notice for inspection
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<Notice> {
        self.sent().into_iter().filter(|n| n.to == address).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.sent.lock().unwrap().push(notice);
    }
}

/// A tracker over an empty in-memory database with a seeded administrator
pub fn tracker() -> (Tracker, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let db = Database::open_in_memory().expect("in-memory database");
    let tracker = Tracker::new(db, notifier.clone(), Some(ADMIN_MAIL.to_string()));
    tracker
        .ensure_default_admin("admin123")
        .expect("seed administrator");
    (tracker, notifier)
}

pub fn admin(tracker: &Tracker) -> User {
    tracker
        .database()
        .find_user("admin")
        .unwrap()
        .expect("default administrator exists")
}

/// Insert an approved operator without going through registration
pub fn operator(tracker: &Tracker, username: &str, region: &str, bulk_import: bool) -> User {
    tracker
        .database()
        .insert_user(
            username,
            "not-a-real-hash",
            Role::Operator,
            Some(&format!("{}@example.com", username)),
            region,
            true,
            bulk_import,
        )
        .expect("insert operator")
}

pub fn new_record(company: &str, brand: Option<&str>, vehicle_type: &str) -> NewRecord {
    NewRecord {
        company_name: company.to_string(),
        brand: brand.map(str::to_string),
        vehicle_type: vehicle_type.to_string(),
        ..NewRecord::default()
    }
}

/// Create a record awaiting a chassis number in `region`
pub fn record_in(
    tracker: &Tracker,
    region: &str,
    company: &str,
    brand: Option<&str>,
    vehicle_type: &str,
) -> Record {
    let actor = admin(tracker);
    let mut new = new_record(company, brand, vehicle_type);
    new.region = Some(region.to_string());
    tracker.create_record(&actor, new).expect("create record")
}
