/*!
# Sample Tracker

A web service tracking vehicle samples through conformity inspection.

## Overview

Each record is an application for a vehicle type. An operator selects a
physical sample by attaching its chassis number (VIN), which sends the record
for testing; the test outcome later closes it. Users are grouped by region
and notified by email when work arrives for them.

## Duplicate protection

- A chassis number can be attached to one record only. This cannot be
  overridden and is enforced by the database as well.
- Records sharing company, brand and vehicle type are reported before a
  chassis assignment or an import goes ahead. The operator may confirm and
  proceed.

## Architecture

### Domain
- **record**: records, statuses and display columns
- **user**: accounts, roles and regions
- **workflow**: chassis assignment, status transitions and import planning
- **tracker**: permission checks and notifications around the workflow

### Storage
- **database**: SQLite repository for records and accounts

### Input / output
- **loader**: CSV and XLSX import parsing
- **downloader**: CSV and XLSX export
- **mailer**: notification templates and SMTP delivery

### Web (feature `web`)
- **login**: password hashing, sessions and the authentication middleware
- **app**: routing and JSON handlers

## REST API Endpoints

- `/login`, `/signup`, `/logout` - Session management
- `/guide` - User guide download
- `/api/records` - List (`?q=` search) and create records
- `/api/records/{id}/chassis` - Assign a chassis number
- `/api/records/{id}/status` - Record a test outcome
- `/api/records/import` - Bulk import from `.xlsx` or `.csv`
- `/api/records/export.xlsx`, `/api/records/export.csv` - Export
- `/api/admin/...` - Account approval and deletion requests
*/

pub mod config;
pub mod database;
pub mod downloader;
pub mod error;
pub mod loader;
pub mod login;
pub mod mailer;
pub mod record;
pub mod tracker;
pub mod user;
pub mod workflow;

#[cfg(feature = "web")]
pub mod app;

pub use error::{TrackerError, TrackerResult};
pub use record::{NewRecord, Record, RecordStatus};
pub use tracker::Tracker;
pub use user::{Role, User};
pub use workflow::AssignOutcome;
