use std::sync::Arc;

use sample_tracker::app;
use sample_tracker::config::Config;
use sample_tracker::database::Database;
use sample_tracker::mailer::{LogNotifier, Mailer, Notifier};
use sample_tracker::tracker::Tracker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let db = Database::open(&config.db_path)?;

    let notifier: Arc<dyn Notifier> = if config.mail_enabled() {
        Arc::new(Mailer::new(&config)?)
    } else {
        log::warn!("TRACKER_SENDER_MAIL is not set; notifications will only be logged");
        Arc::new(LogNotifier)
    };

    let tracker = Tracker::new(db, notifier, config.admin_mail.clone());
    tracker.ensure_default_admin(&config.admin_password)?;

    // Start the web application
    app::run(config.bind, tracker).await?;

    Ok(())
}
