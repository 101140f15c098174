use handlebars::{Handlebars, html_escape};
use lazy_static::lazy_static;
use serde::Serialize;
#[cfg(feature = "web")]
use std::error::Error;
#[cfg(feature = "web")]
use std::thread;

#[cfg(feature = "web")]
use crate::config::Config;
#[cfg(feature = "web")]
use lettre::message::header::ContentType;
#[cfg(feature = "web")]
use lettre::transport::smtp::authentication::Credentials;
#[cfg(feature = "web")]
use lettre::transport::smtp::client::{Tls, TlsParameters};
#[cfg(feature = "web")]
use lettre::{Message, SmtpTransport, Transport};

const MAIL_TEMPLATE: &str =
    "<html><body><h3>{{heading}}</h3><p>{{{content}}}</p></body></html>";

lazy_static! {
    static ref TEMPLATES: Handlebars<'static> = {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        if let Err(e) = registry.register_template_string("mail", MAIL_TEMPLATE) {
            log::error!("mail template is invalid: {}", e);
        }
        registry
    };
}

/// A notification email waiting to be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub to: String,
    pub subject: String,
    /// HTML fragment placed in the body paragraph
    pub content: String,
}

impl Notice {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, content: impl Into<String>) -> Self {
        Notice {
            to: to.into(),
            subject: subject.into(),
            content: content.into(),
        }
    }

    /// Render the full HTML document sent as the message body
    pub fn render_html(&self) -> String {
        #[derive(Serialize)]
        struct MailContext<'a> {
            heading: &'a str,
            content: &'a str,
        }

        let context = MailContext {
            heading: "Sample Tracker Notification",
            content: &self.content,
        };
        TEMPLATES.render("mail", &context).unwrap_or_else(|e| {
            log::warn!("failed to render mail template: {}", e);
            format!("<html><body><p>{}</p></body></html>", self.content)
        })
    }
}

/// Escape user-supplied text before placing it inside a notice
pub fn escape(text: &str) -> String {
    html_escape(text)
}

/// Delivery of notification emails
///
/// Implementations must not block the caller on network I/O and must never
/// fail the write that triggered the notice; delivery problems are logged.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Notifier used when no mail account is configured: logs each notice
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notice: Notice) {
        log::info!(
            "mail delivery disabled; would send '{}' to {}",
            notice.subject,
            notice.to
        );
    }
}

/// SMTP mailer sending HTML notices over implicit TLS
///
/// Each notice is delivered on its own thread; failures are logged and dropped.
#[cfg(feature = "web")]
#[derive(Clone)]
pub struct Mailer {
    smtp: SmtpTransport,
    sender: String,
}

#[cfg(feature = "web")]
impl Mailer {
    pub fn new(config: &Config) -> Result<Self, Box<dyn Error>> {
        let sender = config
            .sender_mail
            .clone()
            .ok_or("No sender mail account configured")?;
        let password = config.sender_password.clone().unwrap_or_default();

        let creds = Credentials::new(sender.clone(), password);
        let tls_parameters = TlsParameters::new(config.smtp_host.clone())?;

        let smtp = SmtpTransport::relay(&config.smtp_host)?
            .credentials(creds)
            .port(config.smtp_port)
            .tls(Tls::Wrapper(tls_parameters))
            .build();

        Ok(Mailer { smtp, sender })
    }

    /// Send a notice synchronously
    pub fn send(&self, notice: &Notice) -> Result<(), Box<dyn Error>> {
        let email = Message::builder()
            .from(format!("Sample Tracker <{}>", self.sender).parse()?)
            .to(notice.to.parse()?)
            .subject(notice.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(notice.render_html())?;

        self.smtp.send(&email)?;
        Ok(())
    }
}

#[cfg(feature = "web")]
impl Notifier for Mailer {
    fn notify(&self, notice: Notice) {
        let mailer = self.clone();
        thread::spawn(move || {
            if let Err(e) = mailer.send(&notice) {
                log::warn!("failed to send '{}' to {}: {}", notice.subject, notice.to, e);
            } else {
                log::debug!("sent '{}' to {}", notice.subject, notice.to);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_renders_into_template() {
        let notice = Notice::new("a@example.com", "Hello", "<b>3</b> new record(s)");
        let html = notice.render_html();
        assert!(html.starts_with("<html><body><h3>Sample Tracker Notification</h3>"));
        assert!(html.contains("<p><b>3</b> new record(s)</p>"));
    }

    #[test]
    fn user_text_is_escaped() {
        assert_eq!(escape("<script>"), "&lt;script&gt;");
    }
}
