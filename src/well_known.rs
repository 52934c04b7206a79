//! The "well-known service" lookup (spec §1): maps a service name to a
//! `{host, port, secure}` triple. A small, representative static table rather
//! than an exhaustive provider list, since the merge policy (left-preserving,
//! explicit options win) is what the pool's correctness depends on, not table
//! coverage.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Connection defaults supplied by a named service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WellKnown {
    pub host: &'static str,
    pub port: u16,
    pub secure: bool,
}

static TABLE: Lazy<HashMap<&'static str, WellKnown>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("Gmail", WellKnown { host: "smtp.gmail.com", port: 465, secure: true });
    m.insert("Outlook365", WellKnown { host: "smtp.office365.com", port: 587, secure: false });
    m.insert("Yahoo", WellKnown { host: "smtp.mail.yahoo.com", port: 465, secure: true });
    m.insert("SES-US-EAST-1", WellKnown { host: "email-smtp.us-east-1.amazonaws.com", port: 465, secure: true });
    m.insert("SendGrid", WellKnown { host: "smtp.sendgrid.net", port: 587, secure: false });
    m.insert("Mailgun", WellKnown { host: "smtp.mailgun.org", port: 465, secure: true });
    m.insert("Zoho", WellKnown { host: "smtp.zoho.com", port: 465, secure: true });
    m
});

/// Look up a service by name, case-insensitively.
pub fn lookup(name: &str) -> Option<WellKnown> {
    TABLE
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("gmail"), lookup("Gmail"));
        assert!(lookup("gmail").is_some());
    }

    #[test]
    fn unknown_service_is_none() {
        assert!(lookup("not-a-real-service").is_none());
    }
}
