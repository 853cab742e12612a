use std::env;

use chrono::{FixedOffset, Offset, Utc, Weekday};

/// Scheduling rules of the studio, in studio-local time.
#[derive(Clone, Debug)]
pub struct StudioRules {
    pub utc_offset_minutes: i32,
    pub closed_weekday: Option<Weekday>,
    pub open_hour: u32,
    /// Latest session end, in hours past the booking date's midnight
    /// (27 = 03:00 the next day).
    pub closing_bound_hour: u32,
    pub min_lead_hours: i64,
    pub phone: String,
}

impl Default for StudioRules {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            closed_weekday: Some(Weekday::Mon),
            open_hour: 10,
            closing_bound_hour: 27,
            min_lead_hours: 2,
            phone: "(555) 010-0199".to_string(),
        }
    }
}

impl StudioRules {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[derive(Clone, Debug)]
pub struct AdminAccount {
    pub email: String,
    pub token: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub admins: Vec<AdminAccount>,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub resend_api_key: String,
    pub email_from: String,
    pub admin_email: String,
    pub site_url: String,
    pub studio: StudioRules,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = StudioRules::default();
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "studio.db".to_string()),
            admins: parse_admin_tokens(&env::var("ADMIN_TOKENS").unwrap_or_default()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            resend_api_key: env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Studio Bookings <bookings@example.com>".to_string()),
            admin_email: env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@example.com".to_string()),
            site_url: env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string()),
            studio: StudioRules {
                utc_offset_minutes: env::var("STUDIO_UTC_OFFSET_MINUTES")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.utc_offset_minutes),
                closed_weekday: match env::var("STUDIO_CLOSED_WEEKDAY") {
                    Ok(v) if v.eq_ignore_ascii_case("none") => None,
                    Ok(v) => v.parse::<Weekday>().ok().or(defaults.closed_weekday),
                    Err(_) => defaults.closed_weekday,
                },
                open_hour: env::var("STUDIO_OPEN_HOUR")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.open_hour),
                closing_bound_hour: defaults.closing_bound_hour,
                min_lead_hours: defaults.min_lead_hours,
                phone: env::var("STUDIO_PHONE").unwrap_or(defaults.phone),
            },
        }
    }
}

/// Parses `email=token` pairs separated by commas. Malformed pairs are skipped.
pub fn parse_admin_tokens(raw: &str) -> Vec<AdminAccount> {
    raw.split(',')
        .filter_map(|pair| {
            let (email, token) = pair.trim().split_once('=')?;
            let (email, token) = (email.trim(), token.trim());
            if email.is_empty() || token.is_empty() {
                return None;
            }
            Some(AdminAccount {
                email: email.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admin_tokens() {
        let admins = parse_admin_tokens("ops@studio.com=abc, owner@studio.com = def ,broken,=x");
        assert_eq!(admins.len(), 2);
        assert_eq!(admins[0].email, "ops@studio.com");
        assert_eq!(admins[1].token, "def");
    }

    #[test]
    fn test_parse_admin_tokens_empty() {
        assert!(parse_admin_tokens("").is_empty());
    }
}
