//! SMS dispatch through the server-side messaging function.
//!
//! Provider credentials never reach this process: messages are posted to a
//! function that only accepts an authenticated user token. The function
//! substitutes `{name}` per recipient and charges one credit per message
//! segment per recipient.

use crate::error::{Error, Result};
use crate::models::{Member, MemberStatus};
use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Placeholder replaced with each recipient's name.
pub const NAME_PLACEHOLDER: &str = "{name}";

const GSM7_SINGLE: usize = 160;
const GSM7_PART: usize = 153;
const UCS2_SINGLE: usize = 70;
const UCS2_PART: usize = 67;

/// Characters of the GSM 03.38 default alphabet (basic table).
const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
/// Characters that take two septets (escape + char).
const GSM7_EXTENDED: &str = "^{}\\[~]|€\u{000C}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SmsKind {
    #[default]
    General,
    Birthday,
    FollowUp,
    Welcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub phone: String,
}

impl From<&Member> for Recipient {
    fn from(member: &Member) -> Self {
        Self {
            name: member.name.clone(),
            phone: member.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmsRequest {
    pub recipients: Vec<Recipient>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: SmsKind,
}

impl SmsRequest {
    pub fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(Error::validation("message", "is required"));
        }
        if self.recipients.is_empty() {
            return Err(Error::validation("recipients", "at least one recipient is required"));
        }
        if let Some(r) = self.recipients.iter().find(|r| r.phone.trim().is_empty()) {
            return Err(Error::validation("phone", format!("{} has no phone number", r.name)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsResult {
    pub phone: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub sent: u32,
    #[serde(default)]
    pub failed: u32,
    #[serde(default)]
    pub credits_used: u32,
    #[serde(default)]
    pub new_balance: Option<i64>,
    #[serde(default)]
    pub results: Vec<SmsResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Client for the messaging function.
pub struct SmsClient {
    http: Client,
    function_url: String,
}

impl SmsClient {
    pub fn new(function_url: &str, timeout_seconds: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;
        Ok(Self {
            http,
            function_url: function_url.to_string(),
        })
    }

    /// Send `request` on behalf of the user holding `access_token`.
    ///
    /// Not retried: a repeated call could deliver the messages twice.
    pub async fn send(&self, access_token: &str, request: &SmsRequest) -> Result<SmsResponse> {
        request.validate()?;
        info!(
            recipients = request.recipients.len(),
            estimated_credits = estimate_credits(request),
            "Dispatching SMS"
        );

        let response = self
            .http
            .post(&self.function_url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let parsed: SmsResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(Error::from_status(status.as_u16(), None, body));
            }
            Err(e) => return Err(e.into()),
        };

        if !status.is_success() || !parsed.success {
            let message = parsed
                .error
                .unwrap_or_else(|| format!("dispatch returned status {}", status));
            return match status.as_u16() {
                401 | 403 => Err(Error::Unauthorized),
                _ => Err(Error::Sms(message)),
            };
        }

        if parsed.failed > 0 {
            warn!(sent = parsed.sent, failed = parsed.failed, "Some messages were not delivered");
        }
        Ok(parsed)
    }
}

/// The text a recipient will receive.
pub fn personalize(message: &str, name: &str) -> String {
    message.replace(NAME_PLACEHOLDER, name)
}

fn is_gsm7(text: &str) -> bool {
    text.chars()
        .all(|c| GSM7_BASIC.contains(c) || GSM7_EXTENDED.contains(c))
}

/// Number of segments needed to deliver `text`.
pub fn segments(text: &str) -> u32 {
    let (length, single, part) = if is_gsm7(text) {
        let septets = text
            .chars()
            .map(|c| if GSM7_EXTENDED.contains(c) { 2 } else { 1 })
            .sum::<usize>();
        (septets, GSM7_SINGLE, GSM7_PART)
    } else {
        let units = text.chars().map(char::len_utf16).sum::<usize>();
        (units, UCS2_SINGLE, UCS2_PART)
    };

    if length == 0 {
        0
    } else if length <= single {
        1
    } else {
        length.div_ceil(part) as u32
    }
}

/// Credits the request will consume: segments of each personalized message.
pub fn estimate_credits(request: &SmsRequest) -> u32 {
    request
        .recipients
        .iter()
        .map(|r| segments(&personalize(&request.message, &r.name)))
        .sum()
}

/// Active members whose birthday falls on `date`.
pub fn birthday_recipients(members: &[Member], date: NaiveDate) -> Vec<Recipient> {
    members
        .iter()
        .filter(|m| m.status == MemberStatus::Active && m.has_birthday_on(date))
        .map(Recipient::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewMember;

    fn recipient(name: &str) -> Recipient {
        Recipient {
            name: name.to_string(),
            phone: "0240000000".to_string(),
        }
    }

    #[test]
    fn test_personalize() {
        assert_eq!(
            personalize("Hello {name}, we missed you!", "Kofi"),
            "Hello Kofi, we missed you!"
        );
        assert_eq!(personalize("No placeholder", "Kofi"), "No placeholder");
    }

    #[test]
    fn test_segments_gsm7() {
        assert_eq!(segments(""), 0);
        assert_eq!(segments(&"a".repeat(160)), 1);
        assert_eq!(segments(&"a".repeat(161)), 2);
        assert_eq!(segments(&"a".repeat(306)), 2);
        assert_eq!(segments(&"a".repeat(307)), 3);
        // Extended characters take two septets.
        assert_eq!(segments(&"€".repeat(80)), 1);
        assert_eq!(segments(&"€".repeat(81)), 2);
    }

    #[test]
    fn test_segments_unicode() {
        assert_eq!(segments(&"🙏".repeat(35)), 1);
        assert_eq!(segments(&"ɛ".repeat(71)), 2);
    }

    #[test]
    fn test_estimate_credits_per_recipient() {
        let request = SmsRequest {
            recipients: vec![recipient("Ama"), recipient(&"B".repeat(150))],
            message: "Hi {name}, service starts at 9am.".to_string(),
            kind: SmsKind::General,
        };
        assert_eq!(estimate_credits(&request), 1 + 2);
    }

    #[test]
    fn test_validation() {
        let mut request = SmsRequest {
            recipients: vec![],
            message: "Hello".to_string(),
            kind: SmsKind::FollowUp,
        };
        assert!(matches!(
            request.validate(),
            Err(Error::Validation { field: "recipients", .. })
        ));

        request.recipients.push(Recipient {
            name: "Esi".to_string(),
            phone: String::new(),
        });
        assert!(matches!(
            request.validate(),
            Err(Error::Validation { field: "phone", .. })
        ));

        request.recipients[0].phone = "0200000000".to_string();
        request.message = "  ".to_string();
        assert!(matches!(
            request.validate(),
            Err(Error::Validation { field: "message", .. })
        ));
    }

    #[test]
    fn test_request_wire_format() {
        let request = SmsRequest {
            recipients: vec![recipient("Ama")],
            message: "Happy birthday {name}!".to_string(),
            kind: SmsKind::Birthday,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["type"], "birthday");
        assert_eq!(json["recipients"][0]["name"], "Ama");
    }

    #[test]
    fn test_response_parses_partial_fields() {
        let response: SmsResponse = serde_json::from_str(
            r#"{"success": true, "sent": 2, "failed": 1, "credits_used": 2, "new_balance": 98,
                "results": [{"phone": "024", "success": true}]}"#,
        )
        .unwrap();
        assert_eq!(response.sent, 2);
        assert_eq!(response.new_balance, Some(98));
        assert!(response.error.is_none());
    }

    #[test]
    fn test_birthday_recipients_skip_inactive() {
        let date: NaiveDate = "2025-06-14".parse().unwrap();
        let birthday = Some("1990-06-14".parse().unwrap());
        let active = NewMember {
            name: "Akua".to_string(),
            phone: "1".to_string(),
            birthday,
            ..Default::default()
        }
        .into_member(1);
        let inactive = NewMember {
            name: "Kwame".to_string(),
            phone: "2".to_string(),
            birthday,
            status: MemberStatus::Inactive,
            ..Default::default()
        }
        .into_member(2);

        let list = birthday_recipients(&[active, inactive], date);
        assert_eq!(list, vec![Recipient { name: "Akua".to_string(), phone: "1".to_string() }]);
    }
}
